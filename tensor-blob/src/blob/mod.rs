mod device;
mod load;

use crate::{
    Element, Shape,
    device::{Accelerator, NoDevice},
    memory::AlignedBuf,
};
use bytesize::ByteSize;
use log::{trace, warn};
use std::fmt;

/// 设备端通道数默认的对齐粒度
pub const DEFAULT_CHANNEL_ALIGN: usize = 4;

/// 4 维张量存储单元，独占主存缓冲区与可选的设备缓冲区。
pub struct Blob<T, A: Accelerator = NoDevice> {
    shape: Shape,
    channel_align: usize,
    host: Option<AlignedBuf<T>>,
    device: Option<A::Buffer>,
}

impl<T, A: Accelerator> Default for Blob<T, A> {
    fn default() -> Self {
        Self {
            shape: Shape::default(),
            channel_align: DEFAULT_CHANNEL_ALIGN,
            host: None,
            device: None,
        }
    }
}

impl<T, A: Accelerator> Blob<T, A> {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 构造指定形状的空 blob，不分配内存
    #[inline]
    pub fn with_shape(num: usize, channels: usize, height: usize, width: usize) -> Self {
        Self {
            shape: Shape::new(num, channels, height, width),
            channel_align: DEFAULT_CHANNEL_ALIGN,
            host: None,
            device: None,
        }
    }

    /// 设置设备端通道对齐粒度
    pub fn with_channel_align(mut self, align: usize) -> Self {
        assert!(align > 0, "channel align must be positive");
        self.channel_align = align;
        self
    }

    #[inline]
    pub const fn shape(&self) -> Shape {
        self.shape
    }
    #[inline]
    pub const fn num(&self) -> usize {
        self.shape.num
    }
    #[inline]
    pub const fn channels(&self) -> usize {
        self.shape.channels
    }
    #[inline]
    pub const fn height(&self) -> usize {
        self.shape.height
    }
    #[inline]
    pub const fn width(&self) -> usize {
        self.shape.width
    }
    #[inline]
    pub const fn channel_align(&self) -> usize {
        self.channel_align
    }

    /// 逻辑形状对应的元素个数，溢出时饱和
    #[inline]
    pub const fn data_size(&self) -> usize {
        self.shape.data_size()
    }

    #[inline]
    pub const fn padded_channels(&self) -> usize {
        self.shape.padded_channels(self.channel_align)
    }

    /// 通道对齐后的元素个数，设备缓冲区按此分配
    #[inline]
    pub const fn data_size_padded_channels(&self) -> usize {
        self.shape.data_size_padded_channels(self.channel_align)
    }

    /// 主存缓冲区实际分配的元素个数，与逻辑形状无关
    #[inline]
    pub fn capacity(&self) -> usize {
        self.host.as_ref().map_or(0, AlignedBuf::capacity)
    }

    #[inline]
    pub const fn is_allocated(&self) -> bool {
        self.host.is_some()
    }

    #[inline]
    pub const fn has_device(&self) -> bool {
        self.device.is_some()
    }

    /// Sets the logical shape without touching the host buffer.
    pub fn reshape(&mut self, num: usize, channels: usize, height: usize, width: usize) {
        self.shape = Shape::new(num, channels, height, width)
    }

    pub fn copy_shape<U, B: Accelerator>(&mut self, other: &Blob<U, B>) {
        self.shape = other.shape
    }

    /// 释放主存缓冲区，可重复调用
    pub fn free(&mut self) {
        if let Some(buf) = self.host.take() {
            trace!("free host buffer of {} elements", buf.capacity())
        }
    }

    /// Host data covering the logical shape, or `None` when no buffer covers it.
    pub fn data(&self) -> Option<&[T]> {
        let len = self.data_size();
        self.host
            .as_deref()
            .filter(|buf| buf.len() >= len)
            .map(|buf| &buf[..len])
    }

    pub fn data_mut(&mut self) -> Option<&mut [T]> {
        let len = self.data_size();
        self.host
            .as_deref_mut()
            .filter(|buf| buf.len() >= len)
            .map(|buf| &mut buf[..len])
    }
}

impl<T: Element, A: Accelerator> Blob<T, A> {
    /// 按当前形状分配 32 字节对齐的主存缓冲区，旧缓冲区先行释放
    pub fn alloc(&mut self) {
        self.host = None;
        let len = self.data_size();
        if len > 0 {
            self.host = Some(AlignedBuf::zeroed(len));
            trace!(
                "alloc {} for blob {}",
                ByteSize::b((len * size_of::<T>()) as _).display(),
                self.shape,
            )
        }
    }

    /// 仅当请求的元素个数超过已分配容量时重新分配，否则原地复用。
    pub fn realloc(&mut self, len: usize) {
        let capacity = self.capacity();
        if len > capacity {
            self.host = None;
            self.host = Some(AlignedBuf::zeroed(len));
            trace!(
                "realloc host buffer {capacity} -> {len} elements ({})",
                ByteSize::b((len * size_of::<T>()) as _).display(),
            )
        }
    }

    pub fn reshape_with_realloc(
        &mut self,
        num: usize,
        channels: usize,
        height: usize,
        width: usize,
    ) {
        let shape = Shape::new(num, channels, height, width);
        self.realloc(shape.data_size());
        self.shape = shape
    }

    pub fn reshape_like<U, B: Accelerator>(&mut self, other: &Blob<U, B>) {
        let Shape {
            num,
            channels,
            height,
            width,
        } = other.shape;
        self.reshape_with_realloc(num, channels, height, width)
    }

    /// 用 `src` 填充主存缓冲区，必要时按形状分配。
    pub fn copy_data(&mut self, src: &[T]) {
        assert_eq!(
            src.len(),
            self.data_size(),
            "data length mismatches blob {}",
            self.shape,
        );
        self.realloc(src.len());
        if let Some(dst) = self.data_mut() {
            dst.copy_from_slice(src)
        }
    }
}

impl<T, A: Accelerator> Drop for Blob<T, A> {
    fn drop(&mut self) {
        if let Some(buffer) = self.device.take()
            && let Err((_, status)) = A::release_buffer(buffer)
        {
            warn!(
                "failed to release device buffer of blob {} (status {status})",
                self.shape,
            )
        }
    }
}

impl<T: Element, A: Accelerator> fmt::Display for Blob<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Blob<{}> {} {} on host",
            T::NAME,
            self.shape,
            ByteSize::b((self.capacity() * size_of::<T>()) as _).display(),
        )?;
        if self.has_device() {
            write!(f, ", padded to {} channels on device", self.padded_channels())?
        }
        Ok(())
    }
}

impl<T: Element, A: Accelerator> fmt::Debug for Blob<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("dtype", &T::NAME)
            .field("shape", &self.shape)
            .field("channel_align", &self.channel_align)
            .field("capacity", &self.capacity())
            .field("device", &self.has_device())
            .finish()
    }
}
