use super::Blob;
use crate::{
    DeviceError, DeviceOp, Element, Shape,
    device::{Accelerator, MapAccess, status},
};
use bytesize::ByteSize;
use half::f16;
use log::{debug, warn};
use std::{mem::forget, ptr::NonNull, slice};

/// 阻塞映射设备缓冲区的前 `size` 字节，交给 `f` 访问后解除映射
#[track_caller]
fn with_mapped<A: Accelerator, R>(
    queue: &A::Queue,
    buffer: Option<&A::Buffer>,
    access: MapAccess,
    size: usize,
    f: impl FnOnce(NonNull<u8>) -> R,
) -> Result<R, DeviceError> {
    let Some(buffer) = buffer else {
        return Err(DeviceError::new(DeviceOp::Map, status::INVALID_MEM_OBJECT));
    };
    let ptr = match A::map(queue, buffer, access, size) {
        Ok(ptr) => ptr,
        Err(status) => return Err(DeviceError::new(DeviceOp::Map, status)),
    };
    let guard = Unmap::<A> { queue, buffer, ptr };
    let ans = f(ptr);
    forget(guard);
    match A::unmap(queue, buffer, ptr) {
        Ok(()) => Ok(ans),
        Err(status) => Err(DeviceError::new(DeviceOp::Unmap, status)),
    }
}

/// `f` 发生 panic 时解除映射
struct Unmap<'a, A: Accelerator> {
    queue: &'a A::Queue,
    buffer: &'a A::Buffer,
    ptr: NonNull<u8>,
}

impl<A: Accelerator> Drop for Unmap<'_, A> {
    fn drop(&mut self) {
        if let Err(status) = A::unmap(self.queue, self.buffer, self.ptr) {
            warn!("failed to unmap device buffer while unwinding (status {status})")
        }
    }
}

/// 设备缓冲区的字节数，超出 `usize` 时报告 `op` 失败
#[track_caller]
fn byte_size<T>(len: usize, op: DeviceOp) -> Result<usize, DeviceError> {
    match len.checked_mul(size_of::<T>()) {
        Some(size) => Ok(size),
        None => Err(DeviceError::new(op, status::INVALID_BUFFER_SIZE)),
    }
}

impl<T: Element, A: Accelerator> Blob<T, A> {
    /// 创建容纳 `len` 个元素的设备缓冲区；已存在时直接返回。
    #[track_caller]
    pub fn alloc_device(&mut self, ctx: &A::Context, len: usize) -> Result<(), DeviceError> {
        if self.device.is_none() {
            let size = byte_size::<T>(len, DeviceOp::Create)?;
            match A::create_buffer(ctx, size) {
                Ok(buffer) => self.device = Some(buffer),
                Err(status) => return Err(DeviceError::new(DeviceOp::Create, status)),
            }
            debug!(
                "device buffer of {} created for blob {}",
                ByteSize::b(size as _).display(),
                self.shape,
            )
        }
        Ok(())
    }

    /// 释放设备缓冲区，可重复调用。释放失败时保留句柄。
    #[track_caller]
    pub fn free_device(&mut self) -> Result<(), DeviceError> {
        if let Some(buffer) = self.device.take()
            && let Err((buffer, status)) = A::release_buffer(buffer)
        {
            self.device = Some(buffer);
            return Err(DeviceError::new(DeviceOp::Release, status));
        }
        Ok(())
    }

    #[track_caller]
    pub fn write_to_device(&self, queue: &A::Queue, src: &[T]) -> Result<(), DeviceError> {
        write_bytes::<A>(queue, self.device.as_ref(), bytemuck::cast_slice(src))
    }

    #[track_caller]
    pub fn read_from_device(&self, queue: &A::Queue, dst: &mut [T]) -> Result<(), DeviceError> {
        read_bytes::<A>(queue, self.device.as_ref(), bytemuck::cast_slice_mut(dst))
    }

    /// 将主存数据按原样写入设备缓冲区
    #[track_caller]
    pub fn upload(&mut self, queue: &A::Queue) -> Result<(), DeviceError> {
        let src = self.data().unwrap_or_default();
        write_bytes::<A>(queue, self.device.as_ref(), bytemuck::cast_slice(src))
    }

    /// 将设备缓冲区读回主存，必要时按形状分配主存
    #[track_caller]
    pub fn download(&mut self, queue: &A::Queue) -> Result<(), DeviceError> {
        let len = self.data_size();
        self.realloc(len);
        let Some(host) = self.host.as_deref_mut() else {
            return Ok(());
        };
        read_bytes::<A>(
            queue,
            self.device.as_ref(),
            bytemuck::cast_slice_mut(&mut host[..len]),
        )
    }
}

#[track_caller]
fn write_bytes<A: Accelerator>(
    queue: &A::Queue,
    buffer: Option<&A::Buffer>,
    src: &[u8],
) -> Result<(), DeviceError> {
    if src.is_empty() {
        return Ok(());
    }
    with_mapped::<A, _>(queue, buffer, MapAccess::Write, src.len(), |ptr| unsafe {
        ptr.as_ptr().copy_from_nonoverlapping(src.as_ptr(), src.len())
    })
}

#[track_caller]
fn read_bytes<A: Accelerator>(
    queue: &A::Queue,
    buffer: Option<&A::Buffer>,
    dst: &mut [u8],
) -> Result<(), DeviceError> {
    if dst.is_empty() {
        return Ok(());
    }
    with_mapped::<A, _>(queue, buffer, MapAccess::Read, dst.len(), |ptr| unsafe {
        ptr.as_ptr().copy_to_nonoverlapping(dst.as_mut_ptr(), dst.len())
    })
}

impl<A: Accelerator> Blob<u16, A> {
    /// 读回 `[n][p][c_padded]` 排布的设备数据，去除通道填充并转换为 f32 `[n][c][p]`
    #[track_caller]
    pub fn read_from_device_chw(
        &self,
        queue: &A::Queue,
        dst: &mut [f32],
    ) -> Result<(), DeviceError> {
        assert!(
            dst.len() >= self.data_size(),
            "destination too small for blob {}",
            self.shape,
        );
        let size = byte_size::<u16>(self.data_size_padded_channels(), DeviceOp::Map)?;
        if size == 0 {
            return Ok(());
        }
        let Shape { num, channels, .. } = self.shape;
        let hw = self.shape.spatial();
        let padded = self.padded_channels();

        with_mapped::<A, _>(queue, self.device.as_ref(), MapAccess::Read, size, |ptr| {
            let src = unsafe { slice::from_raw_parts(ptr.as_ptr(), size) };
            let half = |i: usize| {
                let bits = u16::from_ne_bytes([src[2 * i], src[2 * i + 1]]);
                f16::from_bits(bits)
            };
            for n in 0..num {
                let dst = &mut dst[n * channels * hw..][..channels * hw];
                let base = n * hw * padded;
                for c in 0..channels {
                    for p in 0..hw {
                        dst[c * hw + p] = half(base + p * padded + c).to_f32()
                    }
                }
            }
        })
    }

    /// 将 CHW 排布的 f32 数据转为半精度并按通道填充排布写入设备，填充位置零。
    #[track_caller]
    pub fn write_to_device_chw(
        &mut self,
        queue: &A::Queue,
        src: &[f32],
    ) -> Result<(), DeviceError> {
        assert_eq!(
            src.len(),
            self.data_size(),
            "source length mismatches blob {}",
            self.shape,
        );
        let size = byte_size::<u16>(self.data_size_padded_channels(), DeviceOp::Map)?;
        if size == 0 {
            return Ok(());
        }
        let Shape { num, channels, .. } = self.shape;
        let hw = self.shape.spatial();
        let padded = self.padded_channels();

        with_mapped::<A, _>(queue, self.device.as_ref(), MapAccess::Write, size, |ptr| {
            let dst = unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), size) };
            dst.fill(0);
            for n in 0..num {
                let src = &src[n * channels * hw..][..channels * hw];
                let base = n * hw * padded;
                for c in 0..channels {
                    for p in 0..hw {
                        let i = 2 * (base + p * padded + c);
                        let bits = f16::from_f32(src[c * hw + p]).to_bits();
                        dst[i..i + 2].copy_from_slice(&bits.to_ne_bytes())
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod test {
    use crate::{
        Blob, DeviceOp,
        device::{Accelerator, MapAccess, status},
    };
    use std::ptr::NonNull;

    /// 解除映射与释放总是失败的后端
    struct Faulty;

    impl Accelerator for Faulty {
        type Context = ();
        type Queue = ();
        type Buffer = Box<[u8]>;

        fn create_buffer(_: &(), size: usize) -> Result<Box<[u8]>, i32> {
            Ok(vec![0; size].into_boxed_slice())
        }

        fn release_buffer(buffer: Box<[u8]>) -> Result<(), (Box<[u8]>, i32)> {
            Err((buffer, status::INVALID_OPERATION))
        }

        fn map(_: &(), buffer: &Box<[u8]>, _: MapAccess, size: usize) -> Result<NonNull<u8>, i32> {
            if size > buffer.len() {
                Err(status::INVALID_VALUE)
            } else {
                Ok(NonNull::from(&buffer[..]).cast())
            }
        }

        fn unmap(_: &(), _: &Box<[u8]>, _: NonNull<u8>) -> Result<(), i32> {
            Err(status::INVALID_MEM_OBJECT)
        }
    }

    #[test]
    fn test_no_device() {
        let mut blob = Blob::<f32>::with_shape(1, 1, 2, 2);
        let line = line!() + 1;
        let err = blob.alloc_device(&(), 4).unwrap_err();
        assert_eq!(err.op, DeviceOp::Create);
        assert_eq!(err.status, status::DEVICE_NOT_AVAILABLE);
        assert_eq!(err.location.line(), line);
        assert!(!blob.has_device());

        assert!(blob.free_device().is_ok());
        let err = blob.write_to_device(&(), &[1., 2., 3., 4.]).unwrap_err();
        assert_eq!(err.op, DeviceOp::Map);
        assert_eq!(err.status, status::INVALID_MEM_OBJECT);
    }

    #[test]
    fn test_buffer_size_overflow() {
        let mut blob = Blob::<f32>::with_shape(1 << 62, 1, 1, 1);
        let line = line!() + 1;
        let err = blob.alloc_device(&(), blob.data_size_padded_channels()).unwrap_err();
        assert_eq!(err.op, DeviceOp::Create);
        assert_eq!(err.status, status::INVALID_BUFFER_SIZE);
        assert_eq!(err.location.line(), line);
        assert!(!blob.has_device());
    }

    #[test]
    fn test_unmap_failure() {
        let mut blob = Blob::<f32, Faulty>::with_shape(1, 1, 2, 2);
        blob.alloc_device(&(), 16).unwrap();

        let mut dst = [1f32; 4];
        let line = line!() + 1;
        let err = blob.read_from_device(&(), &mut dst).unwrap_err();
        assert_eq!(err.op, DeviceOp::Unmap);
        assert_eq!(err.status, status::INVALID_MEM_OBJECT);
        assert_eq!(err.location.line(), line);
        // 数据已拷贝，但整个调用仍视为失败
        assert_eq!(dst, [0.; 4]);
    }

    #[test]
    fn test_release_failure() {
        let mut blob = Blob::<f32, Faulty>::with_shape(1, 1, 2, 2);
        blob.alloc_device(&(), 16).unwrap();

        let line = line!() + 1;
        let err = blob.free_device().unwrap_err();
        assert_eq!(err.op, DeviceOp::Release);
        assert_eq!(err.status, status::INVALID_OPERATION);
        assert_eq!(err.location.line(), line);
        assert!(blob.has_device());

        let err = blob.free_device().unwrap_err();
        assert_eq!(err.op, DeviceOp::Release);
        assert!(blob.has_device());
    }
}

#[cfg(all(test, feature = "host-device"))]
mod test_host {
    use super::with_mapped;
    use crate::{
        Blob, DeviceOp,
        device::{HostContext, HostDevice, HostQueue, MapAccess, status},
    };
    use half::f16;
    use rand::Rng;
    use std::panic::{self, AssertUnwindSafe};

    type HalfBlob = Blob<u16, HostDevice>;

    #[test]
    fn test_chw_constant_channels() {
        let ctx = HostContext::unlimited();
        let queue = HostQueue;
        let mut blob = HalfBlob::with_shape(1, 2, 2, 2);
        assert_eq!(blob.padded_channels(), 4);
        blob.alloc_device(&ctx, blob.data_size_padded_channels()).unwrap();

        // 设备端排布 [p][c_padded]
        let one = f16::from_f32(1.).to_bits();
        let two = f16::from_f32(2.).to_bits();
        let mut padded = vec![0u16; blob.data_size_padded_channels()];
        for p in 0..4 {
            padded[p * 4] = one;
            padded[p * 4 + 1] = two;
        }
        blob.write_to_device(&queue, &padded).unwrap();

        let mut chw = [0f32; 8];
        blob.read_from_device_chw(&queue, &mut chw).unwrap();
        assert_eq!(chw, [1., 1., 1., 1., 2., 2., 2., 2.]);
    }

    #[test]
    fn test_chw_round_trip() {
        let ctx = HostContext::unlimited();
        let queue = HostQueue;
        let mut rng = rand::rng();
        for (shape, align) in [
            ([1, 3, 5, 5], 4),
            ([2, 6, 3, 4], 4),
            ([1, 5, 2, 3], 8),
            ([1, 4, 1, 1], 1),
        ] {
            let [n, c, h, w] = shape;
            let mut blob = HalfBlob::with_shape(n, c, h, w).with_channel_align(align);
            blob.alloc_device(&ctx, blob.data_size_padded_channels()).unwrap();

            let src = (0..blob.data_size())
                .map(|_| rng.random_range(-4.0f32..4.0))
                .collect::<Vec<_>>();
            blob.write_to_device_chw(&queue, &src).unwrap();

            let mut dst = vec![0f32; blob.data_size()];
            blob.read_from_device_chw(&queue, &mut dst).unwrap();
            for (&x, &y) in src.iter().zip(&dst) {
                assert!((x - y).abs() <= 1. / 512., "{x} vs {y}");
            }

            // 填充通道保持为零
            let mut raw = vec![1u16; blob.data_size_padded_channels()];
            blob.read_from_device(&queue, &mut raw).unwrap();
            let padded = blob.padded_channels();
            for (i, &x) in raw.iter().enumerate() {
                if i % padded >= c {
                    assert_eq!(x, 0)
                }
            }
        }
    }

    #[test]
    fn test_alloc_device_idempotent() {
        let ctx = HostContext::unlimited();
        let mut blob = HalfBlob::with_shape(1, 3, 4, 4);
        let len = blob.data_size_padded_channels();
        blob.alloc_device(&ctx, len).unwrap();
        assert_eq!(ctx.used(), len * 2);
        blob.alloc_device(&ctx, len).unwrap();
        blob.alloc_device(&ctx, len * 4).unwrap();
        assert_eq!(ctx.used(), len * 2);
        assert!(blob.has_device());

        blob.free_device().unwrap();
        assert!(!blob.has_device());
        assert_eq!(ctx.used(), 0);
        blob.free_device().unwrap();
        assert_eq!(ctx.used(), 0);
    }

    #[test]
    fn test_out_of_device_memory() {
        let ctx = HostContext::new(64);
        let mut blob = Blob::<f32, HostDevice>::with_shape(1, 5, 2, 2);
        assert_eq!(blob.data_size_padded_channels(), 32);
        let err = blob
            .alloc_device(&ctx, blob.data_size_padded_channels())
            .unwrap_err();
        assert_eq!(err.op, DeviceOp::Create);
        assert_eq!(err.status, status::MEM_OBJECT_ALLOCATION_FAILURE);
        assert!(!blob.has_device());
        assert_eq!(ctx.used(), 0);

        blob.alloc_device(&ctx, 16).unwrap();
        assert_eq!(ctx.used(), 64);
    }

    #[test]
    fn test_drop_releases() {
        let ctx = HostContext::unlimited();
        {
            let mut blob = HalfBlob::with_shape(1, 1, 8, 8);
            blob.alloc();
            blob.alloc_device(&ctx, blob.data_size_padded_channels()).unwrap();
            assert_eq!(ctx.used(), 256 * 2);
        }
        assert_eq!(ctx.used(), 0);
    }

    #[test]
    fn test_overflow_is_map_error() {
        let ctx = HostContext::unlimited();
        let queue = HostQueue;
        let mut blob = Blob::<f32, HostDevice>::with_shape(1, 1, 1, 2);
        blob.alloc_device(&ctx, 2).unwrap();

        let err = blob.write_to_device(&queue, &[1., 2., 3.]).unwrap_err();
        assert_eq!(err.op, DeviceOp::Map);
        assert_eq!(err.status, status::INVALID_VALUE);

        let mut dst = [0f32; 4];
        let err = blob.read_from_device(&queue, &mut dst).unwrap_err();
        assert_eq!(err.op, DeviceOp::Map);

        blob.write_to_device(&queue, &[1., 2.]).unwrap();
        blob.read_from_device(&queue, &mut dst[..2]).unwrap();
        assert_eq!(dst, [1., 2., 0., 0.]);
    }

    #[test]
    fn test_write_host_data() {
        let ctx = HostContext::unlimited();
        let queue = HostQueue;
        let mut blob = Blob::<f32, HostDevice>::with_shape(1, 1, 2, 2);
        blob.copy_data(&[1., 2., 3., 4.]);
        blob.alloc_device(&ctx, blob.data_size()).unwrap();
        blob.write_to_device(&queue, blob.data().unwrap()).unwrap();

        let mut dst = [0f32; 4];
        blob.read_from_device(&queue, &mut dst).unwrap();
        assert_eq!(dst, [1., 2., 3., 4.]);
    }

    #[test]
    fn test_unmap_on_panic() {
        let ctx = HostContext::unlimited();
        let queue = HostQueue;
        let mut blob = HalfBlob::with_shape(1, 1, 2, 2);
        blob.alloc_device(&ctx, blob.data_size()).unwrap();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            with_mapped::<HostDevice, ()>(
                &queue,
                blob.device.as_ref(),
                MapAccess::Read,
                8,
                |_| panic!("copy out of bounds"),
            )
        }));
        assert!(result.is_err());
        assert_eq!(blob.device.as_ref().unwrap().maps(), 0);

        blob.free_device().unwrap();
        assert_eq!(ctx.used(), 0);
    }

    #[test]
    fn test_upload_download() {
        let ctx = HostContext::unlimited();
        let queue = HostQueue;
        let mut blob = Blob::<f32, HostDevice>::with_shape(1, 2, 2, 2);
        blob.copy_data(&[0., 1., 2., 3., 4., 5., 6., 7.]);
        blob.alloc_device(&ctx, blob.data_size()).unwrap();
        blob.upload(&queue).unwrap();

        blob.free();
        blob.download(&queue).unwrap();
        assert_eq!(blob.data().unwrap(), &[0., 1., 2., 3., 4., 5., 6., 7.]);
    }
}
