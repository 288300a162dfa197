use super::{Accelerator, MapAccess, status};
use bytesize::ByteSize;
use log::{trace, warn};
use memmap2::MmapMut;
use std::{
    cell::Cell,
    ptr::NonNull,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering::Relaxed},
    },
};

/// 以匿名内存映射模拟的主机可见加速器
#[derive(Clone, Copy, Default, Debug)]
pub struct HostDevice;

/// 设备上下文，限制可分配的设备内存总量
#[derive(Clone, Debug)]
pub struct HostContext(Arc<Budget>);

#[derive(Debug)]
struct Budget {
    limit: usize,
    used: AtomicUsize,
}

/// 同步命令队列，所有命令在提交时即完成
#[derive(Clone, Copy, Default, Debug)]
pub struct HostQueue;

pub struct HostBuffer {
    mem: MmapMut,
    ptr: NonNull<u8>,
    maps: Cell<usize>,
    budget: Arc<Budget>,
}

unsafe impl Send for HostBuffer {}

impl HostContext {
    pub fn new(limit: usize) -> Self {
        Self(Arc::new(Budget {
            limit,
            used: AtomicUsize::new(0),
        }))
    }

    #[inline]
    pub fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.0.limit
    }

    /// 当前已分配的设备内存字节数
    #[inline]
    pub fn used(&self) -> usize {
        self.0.used.load(Relaxed)
    }
}

impl Default for HostContext {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl Budget {
    fn reserve(&self, size: usize) -> bool {
        self.used
            .fetch_update(Relaxed, Relaxed, |used| {
                used.checked_add(size).filter(|&total| total <= self.limit)
            })
            .is_ok()
    }

    fn give_back(&self, size: usize) {
        self.used.fetch_sub(size, Relaxed);
    }
}

impl HostBuffer {
    #[inline]
    pub fn len(&self) -> usize {
        self.mem.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    /// 尚未解除的映射数
    #[inline]
    pub fn maps(&self) -> usize {
        self.maps.get()
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        if self.maps.get() > 0 {
            warn!("device buffer dropped with {} live mapping(s)", self.maps.get())
        }
        self.budget.give_back(self.mem.len())
    }
}

impl Accelerator for HostDevice {
    type Context = HostContext;
    type Queue = HostQueue;
    type Buffer = HostBuffer;

    fn create_buffer(ctx: &HostContext, size: usize) -> Result<HostBuffer, i32> {
        if size == 0 {
            return Err(status::INVALID_BUFFER_SIZE);
        }
        if !ctx.0.reserve(size) {
            warn!(
                "device memory exhausted: {} requested, {} of {} in use",
                ByteSize::b(size as _).display(),
                ByteSize::b(ctx.used() as _).display(),
                ByteSize::b(ctx.limit() as _).display(),
            );
            return Err(status::MEM_OBJECT_ALLOCATION_FAILURE);
        }
        let mut mem = match MmapMut::map_anon(size) {
            Ok(mem) => mem,
            Err(e) => {
                warn!("anonymous mapping failed: {e}");
                ctx.0.give_back(size);
                return Err(status::OUT_OF_HOST_MEMORY);
            }
        };
        let ptr = NonNull::new(mem.as_mut_ptr()).ok_or(status::OUT_OF_HOST_MEMORY)?;
        Ok(HostBuffer {
            mem,
            ptr,
            maps: Cell::new(0),
            budget: ctx.0.clone(),
        })
    }

    fn release_buffer(buffer: HostBuffer) -> Result<(), (HostBuffer, i32)> {
        if buffer.maps.get() > 0 {
            Err((buffer, status::INVALID_OPERATION))
        } else {
            Ok(())
        }
    }

    fn map(
        _queue: &HostQueue,
        buffer: &HostBuffer,
        access: MapAccess,
        size: usize,
    ) -> Result<NonNull<u8>, i32> {
        if size == 0 || size > buffer.len() {
            return Err(status::INVALID_VALUE);
        }
        trace!("map {access:?} {size} of {} bytes", buffer.len());
        buffer.maps.set(buffer.maps.get() + 1);
        Ok(buffer.ptr)
    }

    fn unmap(_queue: &HostQueue, buffer: &HostBuffer, ptr: NonNull<u8>) -> Result<(), i32> {
        match buffer.maps.get() {
            n if n > 0 && ptr == buffer.ptr => {
                buffer.maps.set(n - 1);
                Ok(())
            }
            _ => Err(status::INVALID_VALUE),
        }
    }
}
