use bytemuck::Zeroable;
use std::{
    alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error},
    fmt,
    ops::{Deref, DerefMut},
    ptr::NonNull,
};

/// 主存缓冲区的对齐要求，供下游向量化算子使用
pub const ALIGNMENT: usize = 32;

/// 独占所有权的 32 字节对齐主存缓冲区。
///
/// SAFETY:
///  - `ptr` points to a live allocation from the global allocator made with
///    `Self::layout(len)`, and all `len` elements are initialized (zero-filled on creation).
///  - `len > 0`.
pub struct AlignedBuf<T> {
    ptr: NonNull<T>,
    len: usize,
}

unsafe impl<T: Send> Send for AlignedBuf<T> {}
unsafe impl<T: Sync> Sync for AlignedBuf<T> {}

impl<T: Zeroable> AlignedBuf<T> {
    /// 分配 `len` 个元素的零初始化缓冲区，分配失败时终止进程
    pub fn zeroed(len: usize) -> Self {
        assert!(len > 0, "zero-sized host buffer");
        let layout = Self::layout(len);
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr.cast()) else {
            handle_alloc_error(layout)
        };
        Self { ptr, len }
    }
}

impl<T> AlignedBuf<T> {
    fn layout(len: usize) -> Layout {
        Layout::array::<T>(len)
            .and_then(|layout| layout.align_to(ALIGNMENT))
            .unwrap_or_else(|_| panic!("host buffer of {len} elements overflows the address space"))
    }

    /// 已分配的元素个数
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }
}

impl<T> Deref for AlignedBuf<T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        // SAFETY: see type invariants
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<T> DerefMut for AlignedBuf<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: see type invariants
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T> Drop for AlignedBuf<T> {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr().cast(), Self::layout(self.len)) }
    }
}

impl<T> fmt::Debug for AlignedBuf<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuf")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}
