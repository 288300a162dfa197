//! 加速器后端抽象，失败以原始状态码报告

#[cfg(feature = "host-device")]
mod host;

use std::{convert::Infallible, ptr::NonNull};

#[cfg(feature = "host-device")]
pub use host::{HostBuffer, HostContext, HostDevice, HostQueue};

/// 状态码，取值与 OpenCL 保持一致
pub mod status {
    pub const DEVICE_NOT_AVAILABLE: i32 = -2;
    pub const MEM_OBJECT_ALLOCATION_FAILURE: i32 = -4;
    pub const OUT_OF_HOST_MEMORY: i32 = -6;
    pub const INVALID_VALUE: i32 = -30;
    pub const INVALID_MEM_OBJECT: i32 = -38;
    pub const INVALID_OPERATION: i32 = -59;
    pub const INVALID_BUFFER_SIZE: i32 = -61;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MapAccess {
    Read,
    Write,
}

pub trait Accelerator {
    type Context;
    type Queue;
    /// 设备缓冲区句柄，由唯一一个 blob 持有
    type Buffer;

    /// Creates a host-accessible device buffer of `size` bytes.
    fn create_buffer(ctx: &Self::Context, size: usize) -> Result<Self::Buffer, i32>;

    /// Releases `buffer`. On failure the handle is handed back to the caller.
    fn release_buffer(buffer: Self::Buffer) -> Result<(), (Self::Buffer, i32)>;

    /// Blocking map of the first `size` bytes of `buffer`.
    ///
    /// The returned pointer stays valid until the matching [`Accelerator::unmap`].
    fn map(
        queue: &Self::Queue,
        buffer: &Self::Buffer,
        access: MapAccess,
        size: usize,
    ) -> Result<NonNull<u8>, i32>;

    fn unmap(queue: &Self::Queue, buffer: &Self::Buffer, ptr: NonNull<u8>) -> Result<(), i32>;
}

/// 未配置加速器时的后端，无法创建任何设备缓冲区。
#[derive(Clone, Copy, Default, Debug)]
pub struct NoDevice;

impl Accelerator for NoDevice {
    type Context = ();
    type Queue = ();
    type Buffer = Infallible;

    fn create_buffer(_ctx: &(), _size: usize) -> Result<Infallible, i32> {
        Err(status::DEVICE_NOT_AVAILABLE)
    }

    fn release_buffer(buffer: Infallible) -> Result<(), (Infallible, i32)> {
        match buffer {}
    }

    fn map(_: &(), buffer: &Infallible, _: MapAccess, _: usize) -> Result<NonNull<u8>, i32> {
        match *buffer {}
    }

    fn unmap(_: &(), buffer: &Infallible, _: NonNull<u8>) -> Result<(), i32> {
        match *buffer {}
    }
}
