use crate::Shape;
use std::{fmt, panic::Location};
use thiserror::Error;

/// 从序列化记录加载 blob 时的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// `data` 与 `data_fp16` 同时非空，模型文件已损坏
    #[error("blob record carries both fp32 and fp16 data ({fp32} + {fp16} values)")]
    MixedEncoding { fp32: usize, fp16: usize },
    #[error("blob record shape holds {expected} values, but {actual} are provided")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("blob record shape {shape} holds more values than fit in memory")]
    ShapeOverflow { shape: Shape },
}

impl LoadError {
    /// Fatal errors mean the input cannot be interpreted at all; loading must not continue.
    #[inline]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::MixedEncoding { .. })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DeviceOp {
    Create,
    Release,
    Map,
    Unmap,
}

impl fmt::Display for DeviceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create buffer",
            Self::Release => "release buffer",
            Self::Map => "map buffer",
            Self::Unmap => "unmap buffer",
        })
    }
}

/// 加速器调用失败，携带原始状态码与调用位置
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{op} failed with status {status} at {location}")]
pub struct DeviceError {
    pub op: DeviceOp,
    pub status: i32,
    pub location: &'static Location<'static>,
}

impl DeviceError {
    #[track_caller]
    pub(crate) fn new(op: DeviceOp, status: i32) -> Self {
        let err = Self {
            op,
            status,
            location: Location::caller(),
        };
        log::error!("{err}");
        err
    }
}

#[cfg(test)]
mod test {
    use super::{DeviceError, DeviceOp, LoadError};

    #[test]
    fn test_fatal() {
        assert!(LoadError::MixedEncoding { fp32: 1, fp16: 1 }.is_fatal());
        assert!(
            !LoadError::LengthMismatch {
                expected: 4,
                actual: 3
            }
            .is_fatal()
        );
        let shape = [1 << 62, 8, 1, 1].into();
        assert!(!LoadError::ShapeOverflow { shape }.is_fatal());
    }

    #[test]
    fn test_location() {
        let line = line!() + 1;
        let err = DeviceError::new(DeviceOp::Map, -5);
        assert_eq!(err.location.file(), file!());
        assert_eq!(err.location.line(), line);
        assert!(err.to_string().starts_with("map buffer failed with status -5 at "));
    }
}
