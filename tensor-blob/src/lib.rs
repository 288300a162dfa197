mod blob;
mod element;
mod error;
mod memory;
mod record;
mod shape;

pub mod device;

pub use blob::{Blob, DEFAULT_CHANNEL_ALIGN};
pub use element::Element;
pub use error::{DeviceError, DeviceOp, LoadError};
pub use memory::{ALIGNMENT, AlignedBuf};
pub use record::{BlobRecord, Encoding, Values};
pub use shape::Shape;
