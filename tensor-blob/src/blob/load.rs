use super::Blob;
use crate::{
    BlobRecord, Element, LoadError,
    device::Accelerator,
    record::Values,
};
use log::{debug, error};

impl<T: Element, A: Accelerator> Blob<T, A> {
    /// 从序列化记录加载形状与数据，失败时保留形状并释放主存缓冲区
    pub fn load_record(&mut self, record: &BlobRecord) -> Result<(), LoadError> {
        self.shape = record.shape();
        let values = match record.values() {
            Ok(values) => values,
            Err(e) => {
                error!("fatal: {e}");
                self.free();
                return Err(e);
            }
        };

        let Some(expected) = self.shape.checked_data_size() else {
            self.free();
            return Err(LoadError::ShapeOverflow { shape: self.shape });
        };
        if values.len() != expected {
            self.free();
            return Err(LoadError::LengthMismatch {
                expected,
                actual: values.len(),
            });
        }

        self.alloc();
        if let Some(dst) = self.data_mut() {
            match values {
                Values::Fp32(src) => {
                    for (dst, &src) in dst.iter_mut().zip(src) {
                        *dst = T::from_f32(src)
                    }
                }
                Values::Fp16(src) => {
                    for (dst, &src) in dst.iter_mut().zip(src) {
                        *dst = T::from_f16_bits(src)
                    }
                }
            }
        }
        debug!("loaded {self} from {:?} record", values.encoding());
        Ok(())
    }

    /// 构造并加载一个新 blob
    pub fn load(record: &BlobRecord) -> Result<Self, LoadError> {
        let mut blob = Self::new();
        blob.load_record(record)?;
        Ok(blob)
    }

    /// 序列化为记录，半精度存储写入 `data_fp16`，其余写入 `data`
    pub fn to_record(&self) -> BlobRecord {
        let shape = self.shape;
        let data = self.data().unwrap_or_default();
        let mut record = BlobRecord {
            num: shape.num,
            channels: shape.channels,
            height: shape.height,
            width: shape.width,
            ..Default::default()
        };
        if T::IS_HALF {
            record.data_fp16 = bytemuck::cast_slice(data).to_vec()
        } else {
            record.data = data.iter().map(|&x| x.to_f32()).collect()
        }
        record
    }
}
