use crate::{LoadError, Shape};
use serde::{Deserialize, Serialize};

/// 模型文件中单个 blob 的序列化记录，`data` 与 `data_fp16` 至多一个非空
#[derive(Clone, Default, PartialEq, Debug, Serialize, Deserialize)]
pub struct BlobRecord {
    pub num: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_fp16: Vec<u16>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Encoding {
    Fp32,
    Fp16,
}

/// 记录中实际存在的数值数组
#[derive(Clone, Copy, Debug)]
pub enum Values<'a> {
    Fp32(&'a [f32]),
    Fp16(&'a [u16]),
}

impl Values<'_> {
    #[inline]
    pub const fn len(&self) -> usize {
        match self {
            Self::Fp32(v) => v.len(),
            Self::Fp16(v) => v.len(),
        }
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub const fn encoding(&self) -> Encoding {
        match self {
            Self::Fp32(_) => Encoding::Fp32,
            Self::Fp16(_) => Encoding::Fp16,
        }
    }
}

impl BlobRecord {
    #[inline]
    pub const fn shape(&self) -> Shape {
        Shape::new(self.num, self.channels, self.height, self.width)
    }

    /// 按长度判断哪一个数组有效，两者皆空时视为 fp32
    pub fn values(&self) -> Result<Values<'_>, LoadError> {
        match (self.data.len(), self.data_fp16.len()) {
            (_, 0) => Ok(Values::Fp32(&self.data)),
            (0, _) => Ok(Values::Fp16(&self.data_fp16)),
            (fp32, fp16) => Err(LoadError::MixedEncoding { fp32, fp16 }),
        }
    }

    #[inline]
    pub fn encoding(&self) -> Result<Encoding, LoadError> {
        self.values().map(|v| v.encoding())
    }
}

#[cfg(test)]
mod test {
    use super::{BlobRecord, Encoding};
    use crate::LoadError;

    #[test]
    fn test_json() {
        let record: BlobRecord = serde_json::from_str(
            r#"{"num":1,"channels":1,"height":2,"width":2,"data":[1.5,-2.25,0.0,100.0]}"#,
        )
        .unwrap();
        assert!(record.data_fp16.is_empty());
        assert_eq!(record.shape().data_size(), 4);
        assert_eq!(record.encoding(), Ok(Encoding::Fp32));

        let text = serde_json::to_string(&record).unwrap();
        assert!(!text.contains("data_fp16"));
    }

    #[test]
    fn test_encoding() {
        let mut record = BlobRecord {
            num: 1,
            channels: 1,
            height: 1,
            width: 2,
            data_fp16: vec![0x3c00, 0x4000],
            ..Default::default()
        };
        assert_eq!(record.encoding(), Ok(Encoding::Fp16));

        record.data = vec![1.];
        assert_eq!(
            record.encoding(),
            Err(LoadError::MixedEncoding { fp32: 1, fp16: 2 })
        );
    }
}
