use crate::{Dtype, load_blob, read_record};
use log::{info, warn};
use std::path::PathBuf;
use tensor_blob::{Blob, BlobRecord, Element};

#[derive(Args)]
pub struct InspectArgs {
    /// blob record in json
    record: PathBuf,
    /// host storage type to load into
    #[clap(long, value_enum, default_value = "f32")]
    dtype: Dtype,
}

impl InspectArgs {
    pub fn inspect(self) {
        let Self { record, dtype } = self;
        let record = read_record(&record);
        match record.encoding() {
            Ok(encoding) => info!("record encoding: {encoding:?}"),
            Err(e) => warn!("{e}"),
        }
        match dtype {
            Dtype::F32 => summarize(&load_blob::<f32>(&record), &record),
            Dtype::F16 => summarize(&load_blob::<u16>(&record), &record),
            Dtype::U8 => summarize(&load_blob::<u8>(&record), &record),
        }
    }
}

fn summarize<T: Element>(blob: &Blob<T>, record: &BlobRecord) {
    println!("{blob}");
    let Some(data) = blob.data().filter(|data| !data.is_empty()) else {
        println!("  (empty)");
        return;
    };

    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut sum = 0f64;
    for &x in data {
        let x = x.to_f32();
        min = min.min(x);
        max = max.max(x);
        sum += x as f64;
    }
    println!("  min = {min}, max = {max}, mean = {}", sum / data.len() as f64);

    // 仅 f32 记录经过转换才可能有精度损失
    if !record.data.is_empty() {
        let err = data
            .iter()
            .zip(&record.data)
            .map(|(&x, &y)| (x.to_f32() - y).abs())
            .fold(0f32, f32::max);
        println!("  max abs error vs record = {err}")
    }
}
