use crate::{load_blob, parse_shape, read_record};
use log::{debug, error, info};
use std::{path::PathBuf, process::exit, time::Instant};
use tensor_blob::{
    Blob, DEFAULT_CHANNEL_ALIGN, Element, Shape,
    device::{HostContext, HostDevice, HostQueue},
};

#[derive(Args)]
pub struct ChwArgs {
    /// blob record in json, a ramp tensor is generated when absent
    record: Option<PathBuf>,
    /// shape of the generated tensor, e.g. 1x3x8x8
    #[clap(long)]
    shape: Option<String>,
    /// device channel padding granularity
    #[clap(long)]
    align: Option<usize>,
    /// device memory budget in bytes
    #[clap(long)]
    budget: Option<usize>,
}

impl ChwArgs {
    pub fn chw(self) {
        let Self {
            record,
            shape,
            align,
            budget,
        } = self;

        let host = match record {
            Some(path) => load_blob::<f32>(&read_record(&path)),
            None => {
                let shape = shape.as_deref().map_or(Some(Shape::new(1, 3, 8, 8)), parse_shape);
                let Some(Shape {
                    num,
                    channels,
                    height,
                    width,
                }) = shape
                else {
                    error!("shape must have 4 dimensions");
                    exit(1)
                };
                let mut blob = Blob::<f32>::with_shape(num, channels, height, width);
                let ramp = (0..blob.data_size())
                    .map(|i| (i % 64) as f32 / 8. - 4.)
                    .collect::<Vec<_>>();
                blob.copy_data(&ramp);
                blob
            }
        };
        let src = host.data().unwrap_or_default();

        let ctx = budget.map_or_else(HostContext::unlimited, HostContext::new);
        let queue = HostQueue;
        let mut device = Blob::<u16, HostDevice>::new()
            .with_channel_align(align.unwrap_or(DEFAULT_CHANNEL_ALIGN));
        device.copy_shape(&host);
        if let Err(e) = device.alloc_device(&ctx, device.data_size_padded_channels()) {
            error!("{e}");
            exit(1)
        }
        debug!("{device}");

        let time = Instant::now();
        let mut dst = vec![0f32; src.len()];
        let result = device
            .write_to_device_chw(&queue, src)
            .and_then(|()| device.read_from_device_chw(&queue, &mut dst));
        if let Err(e) = result {
            error!("{e}");
            exit(1)
        }
        let time = time.elapsed();

        let err = src
            .iter()
            .zip(&dst)
            .map(|(&x, &y)| (u16::from_f32(x).to_f32() - y).abs())
            .fold(0f32, f32::max);
        info!(
            "{} channels padded to {}, round trip in {time:?}, max error vs fp16 = {err}",
            device.channels(),
            device.padded_channels(),
        );
        if err != 0. {
            error!("device read back mismatches host data");
            exit(1)
        }
    }
}
