use crate::{Dtype, load_blob, read_record};
use log::{error, info};
use std::{fs::File, io::BufWriter, path::PathBuf, process::exit};

#[derive(Args)]
pub struct ConvertArgs {
    /// source blob record in json
    input: PathBuf,
    /// destination blob record
    output: PathBuf,
    /// target encoding, `f16` writes `data_fp16`
    #[clap(long, value_enum, default_value = "f16")]
    to: Dtype,
}

impl ConvertArgs {
    pub fn convert(self) {
        let Self { input, output, to } = self;
        let record = read_record(&input);
        let converted = match to {
            Dtype::F32 => load_blob::<f32>(&record).to_record(),
            Dtype::F16 => load_blob::<u16>(&record).to_record(),
            Dtype::U8 => {
                error!("byte storage has no serialized encoding");
                exit(1)
            }
        };

        let file = File::create(&output).unwrap_or_else(|e| {
            error!("failed to create {}: {e}", output.display());
            exit(1)
        });
        if let Err(e) = serde_json::to_writer(BufWriter::new(file), &converted) {
            error!("failed to write {}: {e}", output.display());
            exit(1)
        }
        info!(
            "{} -> {} as {to:?} ({} values)",
            input.display(),
            output.display(),
            converted.shape().data_size(),
        )
    }
}
