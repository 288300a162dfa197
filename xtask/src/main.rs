mod chw;
mod convert;
mod inspect;
mod logger;

use clap::Parser;
use log::error;
use regex::Regex;
use std::{fs::File, io::BufReader, path::Path, process::exit, sync::LazyLock};
use tensor_blob::{Blob, BlobRecord, Element, LoadError, Shape};

#[macro_use]
extern crate clap;

fn main() {
    let Cli { verbose, command } = Cli::parse();
    logger::init(verbose);
    use Commands::*;
    match command {
        Inspect(args) => args.inspect(),
        Convert(args) => args.convert(),
        Chw(args) => args.chw(),
    }
}

#[derive(Parser)]
#[clap(name = "tensor-blob")]
#[clap(version, about, long_about = None)]
struct Cli {
    /// more log output, repeat for trace
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// show shape, encoding and value range of a blob record
    Inspect(inspect::InspectArgs),
    /// re-encode a blob record as fp32 or fp16
    Convert(convert::ConvertArgs),
    /// verify channel-padded device read back
    Chw(chw::ChwArgs),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
enum Dtype {
    F32,
    F16,
    U8,
}

/// 读取 json 格式的 blob 记录
fn read_record(path: &Path) -> BlobRecord {
    let file = File::open(path).unwrap_or_else(|e| {
        error!("failed to open {}: {e}", path.display());
        exit(1)
    });
    serde_json::from_reader(BufReader::new(file)).unwrap_or_else(|e| {
        error!("malformed blob record {}: {e}", path.display());
        exit(1)
    })
}

/// 加载 blob，致命错误直接终止进程
fn load_blob<T: Element>(record: &BlobRecord) -> Blob<T> {
    match Blob::load(record) {
        Ok(blob) => blob,
        Err(e @ LoadError::MixedEncoding { .. }) => {
            error!("fatal error: {e}, aborting...");
            exit(-1)
        }
        Err(e) => {
            error!("{e}");
            exit(1)
        }
    }
}

/// 从 "1x3x224x224"、"1,3,8,8" 等写法中解析 4 维形状
fn parse_shape(text: &str) -> Option<Shape> {
    static NUM_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());
    let dims = NUM_REGEX
        .find_iter(text)
        .map(|m| m.as_str().parse().ok())
        .collect::<Option<Vec<usize>>>()?;
    <[usize; 4]>::try_from(dims).ok().map(Shape::from)
}

#[cfg(test)]
mod test {
    use super::parse_shape;
    use tensor_blob::Shape;

    #[test]
    fn test_parse_shape() {
        assert_eq!(parse_shape("1x3x224x224"), Some(Shape::new(1, 3, 224, 224)));
        assert_eq!(parse_shape("[2, 8, 4, 4]"), Some(Shape::new(2, 8, 4, 4)));
        assert_eq!(parse_shape("1,3,8"), None);
        assert_eq!(parse_shape("1,2,3,4,5"), None);
    }
}
