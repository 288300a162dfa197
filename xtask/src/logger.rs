use colored::{Color, Colorize};
use flexi_logger::DeferredNow;
use log::{Level, Record};

/// 初始化日志，`RUST_LOG` 优先
pub(crate) fn init(verbose: u8) {
    flexi_logger::Logger::try_with_env_or_str(default_spec(verbose))
        .unwrap()
        .format(log_format)
        .start()
        .unwrap();
}

/// 按 `-v` 次数选择默认日志级别
fn default_spec(verbose: u8) -> &'static str {
    // <https://docs.rs/flexi_logger/0.30.1/flexi_logger/struct.LogSpecification.html>
    match verbose {
        0 => "warn, xtask=info, tensor_blob=info",
        1 => "warn, xtask=debug, tensor_blob=debug",
        _ => "warn, xtask=trace, tensor_blob=trace",
    }
}

fn log_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    let color = match record.level() {
        Level::Error => Color::Red,
        Level::Warn => Color::Yellow,
        Level::Info => Color::Green,
        Level::Debug => Color::BrightCyan,
        Level::Trace => Color::BrightBlack,
    };
    write!(
        w,
        "{} {:<5} [{}] {}",
        now.format_rfc3339().color(Color::BrightBlack),
        record.level().to_string().color(color),
        record.module_path().unwrap_or("<unnamed>"),
        record.args().to_string().color(color),
    )?;
    if record.level() == Level::Error
        && let (Some(file), Some(line)) = (record.file(), record.line())
    {
        write!(w, " {}", format!("({file}:{line})").color(Color::BrightBlack))?
    }
    Ok(())
}
