use colored::ColoredString;
use env_logger::Env;
use log::warn;
use std::io::Write;

/// Log target of the JSON lines emitted for every size delta.
pub const SIZE_DELTA_TARGET: &str = "size_delta";

/// Initializes the logger with filter `info` unless `RUST_LOG` says otherwise.
///
/// Size delta records are written as bare JSON lines so that the log output stays
/// machine readable; every other record is prefixed with time, level and `name`.
pub fn init_logging(name: ColoredString) {
    if env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(move |buf, record| {
            if record.target() == SIZE_DELTA_TARGET {
                return writeln!(buf, "{}", record.args());
            }
            let t = chrono::Utc::now();
            let t = format!("{}", t.format("%Y-%m-%d %H:%M:%S"));
            let level_style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "{} {level_style}{}{level_style:#} {} {}",
                t,
                record.level(),
                name,
                record.args()
            )
        })
        .try_init()
        .is_err()
    {
        warn!("Unable to initialize logging -- has it already been initialized?")
    }
}
