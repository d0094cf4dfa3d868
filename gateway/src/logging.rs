use spdlog::{Level, LevelFilter};

/// Sets the default logger's level filter from a textual level name.
/// Unrecognized names fall back to `info` rather than failing startup.
pub fn init(level: &str) {
    let level = match level.to_ascii_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "warn" => Level::Warn,
        "error" => Level::Error,
        _ => Level::Info,
    };
    spdlog::default_logger().set_level_filter(LevelFilter::MoreSevereEqual(level));
}
