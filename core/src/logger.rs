use std::str::FromStr;

use tracing::{debug, level_filters::LevelFilter};
use tracing_subscriber::{
    fmt::format::{Format, Writer},
    EnvFilter,
};

/// Overrides the level per module, e.g. `BULKSYNC_LOG=bulksync::bulk=debug`.
pub const LOG_ENV_VARIABLE: &str = "BULKSYNC_LOG";

struct CustomTimer;

impl tracing_subscriber::fmt::time::FormatTime for CustomTimer {
    fn format_time(&self, writer: &mut Writer<'_>) -> std::fmt::Result {
        let now = chrono::Local::now();
        write!(writer, "{} - {}", now.format("%d %B"), now.format("%H:%M:%S%.6f"))
    }
}

fn env_filter(log_level: LevelFilter) -> EnvFilter {
    EnvFilter::builder().with_default_directive(log_level.into()).with_env_var(LOG_ENV_VARIABLE).from_env_lossy()
}

pub fn setup_logger(log_level: LevelFilter) {
    let format = Format::default().with_timer(CustomTimer).with_level(true).with_target(false);

    let subscriber =
        tracing_subscriber::fmt().with_env_filter(env_filter(log_level)).event_format(format).finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        debug!("Logger has already been set up, continuing...");
    }
}

pub fn setup_info_logger() {
    setup_logger(LevelFilter::INFO);
}

/// Logger writing through the test harness so output is only shown for failing tests.
pub fn setup_test_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(LevelFilter::DEBUG))
        .with_timer(CustomTimer)
        .with_test_writer()
        .try_init();
}

/// Parses `error`, `warn`, `info`, `debug`, `trace` or `off`.
pub fn parse_log_level(value: &str) -> Option<LevelFilter> {
    LevelFilter::from_str(value.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug"), Some(LevelFilter::DEBUG));
        assert_eq!(parse_log_level(" WARN "), Some(LevelFilter::WARN));
        assert_eq!(parse_log_level("off"), Some(LevelFilter::OFF));
        assert_eq!(parse_log_level("loud"), None);
    }

    #[test]
    fn test_setup_is_repeatable() {
        setup_test_logger();
        setup_test_logger();
        setup_info_logger();
    }
}
