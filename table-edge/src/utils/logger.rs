//! Logging Infrastructure
//!
//! Structured logging for the service embedding the core.

use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize the logger at `info`
pub fn init_logger() {
    init_logger_with_file(None, None);
}

/// Initialize the logger with optional daily-rolling file output
///
/// `log_level` accepts any `EnvFilter` directive (`info`,
/// `table_edge=debug,warn`, ...). Safe to call more than once; later calls
/// are ignored.
pub fn init_logger_with_file(log_level: Option<&str>, log_dir: Option<&Path>) {
    let filter = EnvFilter::try_new(log_level.unwrap_or("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(true);

    if let Some(dir) = log_dir
        && dir.exists()
    {
        let file_appender = tracing_appender::rolling::daily(dir, "table-edge");
        let _ = builder.with_writer(file_appender).try_init();
        return;
    }

    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init_logger();
        init_logger_with_file(Some("not a [valid filter"), None);
        tracing::info!("logger initialized twice without panicking");
    }
}
