use std::{path::Path, sync::LazyLock};

use anyhow::Result;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::{
    fmt::{format::FmtSpan, writer::MakeWriterExt},
    EnvFilter,
};

const LOG_DIR: &str = "logs";
const KEPT_LOG_FILES: usize = 5;
const DEFAULT_LEVEL: &str = "debug";

/// Which process is writing. The monitor and one-shot commands keep separate log files so a
/// long-running `serve` isn't interleaved with `history` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Cli,
    Monitor,
}

impl LogTarget {
    fn file_prefix(self) -> &'static str {
        match self {
            LogTarget::Cli => "cli",
            LogTarget::Monitor => "monitor",
        }
    }
}

/// Level directive for the crate: an explicit level wins, then `RUST_LOG`, then debug.
fn resolve_level(explicit: Option<LevelFilter>, from_env: Option<String>) -> String {
    explicit
        .map(|v| v.to_string().to_lowercase())
        .or(from_env.filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_LEVEL.into())
}

fn crate_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!(
        "{}={level}",
        env!("CARGO_PKG_NAME").replace("-", "_"),
    ))
}

/// Writes logs to a daily rolling file under `<application_data_path>/logs`. With `console` they
/// are mirrored to stderr; stdout is reserved for command output.
pub fn enable_logging(
    target: LogTarget,
    application_data_path: &Path,
    log_level: Option<LevelFilter>,
    console: bool,
) -> Result<()> {
    let appender = tracing_appender::rolling::Builder::new()
        .rotation(Rotation::DAILY)
        .max_log_files(KEPT_LOG_FILES)
        .filename_prefix(target.file_prefix())
        .build(application_data_path.join(LOG_DIR))?;

    let stderr = std::io::stderr.with_filter(move |_| console);
    let level = resolve_level(log_level, std::env::var("RUST_LOG").ok());

    tracing_subscriber::fmt()
        .with_env_filter(crate_filter(&level))
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(stderr.and(appender))
        .with_ansi(console)
        .pretty()
        .init();
    Ok(())
}

pub static TEST_LOGGING: LazyLock<()> = LazyLock::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .pretty()
        .try_init();
});
