use anyhow::{Context, Result};
use flexi_logger::{Logger, LoggerHandle, WriteMode};
use log::debug;

pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Starts the stderr logger. `RUST_LOG` takes precedence over `level`.
/// The returned handle must stay alive for the life of the process.
pub fn init_logging(level: &str) -> Result<LoggerHandle> {
    let level = normalize_level(level)?;
    let handle = Logger::try_with_env_or_str(level)
        .with_context(|| format!("invalid log level `{level}`"))?
        .log_to_stderr()
        .write_mode(WriteMode::Direct)
        .start()
        .context("failed to start logger")?;
    debug!(
        "event=app_start version={} level={level}",
        env!("CARGO_PKG_VERSION")
    );
    Ok(handle)
}

fn normalize_level(level: &str) -> Result<&'static str> {
    match level.trim().to_ascii_lowercase().as_str() {
        "off" => Ok("off"),
        "error" => Ok("error"),
        "warn" | "warning" => Ok("warn"),
        "info" => Ok("info"),
        "debug" => Ok("debug"),
        "trace" => Ok("trace"),
        other => anyhow::bail!(
            "unsupported log level `{other}`; expected off, error, warn, info, debug or trace"
        ),
    }
}
