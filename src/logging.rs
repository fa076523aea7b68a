//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `-v` / `-q` flags
//! 3. `DEO_LOG` environment variable (a level or a full filter directive)
//! 4. default to `info`
//!
//! Logs go to stderr; stdout carries task output only.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use crate::cli::LogLevel;

/// Environment variable read when no level is given on the command line
pub const LOG_ENV: &str = "DEO_LOG";

/// Initialise the global logging subscriber.
///
/// `verbosity` is positive for `-v` and negative for `-q`.
pub fn init_logging(cli_level: Option<LogLevel>, verbosity: i8) -> Result<()> {
    let filter = build_filter(cli_level, verbosity, std::env::var(LOG_ENV).ok());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to initialise logging: {}", e))
}

fn build_filter(cli_level: Option<LogLevel>, verbosity: i8, env: Option<String>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(level.as_str());
    }
    match verbosity {
        v if v > 1 => return EnvFilter::new("trace"),
        1 => return EnvFilter::new("debug"),
        v if v < 0 => return EnvFilter::new("warn"),
        _ => {}
    }
    env.and_then(|s| EnvFilter::try_new(s.trim()).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}
