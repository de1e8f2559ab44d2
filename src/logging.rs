// src/logging.rs

//! Logging setup for `flowdispatch`.
//!
//! The filter is chosen in this order:
//! 1. `--log-level` on the command line
//! 2. `FLOWDISPATCH_LOG`, which takes full `EnvFilter` directives
//!    (e.g. `flowdispatch::engine=debug,info`)
//! 3. `info`
//!
//! Events go to stderr so stdout carries only the dispatch summary. Thread
//! names are kept because cancel calls run on the `flowdispatch-cancel-*`
//! workers rather than on the Tokio runtime.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "FLOWDISPATCH_LOG";

const DEFAULT_DIRECTIVES: &str = "info";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let directives = filter_directives(cli_level, std::env::var(LOG_ENV_VAR).ok());
    let filter = EnvFilter::try_new(&directives)
        .with_context(|| format!("invalid log filter '{directives}'"))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

/// Resolve the filter directives from the CLI level and the raw value of
/// [`LOG_ENV_VAR`].
pub fn filter_directives(cli_level: Option<LogLevel>, env_value: Option<String>) -> String {
    if let Some(level) = cli_level {
        return level.as_directive().to_string();
    }
    env_value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIVES.to_string())
}
