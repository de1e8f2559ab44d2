// src/cli.rs

use clap::{Parser, ValueEnum};

/// Run a workflow graph through the dispatcher.
///
/// Nodes are read from a TOML workflow file, scheduled level by level and
/// handed to their configured executors. The process exits non-zero unless
/// every node completes.
#[derive(Debug, Clone, Parser)]
#[command(name = "flowdispatch", version, long_about = None)]
pub struct CliArgs {
    /// Workflow file to dispatch.
    #[arg(long, value_name = "PATH", default_value = "Workflow.toml")]
    pub workflow: String,

    /// Run under this dispatch id instead of a random UUID.
    #[arg(long, value_name = "ID")]
    pub dispatch_id: Option<String>,

    /// Overrides `FLOWDISPATCH_LOG`.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Validate the workflow and print its topological levels without
    /// dispatching anything.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
