//! CLI argument definitions for `standup`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use standup_config::parse_assignment;
use standup_supervisor::ReportFormat;

/// Rendering used by `status`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Aligned columns.
    #[default]
    Human,
    /// A single JSON document.
    Json,
}

impl From<OutputFormat> for ReportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Human => Self::Human,
            OutputFormat::Json => Self::Json,
        }
    }
}

/// Starts, stops and inspects the local demo stack.
#[derive(Parser, Debug)]
#[command(name = "standup", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// `KEY=VALUE` file layered over the built-in defaults.
    ///
    /// When omitted, `config/demo.env` is read if it exists.
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) env_file: Option<PathBuf>,
    /// Overrides a configuration key; takes precedence over every other source.
    #[arg(
        long = "set",
        global = true,
        value_name = "KEY=VALUE",
        value_parser = parse_override
    )]
    pub(crate) overrides: Vec<(String, String)>,
    /// Controls how `status` renders its report.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub(crate) output: OutputFormat,
    #[command(subcommand)]
    pub(crate) command: LifecycleAction,
}

/// Lifecycle actions.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum LifecycleAction {
    /// Starts services and their dependencies, waiting for readiness.
    Start {
        /// Limits the action to one service.
        #[arg(long, value_name = "NAME")]
        service: Option<String>,
    },
    /// Stops services and removes their process records.
    Stop {
        /// Limits the action to one service.
        #[arg(long, value_name = "NAME")]
        service: Option<String>,
    },
    /// Probes services once and reports their state.
    Status {
        /// Limits the report to one service.
        #[arg(long, value_name = "NAME")]
        service: Option<String>,
    },
}

fn parse_override(raw: &str) -> Result<(String, String), String> {
    parse_assignment(raw).ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}
