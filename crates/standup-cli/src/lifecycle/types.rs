//! Lifecycle command types and output abstractions.

use std::fmt;
use std::io::Write;

use standup_supervisor::ReportFormat;

use super::LifecycleError;
use crate::cli::LifecycleAction;

/// Supported lifecycle commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleCommand {
    Start,
    Stop,
    Status,
}

impl fmt::Display for LifecycleCommand {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => formatter.write_str("start"),
            Self::Stop => formatter.write_str("stop"),
            Self::Status => formatter.write_str("status"),
        }
    }
}

/// Invocation payload forwarded from the CLI runtime.
#[derive(Debug, Clone)]
pub(crate) struct LifecycleInvocation {
    pub(crate) command: LifecycleCommand,
    /// Single service to act on; `None` means the whole stack.
    pub(crate) service: Option<String>,
    pub(crate) format: ReportFormat,
}

impl LifecycleInvocation {
    pub(crate) fn new(action: LifecycleAction, format: ReportFormat) -> Self {
        let (command, service) = match action {
            LifecycleAction::Start { service } => (LifecycleCommand::Start, service),
            LifecycleAction::Stop { service } => (LifecycleCommand::Stop, service),
            LifecycleAction::Status { service } => (LifecycleCommand::Status, service),
        };
        Self {
            command,
            service,
            format,
        }
    }
}

/// Line-oriented writers for command results (stdout) and diagnostics
/// (stderr). Every line is flushed as it is written.
pub(crate) struct LifecycleOutput<W: Write, E: Write> {
    pub(crate) stdout: W,
    pub(crate) stderr: E,
}

impl<W: Write, E: Write> LifecycleOutput<W, E> {
    pub(crate) fn new(stdout: W, stderr: E) -> Self {
        Self { stdout, stderr }
    }

    pub(crate) fn stdout_line(&mut self, args: fmt::Arguments<'_>) -> Result<(), LifecycleError> {
        write_line(&mut self.stdout, args)
    }

    pub(crate) fn stderr_line(&mut self, args: fmt::Arguments<'_>) -> Result<(), LifecycleError> {
        write_line(&mut self.stderr, args)
    }
}

fn write_line(sink: &mut impl Write, args: fmt::Arguments<'_>) -> Result<(), LifecycleError> {
    writeln!(sink, "{args}")
        .and_then(|()| sink.flush())
        .map_err(LifecycleError::Io)
}
