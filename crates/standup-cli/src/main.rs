//! CLI entrypoint for the `standup` demo-stack supervisor.
//!
//! The binary delegates to [`standup_cli::run`], which resolves
//! configuration, installs telemetry, and drives the requested lifecycle
//! command against the local service stack.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    standup_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
