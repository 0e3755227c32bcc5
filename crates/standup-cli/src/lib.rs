//! Command-line runtime for the `standup` demo-stack supervisor.
//!
//! The runtime parses arguments, resolves configuration from defaults, the
//! env-file, the process environment and `--set` overrides, installs
//! telemetry, and hands the requested lifecycle command to the supervisor.
//! IO streams and the environment source are injectable so tests can drive
//! the whole flow in-process.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use tracing::debug;

use standup_config::{LoggingSettings, ServiceCatalogue};
use standup_supervisor::telemetry;

mod cli;
mod config;
mod errors;
mod lifecycle;

use cli::Cli;
use config::{ConfigLoader, ProcessEnvironmentLoader};
pub(crate) use errors::AppError;
use lifecycle::{LifecycleInvocation, LifecycleOutput, SystemLifecycle};

const CLI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::cli");

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, stdout, stderr, &ProcessEnvironmentLoader)
}

pub(crate) fn run_with_loader<I, W, E, L>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    loader: &L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) if !error.use_stderr() => {
            // --help and --version
            let _ = write!(stdout, "{error}");
            return ExitCode::SUCCESS;
        }
        Err(error) => return report_failure(stderr, &AppError::CliUsage(error)),
    };
    match execute(cli, loader, stdout, stderr) {
        Ok(exit_code) => exit_code,
        Err(error) => report_failure(stderr, &error),
    }
}

fn execute<W: Write, E: Write, L: ConfigLoader>(
    cli: Cli,
    loader: &L,
    stdout: &mut W,
    stderr: &mut E,
) -> Result<ExitCode, AppError> {
    let snapshot = loader.load(&cli)?;
    let logging = LoggingSettings::from_snapshot(&snapshot).map_err(AppError::Configuration)?;
    telemetry::initialise(&logging)?;
    let catalogue = ServiceCatalogue::from_snapshot(&snapshot).map_err(AppError::Configuration)?;

    let invocation = LifecycleInvocation::new(cli.command, cli.output.into());
    debug!(
        target: CLI_TARGET,
        command = %invocation.command,
        service = invocation.service.as_deref().unwrap_or("all"),
        state_dir = %catalogue.state_dir(),
        "configuration resolved"
    );
    let mut output = LifecycleOutput::new(&mut *stdout, &mut *stderr);
    let mut lifecycle = SystemLifecycle;
    lifecycle
        .handle(invocation, catalogue, &mut output)
        .map_err(AppError::from)
}

fn report_failure<E: Write>(stderr: &mut E, error: &AppError) -> ExitCode {
    let _ = writeln!(stderr, "{error}");
    if let Some(service) = error.failing_service() {
        let _ = writeln!(stderr, "failed service: {service}");
    }
    ExitCode::FAILURE
}
