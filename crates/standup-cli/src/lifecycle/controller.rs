//! High-level orchestration for lifecycle commands.
//!
//! Builds a [`Supervisor`] over the real host and maps its outcomes onto
//! terminal output.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use standup_config::ServiceCatalogue;
use standup_supervisor::{
    CancellationToken, ProbeWatchdog, StartOutcome, StopOutcome, Supervisor, SystemControl,
    SystemProbe, render,
};

use super::error::LifecycleError;
use super::types::{LifecycleCommand, LifecycleInvocation, LifecycleOutput};

/// Slack allowed beyond a check's own timeout before the watchdog gives up.
const PROBE_GRACE: Duration = Duration::from_secs(1);

/// Production lifecycle controller.
#[derive(Debug, Default)]
pub(crate) struct SystemLifecycle;

impl SystemLifecycle {
    pub(crate) fn handle<W: Write, E: Write>(
        &mut self,
        invocation: LifecycleInvocation,
        catalogue: ServiceCatalogue,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        let supervisor = build_supervisor(catalogue)?;
        match invocation.command {
            LifecycleCommand::Start => {
                let cancel = CancellationToken::new();
                cancel.install_signal_handlers()?;
                self.start(&invocation, &supervisor.with_cancellation(cancel), output)
            }
            LifecycleCommand::Stop => self.stop(&invocation, &supervisor, output),
            LifecycleCommand::Status => self.status(&invocation, &supervisor, output),
        }
    }

    fn start<W: Write, E: Write>(
        &mut self,
        invocation: &LifecycleInvocation,
        supervisor: &Supervisor,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        let started = match &invocation.service {
            Some(name) => supervisor
                .start(name)
                .map(|outcome| vec![(name.clone(), outcome)]),
            None => supervisor.start_all(),
        };
        let outcomes = match started {
            Ok(outcomes) => outcomes,
            Err(error) => {
                let log = error
                    .service()
                    .and_then(|name| supervisor.catalogue().get(name))
                    .map(|service| service.log_path.clone());
                if let Some(log) = log {
                    output.stderr_line(format_args!("service output is logged to {log}"))?;
                }
                return Err(error.into());
            }
        };
        for (name, outcome) in outcomes {
            match outcome {
                StartOutcome::AlreadyRunning => {
                    output.stdout_line(format_args!("{name}: already running"))?;
                }
                StartOutcome::Ready { attempts, elapsed } => {
                    output.stdout_line(format_args!(
                        "{name}: ready after {attempts} attempt(s) in {} ms",
                        elapsed.as_millis()
                    ))?;
                }
            }
        }
        Ok(ExitCode::SUCCESS)
    }

    fn stop<W: Write, E: Write>(
        &mut self,
        invocation: &LifecycleInvocation,
        supervisor: &Supervisor,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        let outcomes = match &invocation.service {
            Some(name) => vec![(name.clone(), supervisor.stop(name)?)],
            None => supervisor.stop_all()?,
        };
        for (name, outcome) in outcomes {
            match outcome {
                StopOutcome::NotRunning => {
                    output.stdout_line(format_args!("{name}: not running"))?;
                }
                StopOutcome::Stopped(termination) => {
                    output.stdout_line(format_args!("{name}: stopped ({termination})"))?;
                }
                StopOutcome::DiscardedCorruptRecord => {
                    output.stdout_line(format_args!(
                        "{name}: discarded unreadable process record"
                    ))?;
                }
            }
        }
        Ok(ExitCode::SUCCESS)
    }

    fn status<W: Write, E: Write>(
        &mut self,
        invocation: &LifecycleInvocation,
        supervisor: &Supervisor,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        let statuses = match &invocation.service {
            Some(name) => vec![supervisor.status_of(supervisor.catalogue().require(name)?)?],
            None => supervisor.status()?,
        };
        let report = render(&statuses, invocation.format)?;
        output.stdout_line(format_args!("{}", report.text))?;
        for record in supervisor.stray_records()? {
            output.stderr_line(format_args!(
                "note: {} holds a record for unmanaged service '{}' ({})",
                supervisor.store().directory(),
                record.service,
                record.handle
            ))?;
        }
        if report.exit_code == 0 {
            return Ok(ExitCode::SUCCESS);
        }
        match report.first_failure {
            Some(service) => Err(LifecycleError::NotReady { service }),
            None => Ok(ExitCode::from(report.exit_code)),
        }
    }
}

fn build_supervisor(catalogue: ServiceCatalogue) -> Result<Supervisor, LifecycleError> {
    let probe = ProbeWatchdog::new(Arc::new(SystemProbe::new()?), PROBE_GRACE);
    let control = SystemControl::new(catalogue.container_runtime());
    Ok(Supervisor::new(catalogue, Arc::new(probe), Arc::new(control)))
}
