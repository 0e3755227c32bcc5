//! Start, stop and status orchestration across the service catalogue.
//!
//! Per-service state machine, persisted in [`ProcessRecord`]s:
//!
//! ```text
//! (none) -> Starting -> Ready
//!           Starting -> Failed
//!           Ready    -> Crashed
//! Ready | Failed | Crashed -> (record removed by stop)
//! ```
//!
//! A record only becomes `Ready` after a successful probe. Crashed services
//! are never relaunched implicitly; `stop` clears them first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use tracing::warn;

use standup_config::{LaunchSpec, ServiceCatalogue, ServiceDescriptor, ServiceKind};

use crate::cancel::CancellationToken;
use crate::control::{ProcessControl, Termination};
use crate::error::{StoreError, SupervisorError};
use crate::probe::{HealthProbe, ReadinessResult};
use crate::record::{ProcessHandle, ProcessRecord, ServiceState};
use crate::reporter::{LifecycleReporter, StructuredLifecycleReporter};
use crate::store::ProcessStore;

const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");

/// Result of a successful start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The service was already ready and alive; nothing was done.
    AlreadyRunning,
    /// Readiness was confirmed by this request.
    Ready {
        /// Probe attempts used.
        attempts: u32,
        /// Time spent polling.
        elapsed: Duration,
    },
}

/// Result of a successful stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No record existed.
    NotRunning,
    /// The recorded process was handled and the record removed.
    Stopped(Termination),
    /// The record could not be parsed and was discarded.
    DiscardedCorruptRecord,
}

/// Point-in-time view of one service for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    /// Service name.
    pub service: String,
    /// Service role.
    pub kind: ServiceKind,
    /// Recorded state after reconciliation; `Stopped` when nothing is recorded.
    pub state: ServiceState,
    /// Recorded handle, if any.
    pub handle: Option<ProcessHandle>,
    /// Liveness of the recorded handle, if there is one.
    pub alive: Option<bool>,
    /// Rendered readiness target.
    pub target: String,
    /// Unix milliseconds of the recorded launch.
    pub started_at: Option<u64>,
    /// Log file receiving the service output.
    pub log_path: Utf8PathBuf,
    /// Fresh probe result.
    pub probe: ReadinessResult,
}

/// Drives services through their lifecycle.
pub struct Supervisor {
    catalogue: ServiceCatalogue,
    store: ProcessStore,
    probe: Arc<dyn HealthProbe>,
    control: Arc<dyn ProcessControl>,
    reporter: Arc<dyn LifecycleReporter>,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Builds a supervisor persisting records under the catalogue's state
    /// directory.
    pub fn new(
        catalogue: ServiceCatalogue,
        probe: Arc<dyn HealthProbe>,
        control: Arc<dyn ProcessControl>,
    ) -> Self {
        let store = ProcessStore::new(catalogue.state_dir().clone());
        Self {
            catalogue,
            store,
            probe,
            control,
            reporter: Arc::new(StructuredLifecycleReporter::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the lifecycle reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn LifecycleReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Uses `cancel` to abort readiness waits.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Services managed by this supervisor.
    #[must_use]
    pub fn catalogue(&self) -> &ServiceCatalogue {
        &self.catalogue
    }

    /// Record store used by this supervisor.
    #[must_use]
    pub fn store(&self) -> &ProcessStore {
        &self.store
    }

    /// Starts `name` after its dependencies, returning once it is ready.
    pub fn start(&self, name: &str) -> Result<StartOutcome, SupervisorError> {
        let service = self.catalogue.require(name)?;
        for dependency in self.catalogue.dependency_closure(name)? {
            self.ensure_ready(dependency)
                .map_err(|source| SupervisorError::DependencyFailed {
                    service: service.name.clone(),
                    dependency: dependency.name.clone(),
                    source: Box::new(source),
                })?;
        }
        self.ensure_ready(service)
    }

    /// Starts every service in declaration order, failing fast.
    pub fn start_all(&self) -> Result<Vec<(String, StartOutcome)>, SupervisorError> {
        let mut outcomes = Vec::new();
        for service in self.catalogue.services() {
            outcomes.push((service.name.clone(), self.start(&service.name)?));
        }
        Ok(outcomes)
    }

    /// Stops `name` and removes its record. Stopping a service with no
    /// record, or whose process is already gone, succeeds.
    pub fn stop(&self, name: &str) -> Result<StopOutcome, SupervisorError> {
        let service = self.catalogue.require(name)?;
        let record = match self.store.load(&service.name) {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.reporter.nothing_to_stop(service);
                return Ok(StopOutcome::NotRunning);
            }
            Err(StoreError::Corrupt { path, source }) => {
                warn!(
                    target: SUPERVISOR_TARGET,
                    service = %service.name,
                    file = %path,
                    error = %source,
                    "discarding corrupt process record; any process it named is left running"
                );
                self.store.delete(&service.name)?;
                return Ok(StopOutcome::DiscardedCorruptRecord);
            }
            Err(other) => return Err(other.into()),
        };

        let terminated = self
            .control
            .terminate(&record.handle, self.catalogue.stop_grace());
        self.store.delete(&service.name)?;
        let termination = terminated.map_err(|source| SupervisorError::Signal {
            service: service.name.clone(),
            source,
        })?;
        self.reporter.stopped(service, termination);
        Ok(StopOutcome::Stopped(termination))
    }

    /// Stops every service in reverse declaration order.
    ///
    /// Every service is attempted even when an earlier one fails; the first
    /// failure is returned after all attempts.
    pub fn stop_all(&self) -> Result<Vec<(String, StopOutcome)>, SupervisorError> {
        let mut outcomes = Vec::new();
        let mut first_failure = None;
        for service in self.catalogue.services().iter().rev() {
            match self.stop(&service.name) {
                Ok(outcome) => outcomes.push((service.name.clone(), outcome)),
                Err(error) => {
                    warn!(
                        target: SUPERVISOR_TARGET,
                        service = %service.name,
                        error = %error,
                        "stop failed; continuing with remaining services"
                    );
                    first_failure.get_or_insert(error);
                }
            }
        }
        match first_failure {
            Some(error) => Err(error),
            None => Ok(outcomes),
        }
    }

    /// Probes every service once, reconciling records with what is running.
    pub fn status(&self) -> Result<Vec<ServiceStatus>, SupervisorError> {
        self.catalogue
            .services()
            .iter()
            .map(|service| self.status_of(service))
            .collect()
    }

    /// Readable records in the state directory for services outside the
    /// catalogue.
    pub fn stray_records(&self) -> Result<Vec<ProcessRecord>, SupervisorError> {
        let mut records = self.store.list()?;
        records.retain(|record| self.catalogue.get(&record.service).is_none());
        Ok(records)
    }

    /// Probes one service once, reconciling its record.
    pub fn status_of(&self, service: &ServiceDescriptor) -> Result<ServiceStatus, SupervisorError> {
        let record = match self.store.load(&service.name) {
            Ok(record) => record,
            Err(StoreError::Corrupt { path, source }) => {
                warn!(
                    target: SUPERVISOR_TARGET,
                    service = %service.name,
                    file = %path,
                    error = %source,
                    "process record is corrupt"
                );
                let probe = self.probe.check(service, 1);
                return Ok(self.snapshot(service, ServiceState::Unknown, None, None, probe));
            }
            Err(other) => return Err(other.into()),
        };
        let probe = self.probe.check(service, 1);
        let Some(mut record) = record else {
            return Ok(self.snapshot(service, ServiceState::Stopped, None, None, probe));
        };

        let alive = self.is_alive(service, &record.handle)?;
        if !alive && matches!(record.state, ServiceState::Ready | ServiceState::Starting) {
            record.mark_unready(
                ServiceState::Crashed,
                record.attempts,
                format!("{} is no longer running", record.handle),
            );
            self.store.save(&record)?;
        } else if alive
            && probe.success
            && matches!(record.state, ServiceState::Starting | ServiceState::Failed)
        {
            record.mark_ready(record.attempts, probe.observed_at, probe.detail.clone());
            self.store.save(&record)?;
        }
        let state = record.state;
        let started_at = record.started_at;
        Ok(self.snapshot(
            service,
            state,
            Some((record.handle, started_at)),
            Some(alive),
            probe,
        ))
    }

    fn snapshot(
        &self,
        service: &ServiceDescriptor,
        state: ServiceState,
        recorded: Option<(ProcessHandle, u64)>,
        alive: Option<bool>,
        probe: ReadinessResult,
    ) -> ServiceStatus {
        let (handle, started_at) = recorded.unzip();
        ServiceStatus {
            service: service.name.clone(),
            kind: service.kind,
            state,
            handle,
            alive,
            target: service.readiness.target.to_string(),
            started_at,
            log_path: service.log_path.clone(),
            probe,
        }
    }

    fn is_alive(
        &self,
        service: &ServiceDescriptor,
        handle: &ProcessHandle,
    ) -> Result<bool, SupervisorError> {
        self.control
            .is_alive(handle)
            .map_err(|source| SupervisorError::Signal {
                service: service.name.clone(),
                source,
            })
    }

    fn ensure_ready(&self, service: &ServiceDescriptor) -> Result<StartOutcome, SupervisorError> {
        let result = self.bring_up(service);
        if let Err(error) = &result {
            self.reporter.start_failed(service, error);
        }
        result
    }

    fn bring_up(&self, service: &ServiceDescriptor) -> Result<StartOutcome, SupervisorError> {
        let existing = self
            .store
            .load(&service.name)?
            .filter(|record| record.state != ServiceState::Stopped);
        let Some(mut record) = existing else {
            return self.launch(service);
        };

        if !self.is_alive(service, &record.handle)? {
            let detail = format!(
                "{} recorded in {} is not running; run `stop` to clear it before starting again",
                record.handle, service.record_path
            );
            if record.state != ServiceState::Crashed {
                record.mark_unready(ServiceState::Crashed, record.attempts, detail.clone());
                self.store.save(&record)?;
            }
            return Err(SupervisorError::ProcessLost {
                service: service.name.clone(),
                detail,
            });
        }

        if record.state == ServiceState::Ready {
            self.reporter.already_running(service, &record.handle);
            return Ok(StartOutcome::AlreadyRunning);
        }
        self.reporter.resuming(service, &record.handle);
        self.await_ready(service, record)
    }

    fn launch(&self, service: &ServiceDescriptor) -> Result<StartOutcome, SupervisorError> {
        // A stray listener would satisfy the first probe on the new process's behalf.
        if service.launch != LaunchSpec::External
            && let Some(occupant) = self.probe.occupant(service)
        {
            return Err(SupervisorError::PortInUse {
                service: service.name.clone(),
                occupant,
            });
        }
        let handle = self
            .control
            .launch(service)
            .map_err(|source| SupervisorError::Launch {
                service: service.name.clone(),
                source,
            })?;
        let record = ProcessRecord::starting(service, handle);
        if let Err(error) = self.store.save(&record) {
            // Without a record the process could never be stopped again.
            if let Err(cleanup) = self
                .control
                .terminate(&record.handle, self.catalogue.stop_grace())
            {
                warn!(
                    target: SUPERVISOR_TARGET,
                    service = %service.name,
                    error = %cleanup,
                    "failed to stop untracked process"
                );
            }
            return Err(error.into());
        }
        self.reporter.launched(service, &record.handle);
        self.await_ready(service, record)
    }

    fn await_ready(
        &self,
        service: &ServiceDescriptor,
        mut record: ProcessRecord,
    ) -> Result<StartOutcome, SupervisorError> {
        let policy = self.catalogue.backoff();
        let started = Instant::now();
        let deadline = started + policy.total_timeout;
        let mut attempts = 0;
        let mut last_detail = String::from("no readiness probe was attempted");

        for attempt in 1..=policy.max_attempts {
            if attempt > 1 && Instant::now() >= deadline {
                break;
            }
            if self.cancel.is_cancelled() {
                return Err(self.interrupted(service));
            }
            let result = self.probe.check(service, attempt);
            self.reporter.probe_observed(&result);
            attempts = attempt;
            if result.success {
                let elapsed = started.elapsed();
                record.mark_ready(attempt, result.observed_at, result.detail);
                self.store.save(&record)?;
                self.reporter.ready(service, attempt, elapsed);
                return Ok(StartOutcome::Ready {
                    attempts: attempt,
                    elapsed,
                });
            }
            last_detail = result.detail;

            if !self.is_alive(service, &record.handle)? {
                let detail = format!(
                    "{} exited before becoming ready (last probe: {last_detail}); see {}",
                    record.handle, service.log_path
                );
                record.mark_unready(ServiceState::Crashed, attempt, last_detail);
                self.store.save(&record)?;
                return Err(SupervisorError::ProcessLost {
                    service: service.name.clone(),
                    detail,
                });
            }

            if attempt == policy.max_attempts {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            if self.cancel.sleep(policy.delay_after(attempt).min(remaining)) {
                return Err(self.interrupted(service));
            }
        }

        record.mark_unready(ServiceState::Failed, attempts, last_detail.clone());
        self.store.save(&record)?;
        Err(SupervisorError::ReadinessTimeout {
            service: service.name.clone(),
            attempts,
            elapsed: started.elapsed(),
            detail: last_detail,
        })
    }

    fn interrupted(&self, service: &ServiceDescriptor) -> SupervisorError {
        warn!(
            target: SUPERVISOR_TARGET,
            service = %service.name,
            "readiness wait interrupted; leaving the service running"
        );
        SupervisorError::Interrupted {
            service: service.name.clone(),
        }
    }
}
