//! Process supervision for the `standup` demo stack.
//!
//! The [`Supervisor`] launches each service described by a
//! [`ServiceCatalogue`](standup_config::ServiceCatalogue), persists a
//! [`ProcessRecord`] per service through the [`ProcessStore`], and polls a
//! [`HealthProbe`] with bounded backoff until the service reports ready.
//! Because every CLI invocation is a fresh process, the records on disk are
//! the only memory of what an earlier `start` left running; `stop` and
//! `status` reconcile those records with the live process table.
//!
//! Host interaction sits behind two seams so tests can substitute fakes:
//! [`ProcessControl`] for spawning and signalling, and [`HealthProbe`] for
//! readiness checks.

mod cancel;
mod control;
mod error;
mod files;
mod probe;
mod record;
mod report;
mod reporter;
mod store;
mod supervisor;
pub mod telemetry;

#[cfg(test)]
mod supervisor_tests;
#[cfg(test)]
mod test_support;

pub use cancel::{CancellationError, CancellationToken};
pub use control::{ControlError, ProcessControl, SystemControl, Termination};
pub use error::{StoreError, SupervisorError};
pub use probe::{HealthProbe, ProbeError, ProbeWatchdog, ReadinessResult, SystemProbe};
pub use record::{
    ProcessHandle, ProcessRecord, RECORD_SCHEMA_VERSION, ServiceState, unix_millis,
};
pub use report::{Report, ReportError, ReportFormat, render};
pub use reporter::{LifecycleReporter, StructuredLifecycleReporter};
pub use store::ProcessStore;
pub use supervisor::{ServiceStatus, StartOutcome, StopOutcome, Supervisor};
