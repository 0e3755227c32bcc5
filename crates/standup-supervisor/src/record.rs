//! Persisted per-service process records.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use strum::Display;

use standup_config::ServiceDescriptor;

/// Version written into every new record.
pub const RECORD_SCHEMA_VERSION: u32 = 1;

/// Lifecycle state stored alongside a service handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServiceState {
    /// Launched, readiness not yet confirmed.
    Starting,
    /// The most recent readiness probe succeeded.
    Ready,
    /// Readiness was not reached within the retry window.
    Failed,
    /// Shut down on request.
    Stopped,
    /// The process vanished without being stopped.
    Crashed,
    /// State written by a newer release or otherwise unrecognised.
    #[serde(other)]
    Unknown,
}

/// How to reach a launched service again in a later invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessHandle {
    /// Leader of a detached process group.
    Pid {
        /// Operating system process id.
        pid: u32,
        /// Start time reported by the OS in Unix seconds. A live process
        /// with a different start time has reused the pid.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_time: Option<u64>,
    },
    /// Container managed through the runtime CLI.
    Container {
        /// Container name or id.
        id: String,
    },
    /// Not launched by this tool.
    External,
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pid { pid, .. } => write!(formatter, "pid {pid}"),
            Self::Container { id } => write!(formatter, "container {id}"),
            Self::External => formatter.write_str("external"),
        }
    }
}

/// On-disk record describing one managed service.
///
/// Fields added after schema version 1 carry serde defaults and unknown
/// fields are ignored, so older and newer releases can share a state
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Format version of this record.
    pub schema_version: u32,
    /// Service the record belongs to.
    pub service: String,
    /// Handle used for liveness checks and shutdown.
    pub handle: ProcessHandle,
    /// Unix milliseconds when the launch was confirmed.
    pub started_at: u64,
    /// Last known lifecycle state.
    pub state: ServiceState,
    /// Unix milliseconds of the last state change.
    pub updated_at: u64,
    /// Unix milliseconds of the successful readiness probe.
    #[serde(default)]
    pub ready_at: Option<u64>,
    /// Probe attempts used by the last readiness wait.
    #[serde(default)]
    pub attempts: u32,
    /// Detail reported by the last probe.
    #[serde(default)]
    pub last_detail: Option<String>,
    /// Log file receiving the service output.
    #[serde(default)]
    pub log_path: Option<Utf8PathBuf>,
}

impl ProcessRecord {
    /// Builds the record written once a launch has been confirmed.
    #[must_use]
    pub fn starting(service: &ServiceDescriptor, handle: ProcessHandle) -> Self {
        let now = unix_millis();
        Self {
            schema_version: RECORD_SCHEMA_VERSION,
            service: service.name.clone(),
            handle,
            started_at: now,
            state: ServiceState::Starting,
            updated_at: now,
            ready_at: None,
            attempts: 0,
            last_detail: None,
            log_path: Some(service.log_path.clone()),
        }
    }

    /// Whether a newer release wrote this record.
    #[must_use]
    pub fn is_from_newer_release(&self) -> bool {
        self.schema_version > RECORD_SCHEMA_VERSION
    }

    /// Moves the record to `state`, stamping the update time.
    pub fn transition(&mut self, state: ServiceState) {
        self.state = state;
        self.updated_at = unix_millis();
    }

    /// Marks the record ready after a successful probe.
    pub fn mark_ready(&mut self, attempts: u32, observed_at: u64, detail: String) {
        self.transition(ServiceState::Ready);
        self.ready_at = Some(observed_at);
        self.attempts = attempts;
        self.last_detail = Some(detail);
    }

    /// Records the outcome of a wait that did not reach readiness.
    pub fn mark_unready(&mut self, state: ServiceState, attempts: u32, detail: String) {
        self.transition(state);
        self.ready_at = None;
        self.attempts = attempts;
        self.last_detail = Some(detail);
    }
}

/// Current wall-clock time in Unix milliseconds.
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}
