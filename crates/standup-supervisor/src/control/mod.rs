//! Launching, inspecting and terminating service processes.

use std::io;
use std::time::Duration;

use camino::Utf8PathBuf;
use nix::errno::Errno;
use strum::Display;
use thiserror::Error;

use standup_config::{LaunchSpec, ServiceDescriptor};

use crate::record::ProcessHandle;

mod container;
mod process;

pub(crate) const CONTROL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::control");

/// How a termination request concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Termination {
    /// Nothing was running.
    AlreadyGone,
    /// Exited within the grace period.
    Graceful,
    /// Required a forced kill.
    Forced,
    /// Not owned by this tool; left untouched.
    Detached,
}

/// Errors raised by [`ProcessControl`] implementations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The log file could not be prepared.
    #[error("failed to open log file '{path}': {source}")]
    LogFile {
        /// Log file path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The program could not be spawned.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A recorded pid cannot name a real process.
    #[error("recorded pid {pid} is not a valid process id")]
    InvalidPid {
        /// Offending pid.
        pid: u32,
    },
    /// Delivering a signal or checking a process failed.
    #[error("failed to signal process {pid}: {source}")]
    Signal {
        /// Target pid.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// The container runtime binary could not be executed.
    #[error("failed to run container runtime '{runtime}': {source}")]
    RuntimeUnavailable {
        /// Runtime executable.
        runtime: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The container runtime reported a failure.
    #[error("'{runtime} {action}' failed for container '{container}': {detail}")]
    Runtime {
        /// Runtime executable.
        runtime: String,
        /// Sub-command that failed.
        action: String,
        /// Container name.
        container: String,
        /// Runtime stderr or exit status.
        detail: String,
    },
    /// A container must be created but no image is configured.
    #[error("container '{container}' does not exist and no image is configured")]
    MissingImage {
        /// Container name.
        container: String,
    },
}

/// Operations the supervisor needs from the host to manage services.
pub trait ProcessControl: Send + Sync {
    /// Launches `service` and returns a handle once the launch is confirmed.
    fn launch(&self, service: &ServiceDescriptor) -> Result<ProcessHandle, ControlError>;

    /// Whether the process behind `handle` is still running.
    fn is_alive(&self, handle: &ProcessHandle) -> Result<bool, ControlError>;

    /// Requests a graceful stop, escalating once `grace` elapses.
    fn terminate(
        &self,
        handle: &ProcessHandle,
        grace: Duration,
    ) -> Result<Termination, ControlError>;
}

/// [`ProcessControl`] backed by real processes and a docker-compatible CLI.
#[derive(Debug, Clone)]
pub struct SystemControl {
    runtime: String,
}

impl SystemControl {
    /// Builds a controller using `runtime` for container services.
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
        }
    }
}

impl ProcessControl for SystemControl {
    fn launch(&self, service: &ServiceDescriptor) -> Result<ProcessHandle, ControlError> {
        match &service.launch {
            LaunchSpec::Process { program, args } => {
                let pid = process::spawn_detached(service, program, args)?;
                Ok(ProcessHandle::Pid {
                    pid,
                    start_time: process::start_time(pid),
                })
            }
            LaunchSpec::Container { name, image, args } => {
                container::ensure_running(&self.runtime, name, image.as_deref(), args)?;
                Ok(ProcessHandle::Container { id: name.clone() })
            }
            LaunchSpec::External => Ok(ProcessHandle::External),
        }
    }

    fn is_alive(&self, handle: &ProcessHandle) -> Result<bool, ControlError> {
        match handle {
            ProcessHandle::Pid { pid, start_time } => process::is_alive(*pid, *start_time),
            ProcessHandle::Container { id } => {
                Ok(container::inspect(&self.runtime, id)? == container::Presence::Running)
            }
            ProcessHandle::External => Ok(true),
        }
    }

    fn terminate(
        &self,
        handle: &ProcessHandle,
        grace: Duration,
    ) -> Result<Termination, ControlError> {
        match handle {
            ProcessHandle::Pid { pid, start_time } => {
                process::terminate(*pid, *start_time, grace)
            }
            ProcessHandle::Container { id } => container::stop(&self.runtime, id, grace),
            ProcessHandle::External => Ok(Termination::Detached),
        }
    }
}
