//! Fakes and descriptor builders shared by unit tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use camino::Utf8PathBuf;

use standup_config::{
    BackoffKind, BackoffPolicy, LaunchSpec, ProbeTarget, ReadinessCheck, ServiceCatalogue,
    ServiceDescriptor, ServiceKind, StackSettings, record_file_name,
};

use crate::control::{ControlError, ProcessControl, Termination};
use crate::probe::{HealthProbe, ReadinessResult};
use crate::record::ProcessHandle;

fn utf8(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).expect("test paths are UTF-8")
}

/// Descriptor probed over TCP and launched externally.
pub(crate) fn tcp_descriptor(name: &str, port: u16) -> ServiceDescriptor {
    ServiceDescriptor {
        name: name.to_owned(),
        kind: ServiceKind::Backend,
        launch: LaunchSpec::External,
        working_directory: Utf8PathBuf::from("."),
        environment: BTreeMap::new(),
        readiness: ReadinessCheck {
            target: ProbeTarget::Tcp {
                host: "127.0.0.1".into(),
                port,
            },
            timeout: Duration::from_millis(200),
        },
        depends_on: Vec::new(),
        log_path: Utf8PathBuf::from(format!("logs/{name}-dev.log")),
        record_path: Utf8PathBuf::from(record_file_name(name)),
    }
}

/// Descriptor launching `program` inside `dir`, logging under `dir/logs`.
pub(crate) fn process_descriptor(
    dir: &Path,
    name: &str,
    program: &str,
    args: &[&str],
) -> ServiceDescriptor {
    let root = utf8(dir);
    ServiceDescriptor {
        launch: LaunchSpec::Process {
            program: program.to_owned(),
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
        },
        working_directory: root.clone(),
        log_path: root.join("logs").join(format!("{name}-dev.log")),
        record_path: root.join("state").join(record_file_name(name)),
        ..tcp_descriptor(name, 1)
    }
}

/// Three-tier stack of process-launched services rooted at `dir`.
pub(crate) fn stack_catalogue(dir: &Path, backoff: BackoffPolicy) -> ServiceCatalogue {
    let mut services = Vec::new();
    let mut previous: Option<String> = None;
    for kind in ServiceKind::ALL {
        let name = kind.to_string();
        let mut service = process_descriptor(dir, &name, "sleep", &["30"]);
        service.kind = kind;
        service.depends_on = previous.iter().cloned().collect();
        previous = Some(name);
        services.push(service);
    }
    catalogue_of(dir, services, backoff)
}

/// Catalogue of `services` keeping its state under `dir/state`.
pub(crate) fn catalogue_of(
    dir: &Path,
    services: Vec<ServiceDescriptor>,
    backoff: BackoffPolicy,
) -> ServiceCatalogue {
    ServiceCatalogue::new(
        services,
        StackSettings {
            backoff,
            stop_grace: Duration::from_millis(200),
            state_dir: utf8(dir).join("state"),
            container_runtime: String::from("docker"),
        },
    )
    .expect("test services are acyclic")
}

/// Fast retry policy for tests.
pub(crate) fn quick_backoff(max_attempts: u32, total_timeout: Duration) -> BackoffPolicy {
    BackoffPolicy {
        max_attempts,
        total_timeout,
        interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(40),
        kind: BackoffKind::Fixed,
    }
}

/// Probe answering from a script, then repeating its fallback.
pub(crate) struct StubProbe {
    script: Mutex<VecDeque<bool>>,
    fallback: bool,
    calls: Mutex<Vec<(String, u32)>>,
}

impl StubProbe {
    pub(crate) fn always(success: bool) -> Self {
        Self::scripted(Vec::new(), success)
    }

    pub(crate) fn scripted(script: Vec<bool>, fallback: bool) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl HealthProbe for StubProbe {
    fn check(&self, service: &ServiceDescriptor, attempt: u32) -> ReadinessResult {
        self.calls
            .lock()
            .expect("calls lock")
            .push((service.name.clone(), attempt));
        let success = self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(self.fallback);
        let detail = if success { "stub ready" } else { "stub not ready" };
        ReadinessResult::new(&service.name, attempt, success, detail, Duration::ZERO)
    }
}

/// In-memory process table standing in for the host.
#[derive(Default)]
pub(crate) struct FakeControl {
    next_pid: AtomicU32,
    alive: Mutex<BTreeSet<u32>>,
    launches: Mutex<Vec<String>>,
    terminations: Mutex<Vec<ProcessHandle>>,
}

impl FakeControl {
    pub(crate) fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            ..Self::default()
        }
    }

    /// Simulates a process exiting on its own.
    pub(crate) fn crash(&self, pid: u32) {
        self.alive.lock().expect("alive lock").remove(&pid);
    }

    pub(crate) fn launches(&self) -> Vec<String> {
        self.launches.lock().expect("launches lock").clone()
    }

    pub(crate) fn terminations(&self) -> Vec<ProcessHandle> {
        self.terminations.lock().expect("terminations lock").clone()
    }
}

impl ProcessControl for FakeControl {
    fn launch(&self, service: &ServiceDescriptor) -> Result<ProcessHandle, ControlError> {
        self.launches
            .lock()
            .expect("launches lock")
            .push(service.name.clone());
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.alive.lock().expect("alive lock").insert(pid);
        Ok(ProcessHandle::Pid {
            pid,
            start_time: None,
        })
    }

    fn is_alive(&self, handle: &ProcessHandle) -> Result<bool, ControlError> {
        Ok(match handle {
            ProcessHandle::Pid { pid, .. } => self.alive.lock().expect("alive lock").contains(pid),
            ProcessHandle::Container { .. } => false,
            ProcessHandle::External => true,
        })
    }

    fn terminate(
        &self,
        handle: &ProcessHandle,
        _grace: Duration,
    ) -> Result<Termination, ControlError> {
        self.terminations
            .lock()
            .expect("terminations lock")
            .push(handle.clone());
        Ok(match handle {
            ProcessHandle::Pid { pid, .. } => {
                if self.alive.lock().expect("alive lock").remove(pid) {
                    Termination::Graceful
                } else {
                    Termination::AlreadyGone
                }
            }
            ProcessHandle::Container { .. } => Termination::AlreadyGone,
            ProcessHandle::External => Termination::Detached,
        })
    }
}
