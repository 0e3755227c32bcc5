//! Lifecycle tests for the supervisor against in-memory hosts.

use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mockall::{Sequence, mock};
use rstest::{fixture, rstest};
use tempfile::TempDir;

use standup_config::{BackoffPolicy, ProbeTarget, ServiceDescriptor};

use crate::cancel::CancellationToken;
use crate::control::{ControlError, ProcessControl, Termination};
use crate::error::SupervisorError;
use crate::probe::{HealthProbe, ReadinessResult, SystemProbe};
use crate::record::{ProcessHandle, ProcessRecord, ServiceState};
use crate::supervisor::{StartOutcome, StopOutcome, Supervisor};
use crate::test_support::{
    FakeControl, StubProbe, catalogue_of, process_descriptor, quick_backoff, stack_catalogue,
    tcp_descriptor,
};

mock! {
    Probe {}
    impl HealthProbe for Probe {
        fn check(&self, service: &ServiceDescriptor, attempt: u32) -> ReadinessResult;
    }
}

mock! {
    Control {}
    impl ProcessControl for Control {
        fn launch(&self, service: &ServiceDescriptor) -> Result<ProcessHandle, ControlError>;
        fn is_alive(&self, handle: &ProcessHandle) -> Result<bool, ControlError>;
        fn terminate(
            &self,
            handle: &ProcessHandle,
            grace: Duration,
        ) -> Result<Termination, ControlError>;
    }
}

fn probe_result(service: &ServiceDescriptor, attempt: u32, success: bool) -> ReadinessResult {
    let detail = if success { "ready" } else { "connection refused" };
    ReadinessResult::new(&service.name, attempt, success, detail, Duration::ZERO)
}

struct Stack {
    dir: TempDir,
    control: Arc<FakeControl>,
}

impl Stack {
    fn supervisor(&self, probe: Arc<dyn HealthProbe>, backoff: BackoffPolicy) -> Supervisor {
        Supervisor::new(
            stack_catalogue(self.dir.path(), backoff),
            probe,
            self.control.clone(),
        )
    }

    fn ready_supervisor(&self) -> Supervisor {
        self.supervisor(
            Arc::new(StubProbe::always(true)),
            quick_backoff(5, Duration::from_secs(2)),
        )
    }

    fn with_services(
        &self,
        services: Vec<ServiceDescriptor>,
        probe: Arc<dyn HealthProbe>,
        backoff: BackoffPolicy,
    ) -> Supervisor {
        Supervisor::new(
            catalogue_of(self.dir.path(), services, backoff),
            probe,
            self.control.clone(),
        )
    }

    /// Process-launched service whose readiness is a TCP connect to `port`.
    fn tcp_process(&self, name: &str, port: u16) -> ServiceDescriptor {
        let mut service = process_descriptor(self.dir.path(), name, "sleep", &["30"]);
        service.readiness.target = ProbeTarget::Tcp {
            host: "127.0.0.1".into(),
            port,
        };
        service
    }

    fn with_control(
        &self,
        control: impl ProcessControl + 'static,
        probe: Arc<dyn HealthProbe>,
        backoff: BackoffPolicy,
    ) -> Supervisor {
        Supervisor::new(
            stack_catalogue(self.dir.path(), backoff),
            probe,
            Arc::new(control),
        )
    }
}

#[fixture]
fn stack() -> Stack {
    Stack {
        dir: TempDir::new().expect("temp dir"),
        control: Arc::new(FakeControl::new()),
    }
}

/// Real TCP check against a service that only binds its port on a given attempt.
struct BindsOnAttempt {
    inner: SystemProbe,
    port: u16,
    bind_on: u32,
    listener: Mutex<Option<TcpListener>>,
    results: Mutex<Vec<ReadinessResult>>,
}

impl BindsOnAttempt {
    fn new(port: u16, bind_on: u32) -> Self {
        Self {
            inner: SystemProbe::new().expect("probe builds"),
            port,
            bind_on,
            listener: Mutex::new(None),
            results: Mutex::new(Vec::new()),
        }
    }

    fn results(&self) -> Vec<ReadinessResult> {
        self.results.lock().expect("results lock").clone()
    }
}

impl HealthProbe for BindsOnAttempt {
    fn check(&self, service: &ServiceDescriptor, attempt: u32) -> ReadinessResult {
        if attempt == self.bind_on {
            let listener = TcpListener::bind(("127.0.0.1", self.port)).expect("bind service port");
            *self.listener.lock().expect("listener lock") = Some(listener);
        }
        let result = self.inner.check(service, attempt);
        self.results
            .lock()
            .expect("results lock")
            .push(result.clone());
        result
    }

    fn occupant(&self, service: &ServiceDescriptor) -> Option<String> {
        self.inner.occupant(service)
    }
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").port()
}

fn recorded(supervisor: &Supervisor, service: &str) -> ProcessRecord {
    supervisor
        .store()
        .load(service)
        .expect("load record")
        .expect("record present")
}

fn seed(supervisor: &Supervisor, service: &str, pid: u32, state: ServiceState) {
    let descriptor = supervisor.catalogue().get(service).expect("known service");
    let mut record = ProcessRecord::starting(
        descriptor,
        ProcessHandle::Pid {
            pid,
            start_time: None,
        },
    );
    record.transition(state);
    supervisor.store().save(&record).expect("seed record");
}

#[rstest]
fn start_brings_up_dependencies_first(stack: Stack) {
    let supervisor = stack.ready_supervisor();

    let outcome = supervisor.start("frontend").expect("start frontend");

    assert!(matches!(outcome, StartOutcome::Ready { attempts: 1, .. }));
    assert_eq!(
        stack.control.launches(),
        vec!["database", "backend", "frontend"]
    );
    for service in ["database", "backend", "frontend"] {
        assert_eq!(recorded(&supervisor, service).state, ServiceState::Ready);
    }
}

#[rstest]
fn second_start_does_not_relaunch(stack: Stack) {
    let supervisor = stack.ready_supervisor();
    supervisor.start("backend").expect("first start");
    let first = recorded(&supervisor, "backend");

    let outcome = supervisor.start("backend").expect("second start");

    assert_eq!(outcome, StartOutcome::AlreadyRunning);
    assert_eq!(stack.control.launches(), vec!["database", "backend"]);
    assert_eq!(recorded(&supervisor, "backend").handle, first.handle);
}

#[rstest]
fn readiness_is_confirmed_only_by_a_successful_probe(stack: Stack) {
    let mut probe = MockProbe::new();
    let mut sequence = Sequence::new();
    let confirmed_at = Arc::new(Mutex::new(None));
    for attempt in 1..=3 {
        let confirmed_at = Arc::clone(&confirmed_at);
        probe
            .expect_check()
            .withf(move |service, seen| service.name == "database" && *seen == attempt)
            .times(1)
            .in_sequence(&mut sequence)
            .returning(move |service, seen| {
                let result = probe_result(service, seen, attempt == 3);
                if result.success {
                    *confirmed_at.lock().expect("lock") = Some(result.observed_at);
                }
                result
            });
    }
    let supervisor = stack.supervisor(Arc::new(probe), quick_backoff(10, Duration::from_secs(2)));

    let outcome = supervisor.start("database").expect("start database");

    assert!(matches!(outcome, StartOutcome::Ready { attempts: 3, .. }));
    let record = recorded(&supervisor, "database");
    assert_eq!(record.state, ServiceState::Ready);
    assert_eq!(record.attempts, 3);
    let confirmed_at = *confirmed_at.lock().expect("lock");
    assert!(confirmed_at.is_some());
    assert_eq!(record.ready_at, confirmed_at);
}

#[rstest]
fn tcp_service_is_ready_once_its_port_accepts(stack: Stack) {
    let port = free_port();
    let probe = Arc::new(BindsOnAttempt::new(port, 3));
    let supervisor = stack.with_services(
        vec![stack.tcp_process("database", port)],
        probe.clone(),
        quick_backoff(10, Duration::from_secs(5)),
    );

    let outcome = supervisor.start("database").expect("ready on the third attempt");

    assert!(matches!(outcome, StartOutcome::Ready { attempts: 3, .. }));
    let results = probe.results();
    let outcomes: Vec<bool> = results.iter().map(|result| result.success).collect();
    assert_eq!(outcomes, [false, false, true]);
    let record = recorded(&supervisor, "database");
    assert_eq!(record.state, ServiceState::Ready);
    assert_eq!(record.attempts, 3);
    assert_eq!(
        record.ready_at,
        results.last().map(|result| result.observed_at)
    );
}

#[rstest]
fn occupied_port_blocks_the_launch(stack: Stack) {
    let squatter = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = squatter.local_addr().expect("addr").port();
    let supervisor = stack.with_services(
        vec![stack.tcp_process("backend", port)],
        Arc::new(SystemProbe::new().expect("probe builds")),
        quick_backoff(3, Duration::from_secs(1)),
    );

    let error = supervisor.start("backend").expect_err("port is taken");

    assert!(matches!(
        &error,
        SupervisorError::PortInUse { service, occupant }
            if service == "backend" && occupant.ends_with(&format!(":{port}"))
    ));
    assert_eq!(error.service(), Some("backend"));
    assert!(stack.control.launches().is_empty());
    assert!(supervisor.store().load("backend").expect("load").is_none());
}

#[rstest]
fn external_services_may_already_be_listening(stack: Stack) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let supervisor = stack.with_services(
        vec![tcp_descriptor("backend", port)],
        Arc::new(SystemProbe::new().expect("probe builds")),
        quick_backoff(3, Duration::from_secs(1)),
    );

    let outcome = supervisor.start("backend").expect("external service is ready");

    assert!(matches!(outcome, StartOutcome::Ready { attempts: 1, .. }));
}

#[rstest]
fn readiness_wait_is_bounded_by_the_total_timeout(stack: Stack) {
    let total = Duration::from_millis(150);
    let supervisor = stack.supervisor(Arc::new(StubProbe::always(false)), quick_backoff(1_000, total));
    let probe_timeout = supervisor
        .catalogue()
        .get("database")
        .expect("database")
        .readiness
        .timeout;

    let started = Instant::now();
    let error = supervisor.start("database").expect_err("never ready");

    assert!(started.elapsed() <= total + probe_timeout + Duration::from_millis(250));
    assert!(matches!(error, SupervisorError::ReadinessTimeout { .. }));
    let record = recorded(&supervisor, "database");
    assert_eq!(record.state, ServiceState::Failed);
    assert_eq!(record.last_detail.as_deref(), Some("stub not ready"));
}

#[rstest]
fn readiness_wait_stops_after_max_attempts(stack: Stack) {
    let probe = Arc::new(StubProbe::always(false));
    let supervisor = stack.supervisor(probe.clone(), quick_backoff(3, Duration::from_secs(5)));

    let error = supervisor.start("database").expect_err("never ready");

    assert!(matches!(
        error,
        SupervisorError::ReadinessTimeout { attempts: 3, .. }
    ));
    let attempts: Vec<u32> = probe.calls().into_iter().map(|(_, attempt)| attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[rstest]
fn failed_dependency_is_named_and_dependents_are_not_launched(stack: Stack) {
    let mut probe = MockProbe::new();
    probe
        .expect_check()
        .returning(|service, attempt| probe_result(service, attempt, service.name != "database"));
    let supervisor = stack.supervisor(Arc::new(probe), quick_backoff(2, Duration::from_secs(1)));

    let error = supervisor.start("frontend").expect_err("database never ready");

    assert!(matches!(
        &error,
        SupervisorError::DependencyFailed { service, dependency, .. }
            if service == "frontend" && dependency == "database"
    ));
    assert_eq!(error.service(), Some("database"));
    assert_eq!(stack.control.launches(), vec!["database"]);
}

#[rstest]
fn process_exiting_during_readiness_wait_is_reported(stack: Stack) {
    let mut control = MockControl::new();
    control
        .expect_launch()
        .times(1)
        .returning(|_| Ok(ProcessHandle::Pid { pid: 4242, start_time: None }));
    control.expect_is_alive().returning(|_| Ok(false));
    let supervisor = stack.with_control(
        control,
        Arc::new(StubProbe::always(false)),
        quick_backoff(10, Duration::from_secs(2)),
    );

    let error = supervisor.start("database").expect_err("process exits");

    assert!(matches!(error, SupervisorError::ProcessLost { .. }));
    assert!(error.to_string().contains("pid 4242"));
    assert_eq!(recorded(&supervisor, "database").state, ServiceState::Crashed);
}

#[rstest]
fn crashed_service_must_be_stopped_before_restarting(stack: Stack) {
    let supervisor = stack.ready_supervisor();
    supervisor.start("database").expect("start");
    let ProcessHandle::Pid { pid, .. } = recorded(&supervisor, "database").handle else {
        panic!("expected a pid handle");
    };
    stack.control.crash(pid);

    let error = supervisor.start("database").expect_err("crashed");
    assert!(matches!(error, SupervisorError::ProcessLost { .. }));
    assert!(error.to_string().contains("run `stop`"));
    assert_eq!(recorded(&supervisor, "database").state, ServiceState::Crashed);
    assert_eq!(stack.control.launches().len(), 1);

    let stopped = supervisor.stop("database").expect("stop crashed service");
    assert_eq!(stopped, StopOutcome::Stopped(Termination::AlreadyGone));
    assert!(supervisor.store().load("database").expect("load").is_none());

    supervisor.start("database").expect("restart");
    assert_eq!(stack.control.launches().len(), 2);
}

#[rstest]
fn live_unconfirmed_service_resumes_polling_without_relaunch(stack: Stack) {
    let supervisor = stack.ready_supervisor();
    supervisor.start("database").expect("start");
    let mut record = recorded(&supervisor, "database");
    record.transition(ServiceState::Failed);
    supervisor.store().save(&record).expect("save");

    let outcome = supervisor.start("database").expect("resume");

    assert!(matches!(outcome, StartOutcome::Ready { .. }));
    assert_eq!(stack.control.launches(), vec!["database"]);
    assert_eq!(recorded(&supervisor, "database").state, ServiceState::Ready);
}

#[rstest]
fn stopping_without_a_record_succeeds(stack: Stack) {
    let supervisor = stack.ready_supervisor();

    assert_eq!(
        supervisor.stop("backend").expect("stop"),
        StopOutcome::NotRunning
    );
    assert!(stack.control.terminations().is_empty());
}

#[rstest]
fn stop_removes_the_record(stack: Stack) {
    let supervisor = stack.ready_supervisor();
    supervisor.start("database").expect("start");

    let outcome = supervisor.stop("database").expect("stop");

    assert_eq!(outcome, StopOutcome::Stopped(Termination::Graceful));
    assert!(supervisor.store().load("database").expect("load").is_none());
}

#[rstest]
fn stop_all_runs_in_reverse_order_and_continues_past_failures(stack: Stack) {
    let signalled = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&signalled);
    let mut control = MockControl::new();
    control
        .expect_terminate()
        .times(3)
        .returning(move |handle, _| {
            let ProcessHandle::Pid { pid, .. } = handle else {
                panic!("expected a pid handle");
            };
            seen.lock().expect("lock").push(*pid);
            if *pid == 2 {
                Err(ControlError::InvalidPid { pid: *pid })
            } else {
                Ok(Termination::Graceful)
            }
        });
    let supervisor = stack.with_control(
        control,
        Arc::new(StubProbe::always(true)),
        quick_backoff(1, Duration::from_secs(1)),
    );
    seed(&supervisor, "database", 1, ServiceState::Ready);
    seed(&supervisor, "backend", 2, ServiceState::Ready);
    seed(&supervisor, "frontend", 3, ServiceState::Ready);

    let error = supervisor.stop_all().expect_err("backend fails");

    assert_eq!(error.service(), Some("backend"));
    assert_eq!(*signalled.lock().expect("lock"), vec![3, 2, 1]);
    assert!(supervisor.store().list().expect("list").is_empty());
}

#[rstest]
fn cancellation_leaves_the_service_starting(stack: Stack) {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let supervisor = stack.ready_supervisor().with_cancellation(cancel);

    let error = supervisor.start("database").expect_err("interrupted");

    assert!(matches!(error, SupervisorError::Interrupted { .. }));
    assert_eq!(recorded(&supervisor, "database").state, ServiceState::Starting);
}

#[rstest]
#[case::ready_but_dead(ServiceState::Ready, false, true, ServiceState::Crashed)]
#[case::starting_but_dead(ServiceState::Starting, false, false, ServiceState::Crashed)]
#[case::starting_and_answering(ServiceState::Starting, true, true, ServiceState::Ready)]
#[case::failed_and_answering(ServiceState::Failed, true, true, ServiceState::Ready)]
#[case::failed_and_silent(ServiceState::Failed, true, false, ServiceState::Failed)]
fn status_reconciles_records_with_the_host(
    stack: Stack,
    #[case] recorded_state: ServiceState,
    #[case] alive: bool,
    #[case] answering: bool,
    #[case] expected: ServiceState,
) {
    let mut control = MockControl::new();
    control.expect_is_alive().returning(move |_| Ok(alive));
    let supervisor = stack.with_control(
        control,
        Arc::new(StubProbe::always(answering)),
        quick_backoff(1, Duration::from_secs(1)),
    );
    seed(&supervisor, "backend", 77, recorded_state);
    let descriptor = supervisor.catalogue().get("backend").expect("backend").clone();

    let status = supervisor.status_of(&descriptor).expect("status");

    assert_eq!(status.state, expected);
    assert_eq!(status.alive, Some(alive));
    assert_eq!(status.probe.success, answering);
    assert_eq!(recorded(&supervisor, "backend").state, expected);
}

#[rstest]
fn status_without_records_reports_stopped_services(stack: Stack) {
    let supervisor = stack.supervisor(
        Arc::new(StubProbe::always(false)),
        quick_backoff(1, Duration::from_secs(1)),
    );

    let statuses = supervisor.status().expect("status");

    let names: Vec<_> = statuses.iter().map(|status| status.service.as_str()).collect();
    assert_eq!(names, vec!["database", "backend", "frontend"]);
    assert!(statuses.iter().all(|status| status.state == ServiceState::Stopped
        && status.handle.is_none()
        && !status.probe.success));
}

#[rstest]
fn corrupt_records_are_reported_and_discarded_on_stop(stack: Stack) {
    let supervisor = stack.ready_supervisor();
    let path = supervisor.store().path_for("backend").expect("path");
    std::fs::create_dir_all(supervisor.store().directory()).expect("state dir");
    std::fs::write(&path, "{ not json").expect("write corrupt record");
    let descriptor = supervisor.catalogue().get("backend").expect("backend").clone();

    let status = supervisor.status_of(&descriptor).expect("status");
    assert_eq!(status.state, ServiceState::Unknown);

    let outcome = supervisor.stop("backend").expect("stop");
    assert_eq!(outcome, StopOutcome::DiscardedCorruptRecord);
    assert!(!path.exists());
    assert!(stack.control.terminations().is_empty());
}

#[rstest]
fn unknown_service_is_rejected(stack: Stack) {
    let supervisor = stack.ready_supervisor();

    let error = supervisor.start("cache").expect_err("unknown");

    assert!(matches!(error, SupervisorError::Config(_)));
    assert!(error.to_string().contains("database, backend, frontend"));
}

#[rstest]
fn records_for_unmanaged_services_are_reported_as_strays(stack: Stack) {
    let supervisor = stack.ready_supervisor();
    supervisor.start("database").expect("start database");
    let retired = tcp_descriptor("cache", 1);
    supervisor
        .store()
        .save(&ProcessRecord::starting(&retired, ProcessHandle::External))
        .expect("save stray record");

    let strays: Vec<String> = supervisor
        .stray_records()
        .expect("list strays")
        .into_iter()
        .map(|record| record.service)
        .collect();

    assert_eq!(strays, ["cache"]);
}
