//! Detached OS processes addressed by process-group leader pid.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, killpg};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use sysinfo::{ProcessesToUpdate, System};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

use standup_config::ServiceDescriptor;

use super::{CONTROL_TARGET, ControlError, Termination};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_SETTLE: Duration = Duration::from_secs(2);

/// Spawns `program` in its own process group with output appended to the
/// service log, returning the child's pid.
pub(super) fn spawn_detached(
    service: &ServiceDescriptor,
    program: &str,
    args: &[String],
) -> Result<u32, ControlError> {
    if !service.working_directory.is_dir() {
        return Err(ControlError::Spawn {
            program: program.to_owned(),
            source: io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "working directory '{}' does not exist",
                    service.working_directory
                ),
            ),
        });
    }
    let stdout = open_log(&service.log_path, &service.name)?;
    let stderr = stdout
        .try_clone()
        .map_err(|source| ControlError::LogFile {
            path: service.log_path.clone(),
            source,
        })?;

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(&service.working_directory)
        .envs(&service.environment)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .process_group(0);
    let child = command.spawn().map_err(|source| ControlError::Spawn {
        program: program.to_owned(),
        source,
    })?;
    let pid = child.id();
    info!(
        target: CONTROL_TARGET,
        service = %service.name,
        pid,
        program,
        log = %service.log_path,
        "process launched"
    );
    Ok(pid)
}

fn open_log(path: &Utf8Path, service: &str) -> Result<File, ControlError> {
    let to_error = |source| ControlError::LogFile {
        path: path.to_owned(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        fs::create_dir_all(parent).map_err(to_error)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(to_error)?;
    let stamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("unknown time"));
    writeln!(file, "--- {service} starting at {stamp} ---").map_err(to_error)?;
    Ok(file)
}

fn to_pid(pid: u32) -> Result<Pid, ControlError> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 1)
        .map(Pid::from_raw)
        .ok_or(ControlError::InvalidPid { pid })
}

/// Start time of `pid` in Unix seconds, if the process is visible.
pub(super) fn start_time(pid: u32) -> Option<u64> {
    let pid = sysinfo::Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(sysinfo::Process::start_time)
}

/// Whether `pid` is still the process that was launched.
///
/// Exited children are reaped on the way. When `recorded` is known, a
/// running process with a different start time has reused the pid and
/// counts as gone.
pub(super) fn is_alive(pid: u32, recorded: Option<u64>) -> Result<bool, ControlError> {
    let target = to_pid(pid)?;
    match waitpid(target, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => return Ok(is_same_process(pid, recorded)),
        Ok(status) => {
            debug!(target: CONTROL_TARGET, pid, status = ?status, "reaped exited child");
            return Ok(false);
        }
        Err(Errno::ECHILD) => {}
        Err(source) => return Err(ControlError::Signal { pid, source }),
    }
    match kill(target, None) {
        Ok(()) | Err(Errno::EPERM) => Ok(is_same_process(pid, recorded)),
        Err(Errno::ESRCH) => Ok(false),
        Err(source) => Err(ControlError::Signal { pid, source }),
    }
}

fn is_same_process(pid: u32, recorded: Option<u64>) -> bool {
    let Some(recorded) = recorded else {
        return true;
    };
    let Some(current) = start_time(pid) else {
        return true;
    };
    if recorded != current {
        debug!(
            target: CONTROL_TARGET,
            pid,
            recorded,
            current,
            "pid now belongs to a different process"
        );
        return false;
    }
    true
}

/// Sends SIGTERM to the process group, escalating to SIGKILL after `grace`.
pub(super) fn terminate(
    pid: u32,
    recorded: Option<u64>,
    grace: Duration,
) -> Result<Termination, ControlError> {
    if !is_alive(pid, recorded)? {
        return Ok(Termination::AlreadyGone);
    }
    signal_group(pid, Signal::SIGTERM)?;
    if wait_for_exit(pid, recorded, grace)? {
        return Ok(Termination::Graceful);
    }
    warn!(
        target: CONTROL_TARGET,
        pid,
        grace_ms = grace.as_millis(),
        "process ignored SIGTERM; sending SIGKILL"
    );
    signal_group(pid, Signal::SIGKILL)?;
    if !wait_for_exit(pid, recorded, KILL_SETTLE)? {
        warn!(target: CONTROL_TARGET, pid, "process still visible after SIGKILL");
    }
    Ok(Termination::Forced)
}

fn signal_group(pid: u32, signal: Signal) -> Result<(), ControlError> {
    let target = to_pid(pid)?;
    match killpg(target, signal) {
        Ok(()) => return Ok(()),
        Err(Errno::ESRCH) => {}
        Err(source) => return Err(ControlError::Signal { pid, source }),
    }
    // Not a group leader; fall back to the single process.
    match kill(target, signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(source) => Err(ControlError::Signal { pid, source }),
    }
}

fn wait_for_exit(pid: u32, recorded: Option<u64>, timeout: Duration) -> Result<bool, ControlError> {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_alive(pid, recorded)? {
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}
