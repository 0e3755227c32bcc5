//! Containers driven through a docker-compatible command line.

use std::process::{Command, Output, Stdio};
use std::time::Duration;

use tracing::{info, warn};

use super::{CONTROL_TARGET, ControlError, Termination};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Presence {
    Missing,
    Stopped,
    Running,
}

fn run(runtime: &str, argv: &[&str]) -> Result<Output, ControlError> {
    Command::new(runtime)
        .args(argv)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| ControlError::RuntimeUnavailable {
            runtime: runtime.to_owned(),
            source,
        })
}

fn invoke(runtime: &str, container: &str, argv: &[&str]) -> Result<(), ControlError> {
    let output = run(runtime, argv)?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    Err(ControlError::Runtime {
        runtime: runtime.to_owned(),
        action: argv.first().copied().unwrap_or_default().to_owned(),
        container: container.to_owned(),
        detail: if stderr.is_empty() {
            output.status.to_string()
        } else {
            stderr
        },
    })
}

/// Reports whether `name` exists and is running.
pub(super) fn inspect(runtime: &str, name: &str) -> Result<Presence, ControlError> {
    let output = run(
        runtime,
        &["inspect", "--type", "container", "--format", "{{.State.Running}}", name],
    )?;
    if !output.status.success() {
        return Ok(Presence::Missing);
    }
    Ok(match String::from_utf8_lossy(&output.stdout).trim() {
        "true" => Presence::Running,
        _ => Presence::Stopped,
    })
}

/// Starts an existing container or creates it from `image`.
pub(super) fn ensure_running(
    runtime: &str,
    name: &str,
    image: Option<&str>,
    args: &[String],
) -> Result<(), ControlError> {
    match inspect(runtime, name)? {
        Presence::Running => {
            info!(target: CONTROL_TARGET, container = name, "adopting running container");
            Ok(())
        }
        Presence::Stopped => {
            invoke(runtime, name, &["start", name])?;
            info!(target: CONTROL_TARGET, container = name, "container started");
            Ok(())
        }
        Presence::Missing => {
            let image = image.ok_or_else(|| ControlError::MissingImage {
                container: name.to_owned(),
            })?;
            let mut argv = vec!["run", "-d", "--name", name];
            argv.extend(args.iter().map(String::as_str));
            argv.push(image);
            invoke(runtime, name, &argv)?;
            info!(target: CONTROL_TARGET, container = name, image, "container created");
            Ok(())
        }
    }
}

/// Stops `name`, falling back to `kill` when a graceful stop fails.
pub(super) fn stop(runtime: &str, name: &str, grace: Duration) -> Result<Termination, ControlError> {
    if inspect(runtime, name)? != Presence::Running {
        return Ok(Termination::AlreadyGone);
    }
    let seconds = grace.as_secs().max(1).to_string();
    match invoke(runtime, name, &["stop", "-t", &seconds, name]) {
        Ok(()) => Ok(Termination::Graceful),
        Err(ControlError::Runtime { detail, .. }) => {
            warn!(
                target: CONTROL_TARGET,
                container = name,
                detail = %detail,
                "graceful container stop failed; killing"
            );
            invoke(runtime, name, &["kill", name])?;
            Ok(Termination::Forced)
        }
        Err(other) => Err(other),
    }
}
