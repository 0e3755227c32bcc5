//! Structured reporting for supervision events.

use std::sync::Arc;
use std::time::Duration;

use standup_config::ServiceDescriptor;

use crate::control::Termination;
use crate::error::SupervisorError;
use crate::probe::ReadinessResult;
use crate::record::ProcessHandle;

const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

/// Observer trait used to surface supervision events to telemetry sinks.
pub trait LifecycleReporter: Send + Sync {
    /// Invoked when a service is already ready and nothing needs doing.
    fn already_running(&self, service: &ServiceDescriptor, handle: &ProcessHandle);

    /// Invoked after a launch is confirmed.
    fn launched(&self, service: &ServiceDescriptor, handle: &ProcessHandle);

    /// Invoked when polling resumes for a live but unconfirmed service.
    fn resuming(&self, service: &ServiceDescriptor, handle: &ProcessHandle);

    /// Invoked after every readiness attempt.
    fn probe_observed(&self, result: &ReadinessResult);

    /// Invoked once readiness is confirmed.
    fn ready(&self, service: &ServiceDescriptor, attempts: u32, elapsed: Duration);

    /// Invoked when starting a service fails.
    fn start_failed(&self, service: &ServiceDescriptor, error: &SupervisorError);

    /// Invoked after a stop request completes.
    fn stopped(&self, service: &ServiceDescriptor, termination: Termination);

    /// Invoked when there was nothing to stop.
    fn nothing_to_stop(&self, service: &ServiceDescriptor);
}

impl<T> LifecycleReporter for Arc<T>
where
    T: LifecycleReporter + ?Sized,
{
    fn already_running(&self, service: &ServiceDescriptor, handle: &ProcessHandle) {
        (**self).already_running(service, handle);
    }

    fn launched(&self, service: &ServiceDescriptor, handle: &ProcessHandle) {
        (**self).launched(service, handle);
    }

    fn resuming(&self, service: &ServiceDescriptor, handle: &ProcessHandle) {
        (**self).resuming(service, handle);
    }

    fn probe_observed(&self, result: &ReadinessResult) {
        (**self).probe_observed(result);
    }

    fn ready(&self, service: &ServiceDescriptor, attempts: u32, elapsed: Duration) {
        (**self).ready(service, attempts, elapsed);
    }

    fn start_failed(&self, service: &ServiceDescriptor, error: &SupervisorError) {
        (**self).start_failed(service, error);
    }

    fn stopped(&self, service: &ServiceDescriptor, termination: Termination) {
        (**self).stopped(service, termination);
    }

    fn nothing_to_stop(&self, service: &ServiceDescriptor) {
        (**self).nothing_to_stop(service);
    }
}

/// Default reporter that records events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredLifecycleReporter;

impl StructuredLifecycleReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl LifecycleReporter for StructuredLifecycleReporter {
    fn already_running(&self, service: &ServiceDescriptor, handle: &ProcessHandle) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "already_running",
            service = %service.name,
            handle = %handle,
            "service already running"
        );
    }

    fn launched(&self, service: &ServiceDescriptor, handle: &ProcessHandle) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "launched",
            service = %service.name,
            handle = %handle,
            check = %service.readiness.target,
            "service launched; awaiting readiness"
        );
    }

    fn resuming(&self, service: &ServiceDescriptor, handle: &ProcessHandle) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "resuming",
            service = %service.name,
            handle = %handle,
            "service running but not confirmed ready; resuming readiness checks"
        );
    }

    fn probe_observed(&self, result: &ReadinessResult) {
        tracing::debug!(
            target: LIFECYCLE_TARGET,
            event = "probe",
            service = %result.service,
            attempt = result.attempt,
            success = result.success,
            elapsed_ms = result.elapsed.as_millis(),
            detail = %result.detail,
            "readiness probe finished"
        );
    }

    fn ready(&self, service: &ServiceDescriptor, attempts: u32, elapsed: Duration) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "ready",
            service = %service.name,
            attempts,
            elapsed_ms = elapsed.as_millis(),
            "service ready"
        );
    }

    fn start_failed(&self, service: &ServiceDescriptor, error: &SupervisorError) {
        tracing::error!(
            target: LIFECYCLE_TARGET,
            event = "start_failed",
            service = %service.name,
            log = %service.log_path,
            error = %error,
            "service failed to start"
        );
    }

    fn stopped(&self, service: &ServiceDescriptor, termination: Termination) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "stopped",
            service = %service.name,
            termination = %termination,
            "service stopped"
        );
    }

    fn nothing_to_stop(&self, service: &ServiceDescriptor) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "nothing_to_stop",
            service = %service.name,
            "no process recorded; nothing to stop"
        );
    }
}
