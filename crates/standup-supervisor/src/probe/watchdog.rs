use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

use standup_config::ServiceDescriptor;

use super::{HealthProbe, ReadinessResult};

const WATCHDOG_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::probe");

/// Bounds every attempt of an inner probe to its timeout plus `grace`.
///
/// Each attempt runs on a helper thread. When the deadline passes first, a
/// failed result is reported and the helper is abandoned.
pub struct ProbeWatchdog {
    inner: Arc<dyn HealthProbe>,
    grace: Duration,
}

impl ProbeWatchdog {
    /// Wraps `inner`, allowing `grace` beyond each check's own timeout.
    pub fn new(inner: Arc<dyn HealthProbe>, grace: Duration) -> Self {
        Self { inner, grace }
    }
}

impl HealthProbe for ProbeWatchdog {
    fn check(&self, service: &ServiceDescriptor, attempt: u32) -> ReadinessResult {
        let limit = service.readiness.timeout.saturating_add(self.grace);
        let started = Instant::now();
        let (sender, receiver) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let owned = service.clone();
        let spawned = thread::Builder::new()
            .name(format!("probe-{}", service.name))
            .spawn(move || {
                let _ = sender.send(inner.check(&owned, attempt));
            });
        if let Err(error) = spawned {
            warn!(
                target: WATCHDOG_TARGET,
                service = %service.name,
                error = %error,
                "could not spawn probe thread; probing inline"
            );
            return self.inner.check(service, attempt);
        }
        match receiver.recv_timeout(limit) {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    target: WATCHDOG_TARGET,
                    service = %service.name,
                    attempt,
                    limit_ms = limit.as_millis(),
                    "probe exceeded its deadline"
                );
                ReadinessResult::new(
                    &service.name,
                    attempt,
                    false,
                    format!("probe did not finish within {limit:?}"),
                    started.elapsed(),
                )
            }
        }
    }

    fn occupant(&self, service: &ServiceDescriptor) -> Option<String> {
        self.inner.occupant(service)
    }
}
