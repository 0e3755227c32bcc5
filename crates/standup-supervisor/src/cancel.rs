use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::flag;
use thiserror::Error;

const SLICE: Duration = Duration::from_millis(50);

/// Errors reported while wiring signal handlers.
#[derive(Debug, Error)]
pub enum CancellationError {
    /// Installing a signal handler failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Shared flag that stops readiness waits early.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Builds a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag whenever SIGINT or SIGTERM arrives.
    pub fn install_signal_handlers(&self) -> Result<(), CancellationError> {
        for signal in [SIGINT, SIGTERM] {
            flag::register(signal, Arc::clone(&self.flag))
                .map_err(|source| CancellationError::Install { source })?;
        }
        Ok(())
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` in short slices; returns `true` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(SLICE.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_returns_early_once_cancelled() {
        let token = CancellationToken::new();
        let remote = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let started = Instant::now();
        assert!(token.sleep(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(2));
        canceller.join().expect("canceller thread");
    }

    #[test]
    fn uncancelled_sleep_runs_to_completion() {
        let token = CancellationToken::new();
        assert!(!token.sleep(Duration::from_millis(20)));
        assert!(!token.is_cancelled());
    }
}
