//! Bounded readiness polling with constant backoff.
//!
//! The orchestrator never waits on its children; it waits on external
//! conditions (a leader elected, daemons visible) by probing them on a
//! fixed interval until they hold or the attempt budget runs out.

use crate::error::{OrchestratorError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Poll budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Maximum number of probe calls.
    pub max_attempts: u32,
    /// Pause between probe calls.
    pub interval: Duration,
}

impl PollConfig {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Budget for leader election.
    pub fn leader() -> Self {
        Self::new(10, Duration::from_secs(1))
    }

    /// Budget for storage daemon claim convergence.
    pub fn claims() -> Self {
        Self::new(60, Duration::from_secs(1))
    }
}

/// Repeatedly invokes a probe until it yields a value.
#[derive(Debug, Clone)]
pub struct ReadinessPoller {
    config: PollConfig,
    what: String,
}

impl ReadinessPoller {
    /// Create a poller; `what` names the awaited condition in errors.
    pub fn new(what: impl Into<String>, config: PollConfig) -> Self {
        Self {
            config,
            what: what.into(),
        }
    }

    /// Invoke `probe` until it returns `Ok(Some(_))`.
    ///
    /// `Ok(None)` and `Err(_)` both count as a negative result. After
    /// `max_attempts` negative results this fails with
    /// [`OrchestratorError::ReadinessTimeout`].
    pub async fn poll<F, Fut, T>(&self, mut probe: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let mut attempt = 0;

        while attempt < self.config.max_attempts {
            attempt += 1;
            crate::observability::record_poll_attempt(&self.what);

            match probe().await {
                Ok(Some(value)) => {
                    tracing::debug!(what = %self.what, attempt, "Condition reached");
                    return Ok(value);
                }
                Ok(None) => {
                    tracing::debug!(
                        what = %self.what,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        "Not ready yet"
                    );
                }
                Err(e) => {
                    tracing::debug!(
                        what = %self.what,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = %e,
                        "Probe failed"
                    );
                }
            }

            if attempt < self.config.max_attempts {
                sleep(self.config.interval).await;
            }
        }

        tracing::warn!(what = %self.what, attempts = attempt, "Readiness budget exhausted");
        Err(OrchestratorError::ReadinessTimeout {
            what: self.what.clone(),
            attempts: attempt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick(max_attempts: u32) -> ReadinessPoller {
        ReadinessPoller::new("test", PollConfig::new(max_attempts, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_poll_returns_on_kth_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = quick(10)
            .poll(|| {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(if n == 4 { Some(n) } else { None })
                }
            })
            .await;

        assert_eq!(result.unwrap(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_poll_exhausts_exactly_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<()> = quick(7)
            .poll(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(OrchestratorError::ReadinessTimeout { attempts: 7, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_probe_errors_count_as_negative() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = quick(5)
            .poll(|| {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(OrchestratorError::NoLeader)
                    } else {
                        Ok(Some("leader"))
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "leader");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_constant_interval() {
        let start = tokio::time::Instant::now();
        let poller = ReadinessPoller::new("paused", PollConfig::new(4, Duration::from_secs(1)));

        let result: Result<()> = poller.poll(|| async { Ok(None) }).await;

        assert!(result.is_err());
        // three pauses between four attempts, none after the last
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn test_presets() {
        assert_eq!(PollConfig::leader().max_attempts, 10);
        assert_eq!(PollConfig::claims().max_attempts, 60);
        assert_eq!(PollConfig::claims().interval, Duration::from_secs(1));
    }
}
