//! Readiness Poller - bounded-time polling of a readiness check
//!
//! Objects are polled while they are still being created, so a check that
//! errors is treated as "not ready yet" rather than as a failure. Only running
//! out of time is reported.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::Error;

/// Poll `check` until it reports ready or `timeout` elapses.
///
/// The check runs immediately, then once per `interval`. The final sleep is
/// clamped to the deadline and each check is bounded by the time remaining,
/// so the call returns within `timeout` plus the duration of at most one
/// in-flight check that completes at the deadline.
///
/// # Arguments
/// * `target` - Human-readable description used in logs and the timeout error
/// * `interval` - Sleep between checks
/// * `timeout` - Total time budget
/// * `check` - Returns `Ok(true)` when ready, `Ok(false)` or `Err` to keep waiting
///
/// # Returns
/// `Ok(())` once ready, or [`Error::ReadinessTimeout`]
pub async fn wait_until_ready<F, Fut>(
    target: &str,
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = Instant::now();
    let deadline = start + timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());

        match tokio::time::timeout(remaining, check()).await {
            Ok(Ok(true)) => {
                debug!(
                    target = %target,
                    attempts,
                    elapsed_ms = start.elapsed().as_millis(),
                    "ready"
                );
                return Ok(());
            }
            Ok(Ok(false)) => {
                trace!(target = %target, attempts, "not ready yet");
            }
            Ok(Err(e)) => {
                trace!(target = %target, attempts, error = %e, "readiness check failed, retrying");
            }
            Err(_) => {
                trace!(target = %target, attempts, "readiness check did not finish before deadline");
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::readiness_timeout(target, timeout));
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
