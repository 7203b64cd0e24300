//! Bounded retry for teardown actions
//!
//! A cleanup action gets a fixed number of attempts, doubling a jittered
//! delay between them, before it is recorded as failed.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::Error;

const FIRST_DELAY: Duration = Duration::from_millis(500);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// How many times one cleanup action is attempted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CleanupRetry {
    attempts: u32,
}

impl CleanupRetry {
    /// `attempts` tries per action, never fewer than one
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
        }
    }

    /// Attempts per action
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Run `cleanup` until it succeeds or the attempts run out, returning
    /// the last error
    pub async fn run<F, Fut>(&self, action: &str, mut cleanup: F) -> Result<(), Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), Error>>,
    {
        let mut delay = FIRST_DELAY;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match cleanup().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.attempts => return Err(e),
                Err(e) => {
                    let pause = delay.mul_f64(rand::thread_rng().gen_range(0.5..1.5));
                    warn!(action, attempt, error = %e, delay_ms = pause.as_millis() as u64, "cleanup failed, retrying");
                    tokio::time::sleep(pause).await;
                    delay = (delay * 2).min(MAX_DELAY);
                }
            }
        }
    }
}
