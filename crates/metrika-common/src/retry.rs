use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Errors that may succeed if the same operation is attempted again.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Fixed-schedule retry policy: one initial attempt, then one extra attempt
/// after each delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    delays: Vec<Duration>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(5),
        ])
    }
}

impl Backoff {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// schedule is exhausted. A cancelled token ends the wait early and the
    /// last error is returned.
    pub async fn retry<T, E, F, Fut>(
        &self,
        cancel: Option<&CancellationToken>,
        mut op: F,
    ) -> Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0usize;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_transient() {
                return Err(err);
            }
            let Some(delay) = self.delays.get(attempt).copied() else {
                return Err(err);
            };
            attempt += 1;
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, retrying"
            );
            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(err),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}
