use metrika_common::Backoff;
use metrika_storage::MetricStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Background task that saves the store to a file every `period`.
pub struct Snapshotter {
    handle: JoinHandle<()>,
}

impl Snapshotter {
    pub fn spawn(
        store: Arc<dyn MetricStore>,
        path: PathBuf,
        period: Duration,
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> Self {
        tracing::info!(
            path = %path.display(),
            period_secs = period.as_secs(),
            "Starting snapshotter"
        );
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = backoff.retry(Some(&cancel), || store.save(&path)).await {
                            tracing::error!(path = %path.display(), error = %e, "Snapshot failed");
                        }
                    }
                }
            }
            tracing::info!("Snapshotter stopped");
        });
        Self { handle }
    }

    /// Waits for the task to finish after its token was cancelled.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Snapshotter task failed");
        }
    }
}
