use crate::cache::{MetricCache, POLL_COUNT};
use crate::config::AgentConfig;
use crate::transport::Transport;
use metrika_common::{Backoff, Metric, MetricKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// How long workers get to finish in-flight sends after cancellation.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type Queue = Arc<Mutex<mpsc::Receiver<Vec<Metric>>>>;

/// Periodically snapshots the cache and fans batches out to a fixed pool of
/// `rate_limit` workers over a bounded queue.
pub struct Reporter {
    cache: Arc<MetricCache>,
    transport: Arc<dyn Transport>,
    period: Duration,
    rate_limit: usize,
    backoff: Backoff,
    grace: Duration,
}

impl Reporter {
    pub fn new(
        cache: Arc<MetricCache>,
        transport: Arc<dyn Transport>,
        period: Duration,
        rate_limit: usize,
    ) -> Self {
        Self {
            cache,
            transport,
            period,
            rate_limit: rate_limit.max(1),
            backoff: Backoff::default(),
            grace: SHUTDOWN_GRACE,
        }
    }

    pub fn from_config(
        config: &AgentConfig,
        cache: Arc<MetricCache>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::new(cache, transport, config.report_period(), config.rate_limit)
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Takes the next batch out of the cache. `PollCount` restarts from zero
    /// before the batch is sent, so it always holds the polls since the last
    /// report attempt.
    fn take_batch(&self) -> Vec<Metric> {
        let batch = self.cache.snapshot();
        self.cache.reset(MetricKind::Counter, POLL_COUNT);
        batch
    }

    pub async fn run(self, cancel: CancellationToken) {
        let (tx, rx) = mpsc::channel::<Vec<Metric>>(self.rate_limit);
        let queue: Queue = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for id in 0..self.rate_limit {
            workers.spawn(worker(
                id,
                queue.clone(),
                self.transport.clone(),
                self.backoff.clone(),
                cancel.clone(),
            ));
        }

        tracing::info!(
            transport = self.transport.name(),
            period_ms = self.period.as_millis() as u64,
            workers = self.rate_limit,
            max_attempts = self.backoff.max_attempts(),
            "Reporter started"
        );

        let mut tick = tokio::time::interval_at(Instant::now() + self.period, self.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    let permit = match tx.try_reserve() {
                        Ok(permit) => permit,
                        Err(TrySendError::Full(())) => {
                            tracing::debug!("All workers busy, skipping report tick");
                            continue;
                        }
                        Err(TrySendError::Closed(())) => break,
                    };
                    let batch = self.take_batch();
                    if batch.is_empty() {
                        continue;
                    }
                    tracing::debug!(count = batch.len(), "Queued metric batch");
                    permit.send(batch);
                }
            }
        }

        drop(tx);
        let drained = tokio::time::timeout(self.grace, async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    tracing::debug!(error = %e, "Report worker join failed");
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                grace_ms = self.grace.as_millis() as u64,
                "Report workers did not finish in time, aborting"
            );
            workers.abort_all();
        }

        tracing::info!("Reporter stopped");
    }
}

async fn worker(
    id: usize,
    queue: Queue,
    transport: Arc<dyn Transport>,
    backoff: Backoff,
    cancel: CancellationToken,
) {
    loop {
        let batch = queue.lock().await.recv().await;
        let Some(batch) = batch else {
            break;
        };
        match backoff
            .retry(Some(&cancel), || transport.send_batch(&batch))
            .await
        {
            Ok(()) => tracing::debug!(worker = id, count = batch.len(), "Metrics reported"),
            Err(e) => tracing::error!(
                worker = id,
                count = batch.len(),
                error = %e,
                "Dropped metric batch"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ReportError;
    use async_trait::async_trait;
    use metrika_common::MetricValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records concurrency and every batch it is handed.
    #[derive(Default)]
    struct Recording {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
        delay: Duration,
        fail_with: Option<fn() -> ReportError>,
        batches: std::sync::Mutex<Vec<Vec<Metric>>>,
    }

    #[async_trait]
    impl Transport for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send_batch(&self, metrics: &[Metric]) -> Result<(), ReportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.batches.lock().unwrap().push(metrics.to_vec());
            match self.fail_with {
                Some(make) => Err(make()),
                None => Ok(()),
            }
        }
    }

    fn poll_count(batch: &[Metric]) -> Option<i64> {
        batch.iter().find_map(|m| match m.value {
            MetricValue::Counter(d) if m.name == POLL_COUNT => Some(d),
            _ => None,
        })
    }

    #[tokio::test]
    async fn concurrent_sends_never_exceed_rate_limit() {
        let cache = Arc::new(MetricCache::new(false));
        cache.apply_poll(&[Metric::gauge("Alloc", 1.0)]);
        let transport = Arc::new(Recording {
            delay: Duration::from_millis(250),
            ..Recording::default()
        });

        let cancel = CancellationToken::new();
        let reporter = Reporter::new(cache, transport.clone(), Duration::from_millis(100), 2)
            .with_backoff(Backoff::none());
        let task = tokio::spawn(reporter.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(1200)).await;
        cancel.cancel();
        task.await.unwrap();

        assert!(transport.calls.load(Ordering::SeqCst) >= 2);
        assert!(transport.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(transport.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn poll_count_is_reset_when_batch_is_taken() {
        let cache = Arc::new(MetricCache::new(false));
        cache.apply_poll(&[]);
        cache.apply_poll(&[]);
        cache.apply_poll(&[]);
        let transport = Arc::new(Recording::default());

        let cancel = CancellationToken::new();
        let reporter = Reporter::new(cache.clone(), transport.clone(), Duration::from_millis(50), 1);
        let task = tokio::spawn(reporter.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(80)).await;
        cancel.cancel();
        task.await.unwrap();

        let batches = transport.batches.lock().unwrap();
        assert_eq!(poll_count(&batches[0]), Some(3));
        assert_eq!(poll_count(&cache.snapshot()), Some(0));
    }

    #[tokio::test]
    async fn rejected_batch_is_dropped_without_retry() {
        let cache = Arc::new(MetricCache::new(false));
        cache.update_gauge("g", 1.0).unwrap();
        let transport = Arc::new(Recording {
            fail_with: Some(|| ReportError::Rejected("400 Bad Request".into())),
            ..Recording::default()
        });

        let cancel = CancellationToken::new();
        let reporter = Reporter::new(cache, transport.clone(), Duration::from_millis(50), 1)
            .with_backoff(Backoff::new(vec![Duration::from_millis(1); 3]));
        let task = tokio::spawn(reporter.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(80)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_follow_the_backoff_schedule() {
        let cache = Arc::new(MetricCache::new(false));
        cache.update_gauge("g", 1.0).unwrap();
        let transport = Arc::new(Recording {
            fail_with: Some(|| ReportError::Transient("503".into())),
            ..Recording::default()
        });

        let cancel = CancellationToken::new();
        let reporter = Reporter::new(cache, transport.clone(), Duration::from_millis(50), 1)
            .with_backoff(Backoff::new(vec![Duration::from_millis(1); 3]));
        let task = tokio::spawn(reporter.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(80)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn empty_cache_sends_nothing() {
        let transport = Arc::new(Recording::default());
        let cancel = CancellationToken::new();
        let reporter = Reporter::new(
            Arc::new(MetricCache::new(false)),
            transport.clone(),
            Duration::from_millis(10),
            1,
        );
        let task = tokio::spawn(reporter.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stuck_send_is_aborted_after_grace() {
        let cache = Arc::new(MetricCache::new(false));
        cache.update_gauge("g", 1.0).unwrap();
        let transport = Arc::new(Recording {
            delay: Duration::from_secs(30),
            ..Recording::default()
        });

        let cancel = CancellationToken::new();
        let reporter = Reporter::new(cache, transport.clone(), Duration::from_millis(20), 1)
            .with_grace(Duration::from_millis(50));
        let task = tokio::spawn(reporter.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("reporter should stop within the grace period")
            .unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
