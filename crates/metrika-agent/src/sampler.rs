use crate::cache::MetricCache;
use metrika_collector::Collector;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Spawns one polling task per collector. Each task samples on every tick
/// and feeds the cache until `cancel` fires.
pub fn spawn(
    collectors: Vec<Box<dyn Collector>>,
    cache: Arc<MetricCache>,
    period: Duration,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    collectors
        .into_iter()
        .map(|collector| tokio::spawn(poll(collector, cache.clone(), period, cancel.clone())))
        .collect()
}

async fn poll(
    mut collector: Box<dyn Collector>,
    cache: Arc<MetricCache>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(collector = collector.name(), period_ms = period.as_millis() as u64, "Sampler started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                match collector.collect() {
                    Ok(samples) => {
                        tracing::debug!(collector = collector.name(), count = samples.len(), "Sampled");
                        cache.apply_poll(&samples);
                    }
                    Err(e) => tracing::warn!(collector = collector.name(), error = %e, "Collection failed"),
                }
            }
        }
    }

    tracing::info!(collector = collector.name(), "Sampler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::POLL_COUNT;
    use metrika_common::{Metric, MetricValue};

    struct Fixed;

    impl Collector for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn collect(&mut self) -> anyhow::Result<Vec<Metric>> {
            Ok(vec![Metric::gauge("Fixed", 7.0)])
        }
    }

    struct Broken;

    impl Collector for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn collect(&mut self) -> anyhow::Result<Vec<Metric>> {
            anyhow::bail!("no stats")
        }
    }

    #[tokio::test]
    async fn samplers_fill_cache_until_cancelled() {
        let cache = Arc::new(MetricCache::new(false));
        let cancel = CancellationToken::new();
        let handles = spawn(
            vec![Box::new(Fixed), Box::new(Broken)],
            cache.clone(),
            Duration::from_millis(10),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        for h in handles {
            h.await.unwrap();
        }

        let snap = cache.snapshot();
        assert!(snap.contains(&Metric::gauge("Fixed", 7.0)));
        let polls = snap
            .iter()
            .find(|m| m.name == POLL_COUNT)
            .map(|m| m.value);
        assert!(matches!(polls, Some(MetricValue::Counter(n)) if n >= 1));
    }
}
