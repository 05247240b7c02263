use metrika_collector::runtime::{RANDOM_VALUE, RUNTIME_GAUGES};
use metrika_common::{Metric, MetricError, MetricKind, MetricValue};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Counter bumped once per sampler pass and reset on every report.
pub const POLL_COUNT: &str = "PollCount";

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Names accepted in restricted mode.
pub fn is_supported(name: &str) -> bool {
    name == POLL_COUNT || name == RANDOM_VALUE || RUNTIME_GAUGES.contains(&name)
}

/// Latest samples held by the agent between reports.
///
/// Gauges and counters sit behind separate locks. Anything that takes both
/// takes gauges first.
#[derive(Debug, Default)]
pub struct MetricCache {
    gauges: RwLock<HashMap<String, f64>>,
    counters: RwLock<HashMap<String, i64>>,
    restricted: bool,
}

impl MetricCache {
    pub fn new(restricted: bool) -> Self {
        Self {
            restricted,
            ..Self::default()
        }
    }

    fn check_name(&self, name: &str) -> Result<(), MetricError> {
        if self.restricted && !is_supported(name) {
            return Err(MetricError::InvalidMetricName(name.to_string()));
        }
        Ok(())
    }

    pub fn update_gauge(&self, name: &str, value: f64) -> Result<(), MetricError> {
        self.check_name(name)?;
        write(&self.gauges).insert(name.to_string(), value);
        Ok(())
    }

    pub fn update_counter(&self, name: &str, delta: i64) -> Result<(), MetricError> {
        self.check_name(name)?;
        let mut counters = write(&self.counters);
        let slot = counters.entry(name.to_string()).or_insert(0);
        *slot = slot.wrapping_add(delta);
        Ok(())
    }

    pub fn update(&self, metric: &Metric) -> Result<(), MetricError> {
        match metric.value {
            MetricValue::Gauge(v) => self.update_gauge(&metric.name, v),
            MetricValue::Counter(d) => self.update_counter(&metric.name, d),
        }
    }

    /// Zeroes one stored value. Unknown names are left absent.
    pub fn reset(&self, kind: MetricKind, name: &str) {
        let mut gauges = write(&self.gauges);
        let mut counters = write(&self.counters);
        match kind {
            MetricKind::Gauge => {
                if let Some(v) = gauges.get_mut(name) {
                    *v = 0.0;
                }
            }
            MetricKind::Counter => {
                if let Some(d) = counters.get_mut(name) {
                    *d = 0;
                }
            }
        }
    }

    /// Bulk-applies one sampler pass and bumps [`POLL_COUNT`].
    ///
    /// In restricted mode samples outside the whitelist are dropped.
    pub fn apply_poll(&self, samples: &[Metric]) {
        let mut gauges = write(&self.gauges);
        let mut counters = write(&self.counters);
        for metric in samples {
            if let Err(e) = self.check_name(&metric.name) {
                tracing::warn!(error = %e, "Dropped sample outside the supported set");
                continue;
            }
            match metric.value {
                MetricValue::Gauge(v) => {
                    gauges.insert(metric.name.clone(), v);
                }
                MetricValue::Counter(d) => {
                    let slot = counters.entry(metric.name.clone()).or_insert(0);
                    *slot = slot.wrapping_add(d);
                }
            }
        }
        let polls = counters.entry(POLL_COUNT.to_string()).or_insert(0);
        *polls = polls.wrapping_add(1);
    }

    /// Copies every stored metric, gauges first, each kind sorted by name.
    pub fn snapshot(&self) -> Vec<Metric> {
        let mut gauges: Vec<Metric> = read(&self.gauges)
            .iter()
            .map(|(name, v)| Metric::gauge(name.clone(), *v))
            .collect();
        let mut counters: Vec<Metric> = read(&self.counters)
            .iter()
            .map(|(name, d)| Metric::counter(name.clone(), *d))
            .collect();
        gauges.sort_by(|a, b| a.name.cmp(&b.name));
        counters.sort_by(|a, b| a.name.cmp(&b.name));
        gauges.extend(counters);
        gauges
    }
}
