use crate::error::{Result, StorageError};
use crate::MetricStore;
use async_trait::async_trait;
use metrika_common::{Metric, MetricError, MetricKind, MetricValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory store with one map per kind.
///
/// Lock order is always gauges then counters.
#[derive(Default)]
pub struct MemStorage {
    gauges: RwLock<HashMap<String, f64>>,
    counters: RwLock<HashMap<String, i64>>,
    snapshot_path: Option<PathBuf>,
}

/// On-disk snapshot document.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub gauges: BTreeMap<String, SnapshotEntry<f64>>,
    #[serde(default)]
    pub counters: BTreeMap<String, SnapshotEntry<i64>>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry<T> {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub value: T,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that writes a final snapshot to `path` on [`close`](MetricStore::close).
    pub fn with_snapshot_path(path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: Some(path.into()),
            ..Self::default()
        }
    }

    fn apply_gauge(gauges: &mut HashMap<String, f64>, name: &str, value: f64) -> Metric {
        gauges.insert(name.to_string(), value);
        Metric::gauge(name, value)
    }

    fn apply_counter(counters: &mut HashMap<String, i64>, name: &str, delta: i64) -> Metric {
        let slot = counters.entry(name.to_string()).or_insert(0);
        *slot = slot.wrapping_add(delta);
        Metric::counter(name, *slot)
    }

    /// Consistent copy of both maps.
    pub fn snapshot(&self) -> Snapshot {
        let gauges = read(&self.gauges);
        let counters = read(&self.counters);
        Snapshot {
            gauges: gauges
                .iter()
                .map(|(name, v)| {
                    let entry = SnapshotEntry {
                        name: name.clone(),
                        kind: MetricKind::Gauge,
                        value: *v,
                    };
                    (name.clone(), entry)
                })
                .collect(),
            counters: counters
                .iter()
                .map(|(name, d)| {
                    let entry = SnapshotEntry {
                        name: name.clone(),
                        kind: MetricKind::Counter,
                        value: *d,
                    };
                    (name.clone(), entry)
                })
                .collect(),
        }
    }

    /// Replaces both maps with the snapshot's content.
    pub fn load(&self, snapshot: Snapshot) -> Result<()> {
        let mut gauges = HashMap::with_capacity(snapshot.gauges.len());
        for (name, entry) in snapshot.gauges {
            if entry.kind != MetricKind::Gauge {
                return Err(MetricError::InvalidMetricType(format!(
                    "{} stored under gauges",
                    entry.kind
                ))
                .into());
            }
            gauges.insert(name, entry.value);
        }
        let mut counters = HashMap::with_capacity(snapshot.counters.len());
        for (name, entry) in snapshot.counters {
            if entry.kind != MetricKind::Counter {
                return Err(MetricError::InvalidMetricType(format!(
                    "{} stored under counters",
                    entry.kind
                ))
                .into());
            }
            counters.insert(name, entry.value);
        }

        let mut g = write(&self.gauges);
        let mut c = write(&self.counters);
        *g = gauges;
        *c = counters;
        Ok(())
    }

    pub fn clear(&self) {
        let mut g = write(&self.gauges);
        let mut c = write(&self.counters);
        g.clear();
        c.clear();
    }
}

#[async_trait]
impl MetricStore for MemStorage {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn update_metric(&self, metric: &Metric) -> Result<Metric> {
        let stored = match metric.value {
            MetricValue::Gauge(v) => Self::apply_gauge(&mut write(&self.gauges), &metric.name, v),
            MetricValue::Counter(d) => {
                Self::apply_counter(&mut write(&self.counters), &metric.name, d)
            }
        };
        Ok(stored)
    }

    async fn update_batch(&self, metrics: &[Metric]) -> Result<()> {
        let mut g = write(&self.gauges);
        let mut c = write(&self.counters);
        for metric in metrics {
            match metric.value {
                MetricValue::Gauge(v) => Self::apply_gauge(&mut g, &metric.name, v),
                MetricValue::Counter(d) => Self::apply_counter(&mut c, &metric.name, d),
            };
        }
        Ok(())
    }

    async fn get_metric(&self, kind: MetricKind, name: &str) -> Result<Metric> {
        let found = match kind {
            MetricKind::Gauge => read(&self.gauges)
                .get(name)
                .map(|v| Metric::gauge(name, *v)),
            MetricKind::Counter => read(&self.counters)
                .get(name)
                .map(|d| Metric::counter(name, *d)),
        };
        found.ok_or_else(|| StorageError::NotFound {
            kind,
            name: name.to_string(),
        })
    }

    async fn get_metrics(&self) -> Result<Vec<Metric>> {
        let g = read(&self.gauges);
        let c = read(&self.counters);
        let mut out = Vec::with_capacity(g.len() + c.len());
        out.extend(g.iter().map(|(n, v)| Metric::gauge(n.clone(), *v)));
        out.extend(c.iter().map(|(n, d)| Metric::counter(n.clone(), *d)));
        Ok(out)
    }

    async fn save(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_vec_pretty(&self.snapshot())?;
        tokio::fs::write(path, body)
            .await
            .map_err(|source| StorageError::FileUnavailable {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::debug!(path = %path.display(), "Saved metric snapshot");
        Ok(())
    }

    async fn restore(&self, path: &Path) -> Result<()> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No snapshot file, starting empty");
                self.clear();
                return Ok(());
            }
            Err(source) => {
                return Err(StorageError::FileUnavailable {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let snapshot = if raw.trim().is_empty() {
            Snapshot::default()
        } else {
            serde_json::from_str(&raw)?
        };
        let (gauges, counters) = (snapshot.gauges.len(), snapshot.counters.len());
        self.load(snapshot)?;
        tracing::info!(path = %path.display(), gauges, counters, "Restored metric snapshot");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Err(StorageError::Unsupported("ping", self.backend()))
    }

    async fn close(&self) -> Result<()> {
        if let Some(path) = &self.snapshot_path {
            self.save(path).await?;
        }
        Ok(())
    }
}
