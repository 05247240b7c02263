//! Metric storage backends.
//!
//! [`MemStorage`] keeps gauges and counters in two locked maps and can
//! snapshot them to a JSON file. [`DbStorage`] keeps them in a relational
//! database through SeaORM. Both merge counters as `stored + delta` so the
//! service layer never aggregates.

pub mod entities;
pub mod error;
pub mod memory;
pub mod relational;


use async_trait::async_trait;
use metrika_common::{Metric, MetricKind};
use std::path::Path;

pub use error::{Result, StorageError};
pub use memory::MemStorage;
pub use relational::DbStorage;

/// Storage contract consumed by the server's service layer.
///
/// Implementations must be `Send + Sync`; HTTP and RPC handlers share one
/// instance behind an `Arc`.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Merges one metric and returns the stored result.
    async fn update_metric(&self, metric: &Metric) -> Result<Metric>;

    /// Merges every metric as one unit.
    async fn update_batch(&self, metrics: &[Metric]) -> Result<()>;

    /// # Errors
    ///
    /// [`StorageError::NotFound`] when no metric of `kind` is called `name`.
    async fn get_metric(&self, kind: MetricKind, name: &str) -> Result<Metric>;

    async fn get_metrics(&self) -> Result<Vec<Metric>>;

    /// Writes a snapshot to `path`, truncating any previous content.
    async fn save(&self, path: &Path) -> Result<()>;

    /// Replaces the whole state with the snapshot at `path`. A missing file
    /// restores an empty state.
    async fn restore(&self, path: &Path) -> Result<()>;

    async fn ping(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
