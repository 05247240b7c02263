//! Host samplers for the metrika agent.
//!
//! Each [`Collector`] reads one family of host statistics and returns them as
//! gauges ready to be merged into the agent cache.

pub mod runtime;
pub mod util;

use anyhow::Result;
use metrika_common::Metric;

pub use runtime::{CountingAllocator, RuntimeCollector};
pub use util::UtilCollector;

/// A periodic source of gauge samples.
///
/// The agent calls [`collect`](Collector::collect) once per poll tick from a
/// dedicated task, so implementations may keep state between calls.
pub trait Collector: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Reads the current values.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails.
    fn collect(&mut self) -> Result<Vec<Metric>>;
}
