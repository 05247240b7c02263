//! Metric agent: samples host statistics into a local cache and reports
//! them to a metrika server on a fixed period.

pub mod cache;
pub mod config;
pub mod reporter;
pub mod sampler;
pub mod transport;

pub use cache::MetricCache;
pub use config::{AgentArgs, AgentConfig, TransportKind};
pub use reporter::Reporter;
