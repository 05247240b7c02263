pub mod convert;
pub mod error;
pub mod retry;
pub mod types;

pub use error::MetricError;
pub use retry::{Backoff, Transient};
pub use types::{Metric, MetricEnvelope, MetricKind, MetricQuery, MetricValue};

pub mod proto {
    #![allow(clippy::pedantic)]
    #![allow(clippy::missing_errors_doc)]
    #![allow(clippy::doc_markdown)]
    #![allow(clippy::default_trait_access)]
    tonic::include_proto!("metrika");
}
