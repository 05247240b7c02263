use std::fmt::Display;

/// Validation failures for a single metric.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    #[error("invalid metric type: {0}")]
    InvalidMetricType(String),
    #[error("invalid metric name: {0:?}")]
    InvalidMetricName(String),
    #[error("invalid value for metric {name}: {reason}")]
    InvalidMetricValue { name: String, reason: String },
}

impl MetricError {
    pub fn invalid_value(name: &str, reason: impl Display) -> Self {
        MetricError::InvalidMetricValue {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}
