use crate::error::MetricError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of metric kinds.
///
/// # Examples
///
/// ```
/// use metrika_common::types::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(kind.to_string(), "counter");
/// assert!("histogram".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub const ALL: [MetricKind; 2] = [MetricKind::Gauge, MetricKind::Counter];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            _ => Err(MetricError::InvalidMetricType(s.to_string())),
        }
    }
}

/// A typed metric value. Gauges replace, counters accumulate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Builds a gauge, refusing `NaN` and infinities, which have no JSON form.
    pub fn gauge(name: &str, value: f64) -> Result<Self, MetricError> {
        if !value.is_finite() {
            return Err(MetricError::invalid_value(name, "gauge must be finite"));
        }
        Ok(MetricValue::Gauge(value))
    }

    /// Parses the textual form used by the URL-path update route.
    pub fn parse(kind: MetricKind, name: &str, raw: &str) -> Result<Self, MetricError> {
        match kind {
            MetricKind::Gauge => raw
                .parse::<f64>()
                .map_err(|e| MetricError::invalid_value(name, e))
                .and_then(|v| MetricValue::gauge(name, v)),
            MetricKind::Counter => raw
                .parse::<i64>()
                .map(MetricValue::Counter)
                .map_err(|e| MetricError::invalid_value(name, e)),
        }
    }

    /// Merges an incoming sample into this stored value.
    ///
    /// Counter addition wraps on overflow.
    pub fn merge(self, incoming: MetricValue) -> Result<MetricValue, MetricError> {
        match (self, incoming) {
            (MetricValue::Gauge(_), MetricValue::Gauge(v)) => Ok(MetricValue::Gauge(v)),
            (MetricValue::Counter(stored), MetricValue::Counter(d)) => {
                Ok(MetricValue::Counter(stored.wrapping_add(d)))
            }
            (stored, incoming) => Err(MetricError::InvalidMetricType(format!(
                "{} cannot be merged into {}",
                incoming.kind(),
                stored.kind()
            ))),
        }
    }
}

impl fmt::Display for MetricValue {
    /// Gauges print in shortest round-trip form (`22.2`, `1`), counters as integers.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(d) => write!(f, "{d}"),
        }
    }
}

/// A named, typed metric as held by caches and stores.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Counter(delta),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Applies `incoming` to this metric: replace for gauges, add for counters.
    pub fn apply_update(&mut self, incoming: &Metric) -> Result<(), MetricError> {
        if self.name != incoming.name {
            return Err(MetricError::InvalidMetricName(incoming.name.clone()));
        }
        self.value = self.value.merge(incoming.value)?;
        Ok(())
    }
}

/// Wire form of a metric: `{"id", "type", "value"?, "delta"?}`.
///
/// `kind` stays a raw string until validated so that an unknown type is
/// reported as [`MetricError::InvalidMetricType`] rather than a decode error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEnvelope {
    #[serde(rename = "id")]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
}

impl MetricEnvelope {
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Gauge.to_string(),
            value: Some(value),
            delta: None,
        }
    }

    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Counter.to_string(),
            value: None,
            delta: Some(delta),
        }
    }
}

impl TryFrom<&MetricEnvelope> for Metric {
    type Error = MetricError;

    fn try_from(env: &MetricEnvelope) -> Result<Self, Self::Error> {
        let kind: MetricKind = env.kind.parse()?;
        if env.name.is_empty() {
            return Err(MetricError::InvalidMetricName(String::new()));
        }
        let value = match (kind, env.value, env.delta) {
            (MetricKind::Gauge, Some(v), None) => MetricValue::gauge(&env.name, v)?,
            (MetricKind::Counter, None, Some(d)) => MetricValue::Counter(d),
            (MetricKind::Gauge, _, _) => {
                return Err(MetricError::invalid_value(
                    &env.name,
                    "gauge requires `value` and no `delta`",
                ))
            }
            (MetricKind::Counter, _, _) => {
                return Err(MetricError::invalid_value(
                    &env.name,
                    "counter requires `delta` and no `value`",
                ))
            }
        };
        Ok(Metric {
            name: env.name.clone(),
            value,
        })
    }
}

impl TryFrom<MetricEnvelope> for Metric {
    type Error = MetricError;

    fn try_from(env: MetricEnvelope) -> Result<Self, Self::Error> {
        Metric::try_from(&env)
    }
}

impl From<&Metric> for MetricEnvelope {
    fn from(metric: &Metric) -> Self {
        match metric.value {
            MetricValue::Gauge(v) => MetricEnvelope::gauge(metric.name.clone(), v),
            MetricValue::Counter(d) => MetricEnvelope::counter(metric.name.clone(), d),
        }
    }
}

impl From<Metric> for MetricEnvelope {
    fn from(metric: Metric) -> Self {
        MetricEnvelope::from(&metric)
    }
}

/// Lookup key used by `POST /value/` and `GetMetric`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricQuery {
    #[serde(rename = "id")]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}
