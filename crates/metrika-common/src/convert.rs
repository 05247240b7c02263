//! Conversions between the protobuf messages and the JSON wire types.

use crate::proto::MetricProto;
use crate::types::{Metric, MetricEnvelope};

impl From<MetricProto> for MetricEnvelope {
    fn from(p: MetricProto) -> Self {
        MetricEnvelope {
            name: p.id,
            kind: p.r#type,
            value: p.value,
            delta: p.delta,
        }
    }
}

impl From<MetricEnvelope> for MetricProto {
    fn from(e: MetricEnvelope) -> Self {
        MetricProto {
            id: e.name,
            r#type: e.kind,
            value: e.value,
            delta: e.delta,
        }
    }
}

impl From<&Metric> for MetricProto {
    fn from(m: &Metric) -> Self {
        MetricEnvelope::from(m).into()
    }
}
