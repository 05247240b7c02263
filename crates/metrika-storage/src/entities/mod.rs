pub mod metric;
pub mod metric_type;
