use arrow_schema::{DataType, Field, Schema, SchemaRef};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Standard field names
pub const TIMESTAMP_FIELD: &str = "timestamp";
pub const VALUE_FIELD: &str = "value";
pub const METRIC_NAME_FIELD: &str = "__name__";

/// Label injected into each series expanded from a multivariate row.
pub const VARIATE_LABEL: &str = "variate";

/// Output metric names shared by the forecast and detection runs.
pub const ANOMALY_PRED_METRIC: &str = "anomaly_pred";
pub const ANOMALY_LOWER_METRIC: &str = "anomaly_lower";
pub const ANOMALY_UPPER_METRIC: &str = "anomaly_upper";
pub const ANOMALY_SCORE_METRIC: &str = "anomaly_score";

/// Columns that never contribute to a series' label set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedColumns {
    pub timestamp: String,
    pub value: String,
    pub metric_name: String,
}

impl ReservedColumns {
    /// Whether a column name is one of the reserved columns.
    pub fn contains(&self, name: &str) -> bool {
        name == self.timestamp || name == self.value || name == self.metric_name
    }
}

impl Default for ReservedColumns {
    fn default() -> Self {
        Self {
            timestamp: TIMESTAMP_FIELD.to_string(),
            value: VALUE_FIELD.to_string(),
            metric_name: METRIC_NAME_FIELD.to_string(),
        }
    }
}

/// Arrow schema for rows handed to a TSDB writer.
///
/// Timestamps are unix milliseconds. Label columns follow the reserved ones
/// in sorted order and are nullable, since not every series carries every
/// label.
pub fn import_schema(label_names: &BTreeSet<String>) -> SchemaRef {
    let mut fields = vec![
        Field::new(TIMESTAMP_FIELD, DataType::Int64, false),
        Field::new(VALUE_FIELD, DataType::Float64, false),
        Field::new(METRIC_NAME_FIELD, DataType::Utf8, false),
    ];
    fields.extend(
        label_names
            .iter()
            .map(|name| Field::new(name, DataType::Utf8, true)),
    );
    Arc::new(Schema::new(fields))
}
