//! Column and metric-name conventions
//!
//! Rows exchanged with the TSDB use the "labels as columns" layout: a
//! timestamp column, a value column, an optional metric-name column, and one
//! nullable Utf8 column per label key.

mod columns;

pub use columns::{
    import_schema, ReservedColumns, ANOMALY_LOWER_METRIC, ANOMALY_PRED_METRIC,
    ANOMALY_SCORE_METRIC, ANOMALY_UPPER_METRIC, METRIC_NAME_FIELD, TIMESTAMP_FIELD,
    VALUE_FIELD, VARIATE_LABEL,
};
