//! Import batch decoding and CSV rendering

use crate::labels::LabelSet;
use crate::schema::{ReservedColumns, METRIC_NAME_FIELD, TIMESTAMP_FIELD, VALUE_FIELD};
use crate::{Error, Result};

use arrow_array::cast::AsArray;
use arrow_array::types::{Float64Type, Int64Type};
use arrow_array::{Array, RecordBatch};
use std::fmt::Write as _;

/// One row of an import batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRow {
    pub timestamp: i64,
    pub value: f64,
    pub metric: String,
    pub labels: LabelSet,
}

/// Decode a batch laid out by [`crate::schema::import_schema`].
pub fn import_rows(batch: &RecordBatch) -> Result<Vec<ImportRow>> {
    let column = |name: &str| {
        batch
            .column_by_name(name)
            .ok_or_else(|| Error::InvalidSchema(format!("import batch has no '{}' column", name)))
    };
    let timestamps = column(TIMESTAMP_FIELD)?
        .as_primitive_opt::<Int64Type>()
        .ok_or_else(|| Error::InvalidSchema("import timestamps must be Int64".to_string()))?;
    let values = column(VALUE_FIELD)?
        .as_primitive_opt::<Float64Type>()
        .ok_or_else(|| Error::InvalidSchema("import values must be Float64".to_string()))?;
    let metrics = column(METRIC_NAME_FIELD)?
        .as_string_opt::<i32>()
        .ok_or_else(|| Error::InvalidSchema("import metric names must be Utf8".to_string()))?;

    let schema = batch.schema();
    let reserved = ReservedColumns::default();
    let mut labels = Vec::new();
    for (idx, field) in schema.fields().iter().enumerate() {
        if reserved.contains(field.name()) {
            continue;
        }
        let array = batch.column(idx).as_string_opt::<i32>().ok_or_else(|| {
            Error::InvalidSchema(format!("label column '{}' must be Utf8", field.name()))
        })?;
        labels.push((field.name().as_str(), array));
    }

    let mut rows = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        if !timestamps.is_valid(row) || !values.is_valid(row) || !metrics.is_valid(row) {
            continue;
        }
        let mut row_labels = LabelSet::new();
        for (name, array) in &labels {
            if array.is_valid(row) {
                row_labels.insert(*name, array.value(row));
            }
        }
        rows.push(ImportRow {
            timestamp: timestamps.value(row),
            value: values.value(row),
            metric: metrics.value(row).to_string(),
            labels: row_labels,
        });
    }
    Ok(rows)
}

/// Render an import batch as VictoriaMetrics CSV.
///
/// Returns the `format` query parameter and the body. Column 1 is the unix
/// millisecond timestamp, column 2 the value, and every following column a
/// label (the metric name travels as the `__name__` label).
pub fn to_csv(batch: &RecordBatch) -> Result<(String, String)> {
    let rows = import_rows(batch)?;
    let schema = batch.schema();
    let reserved = ReservedColumns::default();
    let label_names: Vec<&str> = std::iter::once(METRIC_NAME_FIELD)
        .chain(
            schema
                .fields()
                .iter()
                .map(|f| f.name().as_str())
                .filter(|name| !reserved.contains(name)),
        )
        .collect();

    let mut format = String::from("1:time:unix_ms,2:metric:value");
    for (offset, name) in label_names.iter().enumerate() {
        let _ = write!(format, ",{}:label:{}", offset + 3, name);
    }

    let mut body = String::new();
    for row in &rows {
        let _ = write!(body, "{},{}", row.timestamp, row.value);
        for name in &label_names {
            body.push(',');
            let value = if *name == METRIC_NAME_FIELD {
                Some(row.metric.as_str())
            } else {
                row.labels.get(name)
            };
            if let Some(value) = value {
                push_csv_field(&mut body, value);
            }
        }
        body.push('\n');
    }
    Ok((format, body))
}

fn push_csv_field(out: &mut String, value: &str) {
    if value.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&value.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(value);
    }
}
