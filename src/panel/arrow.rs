//! Conversion between label-as-column Arrow batches and panels

use super::frame::{PanelBuilder, PanelFrame};
use crate::labels::{LabelCodec, LabelSet};
use crate::schema::{import_schema, ReservedColumns, VARIATE_LABEL};
use crate::{Error, Result};

use arrow_array::cast::AsArray;
use arrow_array::types::{
    Float64Type, Int64Type, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType,
};
use arrow_array::{Array, ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, TimeUnit};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Value column of a raw batch: one value per row, or one list of parallel
/// variates per row.
enum ValueColumn<'a> {
    Scalar(&'a Float64Array),
    Variates(&'a ArrayRef),
}

impl PanelFrame {
    /// Build a panel from raw TSDB rows.
    ///
    /// Every column not in `reserved` is a label column; each distinct
    /// combination of label values becomes one series. Null label cells are
    /// treated as absent labels. Rows with no label columns collapse onto the
    /// empty-labels sentinel.
    ///
    /// If the value column is a list of Float64, each row expands into one
    /// series per list element, tagged with a `variate` label holding the
    /// element's index.
    pub fn from_record_batch(batch: &RecordBatch, reserved: &ReservedColumns) -> Result<Self> {
        Self::from_record_batches(std::slice::from_ref(batch), reserved)
    }

    pub fn from_record_batches(batches: &[RecordBatch], reserved: &ReservedColumns) -> Result<Self> {
        let mut builder = PanelBuilder::new();
        for batch in batches {
            append_batch(&mut builder, batch, reserved)?;
        }
        Ok(builder.finish())
    }

    /// Render the panel as an import batch for `metric_name`.
    ///
    /// Each series identifier is decoded back into labels (falling back to a
    /// `series_id` label for undecodable ids) and `extra_labels` are merged on
    /// top. Labels colliding with reserved column names are dropped.
    pub fn to_import_batch(&self, metric_name: &str, extra_labels: &LabelSet) -> Result<RecordBatch> {
        let reserved = ReservedColumns::default();
        let series = self.by_series();

        let mut decoded = Vec::with_capacity(series.len());
        let mut label_names = BTreeSet::new();
        for id in series.keys() {
            let mut labels = LabelCodec::decode(id);
            labels.merge(extra_labels);
            let labels: LabelSet = labels
                .iter()
                .filter(|(k, _)| !reserved.contains(k))
                .collect();
            label_names.extend(labels.keys().map(|k| k.to_string()));
            decoded.push(labels);
        }

        let total = self.len();
        let mut timestamps = Vec::with_capacity(total);
        let mut values = Vec::with_capacity(total);
        let mut label_columns: Vec<Vec<Option<String>>> =
            vec![Vec::with_capacity(total); label_names.len()];

        for ((_, points), labels) in series.iter().zip(decoded.iter()) {
            for (ts, value) in points {
                timestamps.push(*ts);
                values.push(*value);
                for (column, name) in label_columns.iter_mut().zip(label_names.iter()) {
                    column.push(labels.get(name).map(|v| v.to_string()));
                }
            }
        }

        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(timestamps)),
            Arc::new(Float64Array::from(values)),
            Arc::new(StringArray::from(vec![metric_name; total])),
        ];
        columns.extend(
            label_columns
                .into_iter()
                .map(|c| Arc::new(StringArray::from(c)) as ArrayRef),
        );

        Ok(RecordBatch::try_new(import_schema(&label_names), columns)?)
    }
}

fn append_batch(
    builder: &mut PanelBuilder,
    batch: &RecordBatch,
    reserved: &ReservedColumns,
) -> Result<()> {
    if batch.num_rows() == 0 {
        return Ok(());
    }

    let schema = batch.schema();
    let ts_col = batch.column_by_name(&reserved.timestamp).ok_or_else(|| {
        Error::InvalidSchema(format!("missing timestamp column '{}'", reserved.timestamp))
    })?;
    let value_col = batch.column_by_name(&reserved.value).ok_or_else(|| {
        Error::InvalidSchema(format!("missing value column '{}'", reserved.value))
    })?;

    let timestamps = timestamps_millis(ts_col)?;
    let values = value_column(value_col)?;

    let mut labels: Vec<(&str, &arrow_array::StringArray)> = Vec::new();
    for (idx, field) in schema.fields().iter().enumerate() {
        if reserved.contains(field.name()) {
            continue;
        }
        let column = batch.column(idx).as_string_opt::<i32>().ok_or_else(|| {
            Error::InvalidSchema(format!(
                "label column '{}' must be Utf8, got {}",
                field.name(),
                field.data_type()
            ))
        })?;
        labels.push((field.name().as_str(), column));
    }

    if matches!(values, ValueColumn::Variates(_))
        && labels.iter().any(|(name, _)| *name == VARIATE_LABEL)
    {
        return Err(Error::InvalidSchema(format!(
            "label column '{}' collides with multivariate expansion",
            VARIATE_LABEL
        )));
    }

    for row in 0..batch.num_rows() {
        let Some(ts) = timestamps[row] else {
            debug!(row, "Skipping row with null timestamp");
            continue;
        };

        let mut row_labels = LabelSet::new();
        for (name, column) in &labels {
            if column.is_valid(row) {
                row_labels.insert(*name, column.value(row));
            }
        }

        match &values {
            ValueColumn::Scalar(array) => {
                if array.is_valid(row) {
                    builder.push_labeled(ts, &row_labels, array.value(row));
                } else {
                    builder.skip_missing();
                }
            }
            ValueColumn::Variates(array) => {
                let Some(variates) = list_row(array, row)? else {
                    builder.skip_missing();
                    continue;
                };
                for (idx, value) in variates.into_iter().enumerate() {
                    let labels = row_labels.clone().with(VARIATE_LABEL, idx.to_string());
                    match value {
                        Some(v) => {
                            builder.push_labeled(ts, &labels, v);
                        }
                        None => builder.skip_missing(),
                    }
                }
            }
        }
    }

    Ok(())
}

fn timestamps_millis(column: &ArrayRef) -> Result<Vec<Option<i64>>> {
    fn collect<T, F>(array: &arrow_array::PrimitiveArray<T>, to_ms: F) -> Result<Vec<Option<i64>>>
    where
        T: arrow_array::ArrowPrimitiveType<Native = i64>,
        F: Fn(i64) -> Option<i64>,
    {
        array
            .iter()
            .map(|v| match v {
                Some(raw) => to_ms(raw).map(Some).ok_or_else(|| {
                    Error::InvalidData(format!("timestamp {} overflows epoch milliseconds", raw))
                }),
                None => Ok(None),
            })
            .collect()
    }

    match column.data_type() {
        DataType::Int64 => collect(column.as_primitive::<Int64Type>(), Some),
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            collect(column.as_primitive::<TimestampMillisecondType>(), Some)
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => collect(
            column.as_primitive::<TimestampNanosecondType>(),
            |v| Some(v.div_euclid(1_000_000)),
        ),
        DataType::Timestamp(TimeUnit::Second, _) => collect(
            column.as_primitive::<TimestampSecondType>(),
            |v| v.checked_mul(1_000),
        ),
        other => Err(Error::InvalidSchema(format!(
            "unsupported timestamp type {}",
            other
        ))),
    }
}

fn value_column(column: &ArrayRef) -> Result<ValueColumn<'_>> {
    match column.data_type() {
        DataType::Float64 => Ok(ValueColumn::Scalar(column.as_primitive::<Float64Type>())),
        DataType::List(field) | DataType::FixedSizeList(field, _)
            if field.data_type() == &DataType::Float64 =>
        {
            Ok(ValueColumn::Variates(column))
        }
        other => Err(Error::InvalidSchema(format!(
            "value column must be Float64 or a list of Float64, got {}",
            other
        ))),
    }
}

/// Values of one list cell, or `None` if the cell itself is null.
fn list_row(column: &ArrayRef, row: usize) -> Result<Option<Vec<Option<f64>>>> {
    if column.is_null(row) {
        return Ok(None);
    }
    let cell = if let Some(list) = column.as_list_opt::<i32>() {
        list.value(row)
    } else if let Some(list) = column.as_fixed_size_list_opt() {
        list.value(row)
    } else {
        return Err(Error::InvalidSchema(format!(
            "expected list value column, got {}",
            column.data_type()
        )));
    };
    let cell = cell
        .as_primitive_opt::<Float64Type>()
        .ok_or_else(|| Error::InvalidSchema("list values must be Float64".to_string()))?;
    Ok(Some(cell.iter().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::SeriesId;
    use arrow_array::builder::{Float64Builder, ListBuilder};
    use arrow_array::{TimestampNanosecondArray, TimestampSecondArray};
    use arrow_schema::{Field, Schema};

    fn raw_batch(
        timestamps: Vec<i64>,
        values: Vec<Option<f64>>,
        jobs: Vec<Option<&str>>,
    ) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("timestamp", DataType::Int64, false),
            Field::new("value", DataType::Float64, true),
            Field::new("__name__", DataType::Utf8, false),
            Field::new("job", DataType::Utf8, true),
        ]));
        let n = timestamps.len();
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(timestamps)),
                Arc::new(Float64Array::from(values)),
                Arc::new(StringArray::from(vec!["http_requests_total"; n])),
                Arc::new(StringArray::from(jobs)),
            ],
        )
        .unwrap()
    }

    fn job(name: &str) -> SeriesId {
        LabelCodec::encode(&LabelSet::new().with("job", name))
    }

    #[test]
    fn test_build_groups_by_label_columns() {
        let batch = raw_batch(
            vec![0, 0, 60],
            vec![Some(1.0), Some(2.0), Some(3.0)],
            vec![Some("a"), Some("b"), Some("a")],
        );
        let frame = PanelFrame::from_record_batch(&batch, &ReservedColumns::default()).unwrap();
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.series_count(), 2);
        assert_eq!(frame.get(60, &job("a")), Some(3.0));
        assert_eq!(frame.get(0, &job("b")), Some(2.0));
    }

    #[test]
    fn test_build_drops_null_values() {
        let batch = raw_batch(
            vec![0, 60],
            vec![Some(1.0), None],
            vec![Some("a"), Some("a")],
        );
        let frame = PanelFrame::from_record_batch(&batch, &ReservedColumns::default()).unwrap();
        assert_eq!(frame.len(), 1);
    }

    #[test]
    fn test_build_without_labels_uses_sentinel() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("timestamp", DataType::Int64, false),
            Field::new("value", DataType::Float64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![0, 60])),
                Arc::new(Float64Array::from(vec![1.0, 2.0])),
            ],
        )
        .unwrap();
        let frame = PanelFrame::from_record_batch(&batch, &ReservedColumns::default()).unwrap();
        let series: Vec<SeriesId> = frame.by_series().into_keys().collect();
        assert_eq!(series.len(), 1);
        assert!(series[0].is_empty_series());
    }

    #[test]
    fn test_build_rejects_non_string_labels() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("timestamp", DataType::Int64, false),
            Field::new("value", DataType::Float64, false),
            Field::new("shard", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![0])),
                Arc::new(Float64Array::from(vec![1.0])),
                Arc::new(Int64Array::from(vec![7])),
            ],
        )
        .unwrap();
        let err = PanelFrame::from_record_batch(&batch, &ReservedColumns::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(_)));
    }

    #[test]
    fn test_multivariate_row_expands_per_variate() {
        let mut values = ListBuilder::new(Float64Builder::new());
        values.values().append_value(1.0);
        values.values().append_value(2.0);
        values.values().append_value(3.0);
        values.append(true);

        let values = values.finish();
        let schema = Arc::new(Schema::new(vec![
            Field::new("timestamp", DataType::Int64, false),
            Field::new("value", values.data_type().clone(), true),
            Field::new("item_id", DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1_000])),
                Arc::new(values),
                Arc::new(StringArray::from(vec!["ds-0"])),
            ],
        )
        .unwrap();

        let frame = PanelFrame::from_record_batch(&batch, &ReservedColumns::default()).unwrap();
        let series = frame.by_series();
        assert_eq!(series.len(), 3);

        let base = LabelSet::new().with("item_id", "ds-0");
        for (idx, expected) in [1.0, 2.0, 3.0].iter().enumerate() {
            let labels = base.clone().with(VARIATE_LABEL, idx.to_string());
            let id = LabelCodec::encode(&labels);
            assert_eq!(series[&id], vec![(1_000, *expected)]);

            let mut decoded = LabelCodec::decode(&id);
            assert_eq!(decoded.get(VARIATE_LABEL), Some(idx.to_string().as_str()));
            decoded = decoded.iter().filter(|(k, _)| *k != VARIATE_LABEL).collect();
            assert_eq!(decoded, base);
        }
    }

    #[test]
    fn test_variate_label_column_conflicts_with_expansion() {
        let mut values = ListBuilder::new(Float64Builder::new());
        values.values().append_value(1.0);
        values.values().append_value(2.0);
        values.append(true);

        let values = values.finish();
        let schema = Arc::new(Schema::new(vec![
            Field::new("timestamp", DataType::Int64, false),
            Field::new("value", values.data_type().clone(), true),
            Field::new(VARIATE_LABEL, DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1_000])),
                Arc::new(values),
                Arc::new(StringArray::from(vec!["cpu0"])),
            ],
        )
        .unwrap();

        let err = PanelFrame::from_record_batch(&batch, &ReservedColumns::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(_)), "{err}");
    }

    #[test]
    fn test_timestamp_units_convert_to_millis() {
        let build = |ts: ArrayRef| {
            let schema = Arc::new(Schema::new(vec![
                Field::new("timestamp", ts.data_type().clone(), false),
                Field::new("value", DataType::Float64, false),
            ]));
            RecordBatch::try_new(schema, vec![ts, Arc::new(Float64Array::from(vec![1.0]))]).unwrap()
        };
        let reserved = ReservedColumns::default();

        let secs = build(Arc::new(TimestampSecondArray::from(vec![90])));
        let frame = PanelFrame::from_record_batch(&secs, &reserved).unwrap();
        assert_eq!(frame.max_timestamp(), Some(90_000));

        let nanos = build(Arc::new(TimestampNanosecondArray::from(vec![-1])));
        let frame = PanelFrame::from_record_batch(&nanos, &reserved).unwrap();
        assert_eq!(frame.max_timestamp(), Some(-1));

        let overflow = build(Arc::new(TimestampSecondArray::from(vec![i64::MAX / 10])));
        let err = PanelFrame::from_record_batch(&overflow, &reserved).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)), "{err}");
    }

    #[test]
    fn test_import_batch_decodes_and_merges_labels() {
        let batch = raw_batch(
            vec![0, 60],
            vec![Some(1.0), Some(2.0)],
            vec![Some("a"), Some("b")],
        );
        let frame = PanelFrame::from_record_batch(&batch, &ReservedColumns::default()).unwrap();

        let extra = LabelSet::new().with("source", "driftwatch");
        let out = frame.to_import_batch("anomaly_score", &extra).unwrap();

        assert_eq!(out.num_rows(), 2);
        let names: Vec<&str> = out
            .schema_ref()
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(names, vec!["timestamp", "value", "__name__", "job", "source"]);

        let metric = out.column(2).as_string::<i32>();
        assert_eq!(metric.value(0), "anomaly_score");
        let source = out.column(4).as_string::<i32>();
        assert_eq!(source.value(1), "driftwatch");
    }

    #[test]
    fn test_import_batch_falls_back_for_raw_ids() {
        let mut builder = PanelBuilder::new();
        builder.push_value(0, SeriesId::from_raw("legacy-id"), 4.0);
        let out = builder
            .finish()
            .to_import_batch("anomaly_pred", &LabelSet::new())
            .unwrap();
        let column = out
            .column_by_name("series_id")
            .expect("fallback label column")
            .as_string::<i32>();
        assert_eq!(column.value(0), "legacy-id");
    }
}
