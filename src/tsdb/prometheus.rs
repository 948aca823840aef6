//! HTTP client for Prometheus-compatible TSDBs
//!
//! Reads go through the Prometheus `query_range` API. Writes use the
//! VictoriaMetrics CSV import endpoint.

use super::import::to_csv;
use super::{MetricReader, MetricWriter, QueryWindow};
use crate::schema::{import_schema, METRIC_NAME_FIELD};
use crate::{Error, Result};

use arrow_array::{ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default base URL (single-node VictoriaMetrics).
pub const DEFAULT_TSDB_URL: &str = "http://localhost:8428";

#[derive(Debug, Deserialize)]
struct QueryRangeResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryRangeData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryRangeData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<MatrixSeries>,
}

#[derive(Debug, Deserialize)]
struct MatrixSeries {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

#[derive(Debug, Clone)]
pub struct PrometheusClient {
    client: reqwest::Client,
    base_url: String,
}

impl PrometheusClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl MetricReader for PrometheusClient {
    async fn read(&self, query: &str, window: &QueryWindow) -> Result<Vec<RecordBatch>> {
        let url = format!("{}/api/v1/query_range", self.base_url);
        let start = window.start.timestamp().to_string();
        let end = window.end.timestamp().to_string();
        let step = format!("{}s", window.step.as_secs().max(1));

        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", query),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("step", step.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Read(format!(
                "query_range returned {}: {}",
                status,
                body.trim()
            )));
        }

        let parsed: QueryRangeResponse = serde_json::from_str(&body)?;
        let batch = matrix_to_batch(parsed)?;
        debug!(query = %query, rows = batch.num_rows(), "Fetched range");
        Ok(vec![batch])
    }
}

#[async_trait]
impl MetricWriter for PrometheusClient {
    async fn write(&self, batch: RecordBatch) -> Result<()> {
        let (format, body) = to_csv(&batch)?;
        let url = format!("{}/api/v1/import/csv", self.base_url);
        let response = self
            .client
            .post(&url)
            .query(&[("format", format.as_str())])
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Write(format!(
                "import returned {}: {}",
                status,
                text.trim()
            )));
        }
        Ok(())
    }
}

/// Flatten a `matrix` result into a labels-as-columns batch.
///
/// Sample values that do not parse as floats become NaN and are dropped
/// later by the panel builder.
fn matrix_to_batch(response: QueryRangeResponse) -> Result<RecordBatch> {
    if response.status != "success" {
        return Err(Error::Read(format!(
            "query failed ({}): {}",
            response.error_type.as_deref().unwrap_or("unknown"),
            response.error.as_deref().unwrap_or("no error message")
        )));
    }
    let data = response
        .data
        .ok_or_else(|| Error::Read("response has no data".to_string()))?;
    if data.result_type != "matrix" {
        return Err(Error::Read(format!(
            "expected a matrix result, got '{}'",
            data.result_type
        )));
    }

    let label_names: BTreeSet<String> = data
        .result
        .iter()
        .flat_map(|s| s.metric.keys())
        .filter(|k| k.as_str() != METRIC_NAME_FIELD)
        .cloned()
        .collect();

    let mut timestamps = Vec::new();
    let mut values = Vec::new();
    let mut names: Vec<Option<String>> = Vec::new();
    let mut labels: Vec<Vec<Option<String>>> = vec![Vec::new(); label_names.len()];
    for series in &data.result {
        for (ts, raw) in &series.values {
            timestamps.push((ts * 1000.0).round() as i64);
            values.push(raw.parse::<f64>().unwrap_or(f64::NAN));
            names.push(series.metric.get(METRIC_NAME_FIELD).cloned());
            for (column, name) in labels.iter_mut().zip(label_names.iter()) {
                column.push(series.metric.get(name).cloned());
            }
        }
    }

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(timestamps)),
        Arc::new(Float64Array::from(values)),
        Arc::new(StringArray::from(names)),
    ];
    columns.extend(
        labels
            .into_iter()
            .map(|c| Arc::new(StringArray::from(c)) as ArrayRef),
    );

    let schema = import_schema(&label_names);
    // Range queries over expressions may drop __name__, so the column is
    // nullable here even though writes always fill it
    let fields: Vec<_> = schema
        .fields()
        .iter()
        .map(|f| {
            if f.name() == METRIC_NAME_FIELD {
                Arc::new(f.as_ref().clone().with_nullable(true))
            } else {
                Arc::clone(f)
            }
        })
        .collect();
    let schema = Arc::new(arrow_schema::Schema::new(fields));
    Ok(RecordBatch::try_new(schema, columns)?)
}
