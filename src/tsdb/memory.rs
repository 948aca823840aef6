//! In-process TSDB used by tests and the `memory` backend

use super::import::import_rows;
use super::{MetricReader, MetricWriter, QueryWindow};
use crate::labels::{LabelCodec, LabelSet, SeriesId};
use crate::schema::{import_schema, METRIC_NAME_FIELD};
use crate::{Error, Result};

use arrow_array::{ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Series selector understood by [`MemoryTsdb`]: `name`, `name{k="v",...}`
/// or `{k="v",...}`. Only exact-match label matchers are supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub metric: Option<String>,
    pub matchers: Vec<(String, String)>,
}

impl Selector {
    pub fn parse(query: &str) -> Result<Self> {
        let query = query.trim();
        let (metric, rest) = match query.find('{') {
            Some(open) => (&query[..open], Some(&query[open..])),
            None => (query, None),
        };
        let metric = metric.trim();
        if !metric.is_empty() && !metric.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':') {
            return Err(Error::Read(format!("unsupported query '{}'", query)));
        }

        let mut matchers = Vec::new();
        if let Some(rest) = rest {
            let inner = rest
                .strip_prefix('{')
                .and_then(|r| r.strip_suffix('}'))
                .ok_or_else(|| Error::Read(format!("unsupported query '{}'", query)))?;
            for part in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let (key, value) = part
                    .split_once('=')
                    .ok_or_else(|| Error::Read(format!("unsupported matcher '{}'", part)))?;
                let value = value
                    .trim()
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .ok_or_else(|| Error::Read(format!("unsupported matcher '{}'", part)))?;
                matchers.push((key.trim().to_string(), value.to_string()));
            }
        }

        if metric.is_empty() && matchers.is_empty() {
            return Err(Error::Read("empty selector".to_string()));
        }
        Ok(Self {
            metric: (!metric.is_empty()).then(|| metric.to_string()),
            matchers,
        })
    }

    fn matches(&self, labels: &LabelSet) -> bool {
        if let Some(metric) = &self.metric {
            if labels.get(METRIC_NAME_FIELD) != Some(metric.as_str()) {
                return false;
            }
        }
        self.matchers
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v.as_str()))
    }
}

#[derive(Debug, Default)]
struct Inner {
    // Keyed by the encoded label set, metric name included
    series: BTreeMap<SeriesId, BTreeMap<i64, f64>>,
    queries: Vec<String>,
    write_batches: usize,
    fail_reads: bool,
    fail_writes: BTreeSet<String>,
    fail_all_writes: bool,
}

/// Thread-safe in-memory metric store.
///
/// Reads return raw samples inside the window; no step alignment or
/// lookback interpolation is applied.
#[derive(Debug, Clone, Default)]
pub struct MemoryTsdb {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryTsdb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one sample for `metric` with `labels`.
    pub fn insert(&self, metric: &str, labels: &LabelSet, timestamp: i64, value: f64) {
        let key = LabelCodec::encode(&labels.clone().with(METRIC_NAME_FIELD, metric));
        self.inner
            .write()
            .series
            .entry(key)
            .or_default()
            .insert(timestamp, value);
    }

    /// Every stored series of `metric` as `(labels without __name__, samples)`.
    pub fn series(&self, metric: &str) -> Vec<(LabelSet, Vec<(i64, f64)>)> {
        let inner = self.inner.read();
        inner
            .series
            .iter()
            .filter_map(|(id, samples)| {
                let labels = LabelCodec::decode(id);
                if labels.get(METRIC_NAME_FIELD) != Some(metric) {
                    return None;
                }
                let labels: LabelSet = labels
                    .iter()
                    .filter(|(k, _)| *k != METRIC_NAME_FIELD)
                    .collect();
                Some((labels, samples.iter().map(|(t, v)| (*t, *v)).collect()))
            })
            .collect()
    }

    /// Number of samples stored under `metric`.
    pub fn sample_count(&self, metric: &str) -> usize {
        self.series(metric).iter().map(|(_, s)| s.len()).sum()
    }

    /// Queries received so far, in order.
    pub fn queries(&self) -> Vec<String> {
        self.inner.read().queries.clone()
    }

    /// Number of accepted write calls.
    pub fn write_batches(&self) -> usize {
        self.inner.read().write_batches
    }

    pub fn fail_reads(&self, fail: bool) {
        self.inner.write().fail_reads = fail;
    }

    /// Reject every write.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.write().fail_all_writes = fail;
    }

    /// Reject writes carrying `metric`.
    pub fn fail_writes_for(&self, metric: impl Into<String>) {
        self.inner.write().fail_writes.insert(metric.into());
    }

    fn select(&self, selector: &Selector, window: &QueryWindow) -> Result<RecordBatch> {
        let inner = self.inner.read();
        let start = window.start.timestamp_millis();
        let end = window.end.timestamp_millis();

        let mut matched = Vec::new();
        let mut label_names = BTreeSet::new();
        for (id, samples) in &inner.series {
            let labels = LabelCodec::decode(id);
            if !selector.matches(&labels) {
                continue;
            }
            label_names.extend(
                labels
                    .keys()
                    .filter(|k| *k != METRIC_NAME_FIELD)
                    .map(str::to_string),
            );
            for (ts, value) in samples.range(start..=end) {
                matched.push((*ts, *value, labels.clone()));
            }
        }

        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from_iter_values(matched.iter().map(|m| m.0))),
            Arc::new(Float64Array::from_iter_values(matched.iter().map(|m| m.1))),
            Arc::new(StringArray::from_iter(
                matched.iter().map(|m| m.2.get(METRIC_NAME_FIELD)),
            )),
        ];
        for name in &label_names {
            columns.push(Arc::new(StringArray::from_iter(
                matched.iter().map(|m| m.2.get(name)),
            )));
        }
        Ok(RecordBatch::try_new(import_schema(&label_names), columns)?)
    }
}

#[async_trait]
impl MetricReader for MemoryTsdb {
    async fn read(&self, query: &str, window: &QueryWindow) -> Result<Vec<RecordBatch>> {
        {
            let mut inner = self.inner.write();
            inner.queries.push(query.to_string());
            if inner.fail_reads {
                return Err(Error::Read(format!("injected read failure for '{}'", query)));
            }
        }
        let selector = Selector::parse(query)?;
        Ok(vec![self.select(&selector, window)?])
    }
}

#[async_trait]
impl MetricWriter for MemoryTsdb {
    async fn write(&self, batch: RecordBatch) -> Result<()> {
        let rows = import_rows(&batch)?;
        let mut inner = self.inner.write();
        if inner.fail_all_writes || rows.iter().any(|r| inner.fail_writes.contains(&r.metric)) {
            return Err(Error::Write("injected write failure".to_string()));
        }
        for row in rows {
            let key = LabelCodec::encode(&row.labels.with(METRIC_NAME_FIELD, row.metric));
            inner
                .series
                .entry(key)
                .or_default()
                .insert(row.timestamp, row.value);
        }
        inner.write_batches += 1;
        Ok(())
    }
}
