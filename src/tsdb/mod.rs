//! Metric storage access
//!
//! Readers return raw rows as labels-as-columns Arrow batches; writers take
//! batches in the [`crate::schema::import_schema`] layout. Panels cross this
//! boundary through [`read_panel`] and [`write_panel`].

mod import;
mod memory;
mod prometheus;

pub use import::{import_rows, to_csv, ImportRow};
pub use memory::{MemoryTsdb, Selector};
pub use prometheus::{PrometheusClient, DEFAULT_TSDB_URL};

use crate::context::RunContext;
use crate::labels::LabelSet;
use crate::orchestrator::telemetry;
use crate::panel::PanelFrame;
use crate::schema::ReservedColumns;
use crate::Result;

use arrow_array::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Time range and resolution of a range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Duration,
}

impl QueryWindow {
    /// Window of length `lookback` ending at `end`.
    pub fn ending_at(end: DateTime<Utc>, lookback: TimeDelta, step: Duration) -> Self {
        Self {
            start: end - lookback,
            end,
            step,
        }
    }
}

#[async_trait]
pub trait MetricReader: Send + Sync {
    /// Run a range query.
    async fn read(&self, query: &str, window: &QueryWindow) -> Result<Vec<RecordBatch>>;
}

#[async_trait]
pub trait MetricWriter: Send + Sync {
    /// Ingest one import batch.
    async fn write(&self, batch: RecordBatch) -> Result<()>;
}

/// Read and write halves of one metric store.
#[derive(Clone)]
pub struct TsdbClient {
    pub reader: Arc<dyn MetricReader>,
    pub writer: Arc<dyn MetricWriter>,
}

impl TsdbClient {
    pub fn new<T>(tsdb: Arc<T>) -> Self
    where
        T: MetricReader + MetricWriter + 'static,
    {
        Self {
            reader: tsdb.clone(),
            writer: tsdb,
        }
    }
}

impl std::fmt::Debug for TsdbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsdbClient").finish_non_exhaustive()
    }
}

/// Read `query` over `window` into a panel keyed by label-set identifiers.
pub async fn read_panel(
    ctx: &RunContext,
    reader: &dyn MetricReader,
    query: &str,
    window: &QueryWindow,
) -> Result<PanelFrame> {
    let batches = reader.read(query, window).await?;
    let panel = PanelFrame::from_record_batches(&batches, &ReservedColumns::default())?;
    debug!(
        parent: ctx.span(),
        query = %query,
        points = panel.len(),
        series = panel.series_count(),
        "Read panel"
    );
    Ok(panel)
}

/// What happened to one panel write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Written { rows: usize },
    Empty,
    Failed,
}

/// Write `panel` under `metric_name`, tagging each row with its decoded
/// labels plus `extra_labels`.
///
/// Failures are logged and reported, never returned: a run that computed its
/// output still completes when the store rejects it.
pub async fn write_panel(
    ctx: &RunContext,
    writer: &dyn MetricWriter,
    panel: &PanelFrame,
    metric_name: &str,
    extra_labels: &LabelSet,
) -> WriteStatus {
    if panel.is_empty() {
        debug!(parent: ctx.span(), metric = %metric_name, "Empty panel, skipping write");
        return WriteStatus::Empty;
    }

    let result = match panel.to_import_batch(metric_name, extra_labels) {
        Ok(batch) => writer.write(batch).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => {
            debug!(parent: ctx.span(), metric = %metric_name, rows = panel.len(), "Wrote panel");
            WriteStatus::Written { rows: panel.len() }
        }
        Err(e) => {
            telemetry::record_write_failure(metric_name);
            warn!(parent: ctx.span(), metric = %metric_name, rows = panel.len(), error = %e, "Write failed");
            WriteStatus::Failed
        }
    }
}
