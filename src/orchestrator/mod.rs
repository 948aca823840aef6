//! Forecast and detection runs
//!
//! A forecast run fetches context for one query, resolves a model through
//! the [`crate::cache::ModelCache`], predicts, and writes the prediction and
//! both bounds back under the fixed `anomaly_*` metric names with each input
//! series' labels. A detection run reads the realtime series and the stored
//! forecasts, joins them on (timestamp, series) and writes `anomaly_score`.
//!
//! Forecast components are read without the realtime query's selector, so
//! detection sees every stored forecast and relies on the join to discard
//! unrelated series.
//!
//! Read failures abort a run; write failures are logged and counted.

mod detection;
mod forecast;
pub(crate) mod telemetry;

pub use crate::context::{RunContext, RunKind};
pub use detection::{DetectionJob, DetectionJobConfig, DetectionReport, DetectionStage};
pub use forecast::{ForecastJob, ForecastJobConfig, ForecastReport, ForecastStage};

use crate::tsdb::WriteStatus;

/// Result of a run that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome<R> {
    Completed(R),
    Skipped(SkipReason),
}

impl<R> RunOutcome<R> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, RunOutcome::Skipped(_))
    }

    pub fn completed(&self) -> Option<&R> {
        match self {
            RunOutcome::Completed(report) => Some(report),
            RunOutcome::Skipped(_) => None,
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed(_) => "completed",
            RunOutcome::Skipped(_) => "skipped",
        }
    }
}

/// Why a run stopped early without writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The forecast context query returned no points.
    EmptyContext,
    /// The model produced no forecast points.
    EmptyForecast,
    NoRealtimeData,
    NoForecastData,
    /// Realtime and forecast panels share no (timestamp, series) key.
    NoOverlap,
    /// Every matched row lacked a forecast component, so nothing was scored.
    IncompleteForecast,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::EmptyContext => "empty_context",
            SkipReason::EmptyForecast => "empty_forecast",
            SkipReason::NoRealtimeData => "no_realtime_data",
            SkipReason::NoForecastData => "no_forecast_data",
            SkipReason::NoOverlap => "no_overlap",
            SkipReason::IncompleteForecast => "incomplete_forecast",
        }
    }
}

/// Tally of panel writes in one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub written: usize,
    pub rows: usize,
    pub failed: usize,
    pub empty: usize,
}

impl WriteSummary {
    pub(crate) fn record(&mut self, status: WriteStatus) {
        match status {
            WriteStatus::Written { rows } => {
                self.written += 1;
                self.rows += rows;
            }
            WriteStatus::Failed => self.failed += 1,
            WriteStatus::Empty => self.empty += 1,
        }
    }
}
