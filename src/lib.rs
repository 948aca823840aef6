//! # driftwatch
//!
//! Forecast-driven anomaly scoring for time-series metrics.
//!
//! driftwatch reads metric series from a Prometheus-compatible TSDB, fits or
//! reuses a forecasting model, writes the forecast back as three series per
//! input (prediction, lower bound, upper bound), and later scores realtime
//! observations by how far they fall from the prediction relative to the
//! interval.
//!
//! ## Key Pieces
//!
//! - **Label codec**: label sets map to stable, opaque series identifiers so
//!   independently queried series can be rejoined
//! - **Panels**: many series co-indexed by (timestamp, series), with outer
//!   joins for forecast components and inner joins against realtime data
//! - **Model cache**: check, load-or-refit and save of fitted models on object
//!   storage with time-based expiration
//! - **Scoring**: bound-relative deviation, 0 at the prediction and 1 at a bound
//!
//! ## Runs
//!
//! - **Forecast**: context fetch, model resolution, predict, write
//! - **Detection**: realtime and forecast fetch, join, score, write

pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod labels;
pub mod model;
pub mod orchestrator;
pub mod panel;
pub mod schema;
pub mod scoring;
pub mod telemetry;
pub mod tsdb;

mod error;

pub use error::{Error, Result};

/// Commonly used types.
pub mod prelude {
    pub use crate::cache::{ArtifactKey, CacheAction, CacheEntry, ModelCache};
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::context::{RunContext, RunKind};
    pub use crate::labels::{LabelCodec, LabelSet, SeriesId};
    pub use crate::model::{Model, ModelFactory, ModelParams, ModelRegistry};
    pub use crate::orchestrator::{
        DetectionJob, DetectionJobConfig, ForecastJob, ForecastJobConfig, RunOutcome, SkipReason,
    };
    pub use crate::panel::{ForecastFrame, ForecastPoint, Observation, PanelFrame};
    pub use crate::scoring::AnomalyScorer;
    pub use crate::tsdb::{MemoryTsdb, MetricReader, MetricWriter, PrometheusClient, TsdbClient};
    pub use crate::{Error, Result};
}
