//! Forecasting model backends
//!
//! Concrete algorithms sit behind the [`Model`] trait. Backends are looked up
//! by a model-type tag in a [`ModelRegistry`] that is populated at startup;
//! there is no runtime discovery.
//!
//! Persisting a model is split between the backend, which turns its fitted
//! state into JSON, and the [`crate::cache::ModelCache`], which stores that
//! state at a caller-supplied key.

mod params;
mod reference;
mod registry;

pub use params::{parse_frequency, ModelParams, DEFAULT_FREQUENCY};
pub use reference::{NaiveFactory, NaiveModel, SeasonalNaiveFactory, SeasonalNaiveModel};
pub use registry::ModelRegistry;

use crate::panel::{ForecastFrame, PanelFrame};
use crate::Result;

/// Lowest supported confidence level. Narrower intervals have no entry in
/// the z table and would collapse onto the point forecast.
pub const MIN_CONFIDENCE_LEVEL: f64 = 0.5;

/// A fitted or fittable forecasting model.
///
/// `fit` and `predict` are synchronous and may be CPU heavy; callers run
/// them off the async executor.
pub trait Model: Send + Sync {
    /// Registry tag of the backend.
    fn model_type(&self) -> &'static str;

    /// Fit the model on a context panel.
    fn fit(&mut self, context: &PanelFrame) -> Result<()>;

    /// Forecast `horizon` steps past the end of each series in `context`.
    ///
    /// With `confidence_level = None` the bounds equal the point forecast.
    /// Levels outside `[MIN_CONFIDENCE_LEVEL, 1)` are rejected.
    fn predict(
        &self,
        context: &PanelFrame,
        horizon: usize,
        confidence_level: Option<f64>,
    ) -> Result<ForecastFrame>;

    /// Serialize the fitted state.
    fn save_state(&self) -> Result<serde_json::Value>;
}

/// Constructor for one model backend.
pub trait ModelFactory: Send + Sync {
    fn model_type(&self) -> &'static str;

    /// New, unfitted instance.
    fn create(&self, params: &ModelParams) -> Result<Box<dyn Model>>;

    /// Rebuild a fitted instance from state produced by [`Model::save_state`].
    fn load(&self, state: serde_json::Value) -> Result<Box<dyn Model>>;
}
