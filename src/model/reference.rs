//! Built-in baseline backends
//!
//! `naive` repeats the last observed value; `seasonal_naive` repeats the
//! value observed one season earlier. Both derive their intervals from the
//! spread of in-sample residuals, widening with the square root of the
//! forecast step.

use super::{Model, ModelFactory, ModelParams, MIN_CONFIDENCE_LEVEL};
use crate::labels::SeriesId;
use crate::panel::{ForecastFrame, ForecastPoint, PanelFrame};
use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DEFAULT_SEASON_LENGTH: usize = 60;

/// Two-sided standard normal quantile for a confidence level of at least
/// [`MIN_CONFIDENCE_LEVEL`], rounded down to the nearest table entry.
fn z_score(confidence_level: f64) -> f64 {
    match confidence_level {
        x if x >= 0.99 => 2.576,
        x if x >= 0.95 => 1.96,
        x if x >= 0.90 => 1.645,
        x if x >= 0.80 => 1.282,
        _ => 0.674,
    }
}

/// Population standard deviation; zero for fewer than two residuals.
fn residual_std(residuals: &[f64]) -> f64 {
    if residuals.len() < 2 {
        return 0.0;
    }
    let n = residuals.len() as f64;
    let mean = residuals.iter().sum::<f64>() / n;
    let variance = residuals.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

fn lagged_residuals(values: &[f64], lag: usize) -> Vec<f64> {
    if values.len() <= lag {
        return Vec::new();
    }
    values[lag..]
        .iter()
        .zip(values.iter())
        .map(|(now, then)| now - then)
        .collect()
}

fn check_confidence(confidence_level: Option<f64>) -> Result<()> {
    match confidence_level {
        Some(c) if !(MIN_CONFIDENCE_LEVEL..1.0).contains(&c) => Err(Error::Model(format!(
            "confidence level must be in [{}, 1), got {}",
            MIN_CONFIDENCE_LEVEL, c
        ))),
        _ => Ok(()),
    }
}

fn push_step(
    out: &mut Vec<ForecastPoint>,
    series: &SeriesId,
    timestamp: i64,
    pred: f64,
    std: f64,
    step: usize,
    confidence_level: Option<f64>,
) {
    let half_width = match confidence_level {
        Some(c) => z_score(c) * std * (step as f64).sqrt(),
        None => 0.0,
    };
    out.push(ForecastPoint {
        timestamp,
        series: series.clone(),
        pred,
        lower: pred - half_width,
        upper: pred + half_width,
    });
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NaiveState {
    step_ms: i64,
    residual_std: BTreeMap<SeriesId, f64>,
}

/// Last-value persistence forecaster.
#[derive(Debug, Clone)]
pub struct NaiveModel {
    state: NaiveState,
}

impl NaiveModel {
    pub const MODEL_TYPE: &'static str = "naive";

    pub fn new(params: &ModelParams) -> Self {
        Self {
            state: NaiveState {
                step_ms: params.step_ms(),
                residual_std: BTreeMap::new(),
            },
        }
    }
}

impl Model for NaiveModel {
    fn model_type(&self) -> &'static str {
        Self::MODEL_TYPE
    }

    fn fit(&mut self, context: &PanelFrame) -> Result<()> {
        self.state.residual_std = context
            .by_series()
            .into_iter()
            .map(|(id, points)| {
                let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
                (id, residual_std(&lagged_residuals(&values, 1)))
            })
            .collect();
        Ok(())
    }

    fn predict(
        &self,
        context: &PanelFrame,
        horizon: usize,
        confidence_level: Option<f64>,
    ) -> Result<ForecastFrame> {
        check_confidence(confidence_level)?;
        let mut out = Vec::new();
        for (id, points) in context.by_series() {
            let Some(&(last_ts, last_value)) = points.last() else {
                continue;
            };
            // Series unseen at fit time get their spread from the context
            let std = match self.state.residual_std.get(&id) {
                Some(std) => *std,
                None => {
                    let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
                    residual_std(&lagged_residuals(&values, 1))
                }
            };
            for step in 1..=horizon {
                let ts = last_ts + step as i64 * self.state.step_ms;
                push_step(&mut out, &id, ts, last_value, std, step, confidence_level);
            }
        }
        Ok(ForecastFrame::from_points(out))
    }

    fn save_state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.state)?)
    }
}

pub struct NaiveFactory;

impl ModelFactory for NaiveFactory {
    fn model_type(&self) -> &'static str {
        NaiveModel::MODEL_TYPE
    }

    fn create(&self, params: &ModelParams) -> Result<Box<dyn Model>> {
        Ok(Box::new(NaiveModel::new(params)))
    }

    fn load(&self, state: serde_json::Value) -> Result<Box<dyn Model>> {
        let state: NaiveState = serde_json::from_value(state)
            .map_err(|e| Error::Artifact(format!("invalid naive state: {}", e)))?;
        Ok(Box::new(NaiveModel { state }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SeasonalState {
    step_ms: i64,
    season_length: usize,
    residual_std: BTreeMap<SeriesId, f64>,
}

/// Seasonal persistence forecaster.
///
/// Series shorter than one season fall back to last-value persistence.
#[derive(Debug, Clone)]
pub struct SeasonalNaiveModel {
    state: SeasonalState,
}

impl SeasonalNaiveModel {
    pub const MODEL_TYPE: &'static str = "seasonal_naive";

    pub fn new(params: &ModelParams) -> Result<Self> {
        let season_length = params
            .get_u64("season_length")
            .map(|s| s as usize)
            .unwrap_or(DEFAULT_SEASON_LENGTH);
        if season_length == 0 {
            return Err(Error::Config("season_length must be positive".to_string()));
        }
        Ok(Self {
            state: SeasonalState {
                step_ms: params.step_ms(),
                season_length,
                residual_std: BTreeMap::new(),
            },
        })
    }

    fn series_std(&self, values: &[f64]) -> f64 {
        let season = self.state.season_length;
        let lag = if values.len() > season { season } else { 1 };
        residual_std(&lagged_residuals(values, lag))
    }
}

impl Model for SeasonalNaiveModel {
    fn model_type(&self) -> &'static str {
        Self::MODEL_TYPE
    }

    fn fit(&mut self, context: &PanelFrame) -> Result<()> {
        let fitted = context
            .by_series()
            .into_iter()
            .map(|(id, points)| {
                let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
                (id, self.series_std(&values))
            })
            .collect();
        self.state.residual_std = fitted;
        Ok(())
    }

    fn predict(
        &self,
        context: &PanelFrame,
        horizon: usize,
        confidence_level: Option<f64>,
    ) -> Result<ForecastFrame> {
        check_confidence(confidence_level)?;
        let season = self.state.season_length;
        let mut out = Vec::new();
        for (id, points) in context.by_series() {
            let Some(&(last_ts, last_value)) = points.last() else {
                continue;
            };
            let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
            let std = match self.state.residual_std.get(&id) {
                Some(std) => *std,
                None => self.series_std(&values),
            };
            let n = values.len();
            for step in 1..=horizon {
                let pred = if n >= season {
                    values[n - season + (step - 1) % season]
                } else {
                    last_value
                };
                let ts = last_ts + step as i64 * self.state.step_ms;
                push_step(&mut out, &id, ts, pred, std, step, confidence_level);
            }
        }
        Ok(ForecastFrame::from_points(out))
    }

    fn save_state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.state)?)
    }
}

pub struct SeasonalNaiveFactory;

impl ModelFactory for SeasonalNaiveFactory {
    fn model_type(&self) -> &'static str {
        SeasonalNaiveModel::MODEL_TYPE
    }

    fn create(&self, params: &ModelParams) -> Result<Box<dyn Model>> {
        Ok(Box::new(SeasonalNaiveModel::new(params)?))
    }

    fn load(&self, state: serde_json::Value) -> Result<Box<dyn Model>> {
        let state: SeasonalState = serde_json::from_value(state)
            .map_err(|e| Error::Artifact(format!("invalid seasonal_naive state: {}", e)))?;
        if state.season_length == 0 {
            return Err(Error::Artifact("season_length must be positive".to_string()));
        }
        Ok(Box::new(SeasonalNaiveModel { state }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{LabelCodec, LabelSet};
    use crate::panel::Observation;

    fn job(name: &str) -> SeriesId {
        LabelCodec::encode(&LabelSet::new().with("job", name))
    }

    fn ramp(series: &str, values: &[f64]) -> PanelFrame {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Observation::new(i as i64 * 60_000, job(series), *v))
            .collect()
    }

    #[test]
    fn test_naive_forecasts_last_value() {
        let context = ramp("a", &[1.0, 2.0, 3.0, 4.0]);
        let mut model = NaiveModel::new(&ModelParams::new());
        model.fit(&context).unwrap();

        let forecast = model.predict(&context, 3, Some(0.9)).unwrap();
        assert_eq!(forecast.len(), 3);
        let points: Vec<ForecastPoint> = forecast.complete_points().collect();
        assert_eq!(points[0].timestamp, 4 * 60_000);
        assert_eq!(points[2].timestamp, 6 * 60_000);
        assert!(points.iter().all(|p| p.pred == 4.0));
        // Constant differences leave no residual spread
        assert!(points.iter().all(|p| p.lower == p.pred && p.upper == p.pred));
    }

    #[test]
    fn test_naive_interval_widens_with_horizon() {
        let context = ramp("a", &[1.0, 3.0, 2.0, 5.0, 4.0]);
        let mut model = NaiveModel::new(&ModelParams::new());
        model.fit(&context).unwrap();

        let points: Vec<ForecastPoint> = model
            .predict(&context, 4, Some(0.95))
            .unwrap()
            .complete_points()
            .collect();
        let widths: Vec<f64> = points.iter().map(|p| p.upper - p.lower).collect();
        assert!(widths[0] > 0.0);
        assert!(widths.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_naive_without_confidence_has_point_bounds() {
        let context = ramp("a", &[1.0, 3.0, 2.0]);
        let model = NaiveModel::new(&ModelParams::new());
        let points: Vec<ForecastPoint> = model
            .predict(&context, 2, None)
            .unwrap()
            .complete_points()
            .collect();
        assert!(points.iter().all(|p| p.lower == p.pred && p.upper == p.pred));
    }

    #[test]
    fn test_naive_state_round_trip() {
        let context = ramp("a", &[1.0, 3.0, 2.0, 5.0]);
        let mut model = NaiveModel::new(&ModelParams::new().with("freq", "5T"));
        model.fit(&context).unwrap();

        let restored = NaiveFactory.load(model.save_state().unwrap()).unwrap();
        assert_eq!(
            restored.predict(&context, 2, Some(0.9)).unwrap(),
            model.predict(&context, 2, Some(0.9)).unwrap()
        );
    }

    #[test]
    fn test_rejects_invalid_confidence() {
        let context = ramp("a", &[1.0, 2.0]);
        let model = NaiveModel::new(&ModelParams::new());
        assert!(model.predict(&context, 1, Some(1.5)).is_err());
        assert!(model.predict(&context, 1, Some(0.3)).is_err());
        assert!(model.predict(&context, 1, Some(0.5)).is_ok());
    }

    #[test]
    fn test_seasonal_naive_repeats_last_season() {
        let context = ramp("a", &[1.0, 2.0, 3.0, 10.0, 20.0, 30.0]);
        let params = ModelParams::new().with("season_length", 3);
        let mut model = SeasonalNaiveModel::new(&params).unwrap();
        model.fit(&context).unwrap();

        let preds: Vec<f64> = model
            .predict(&context, 4, None)
            .unwrap()
            .complete_points()
            .map(|p| p.pred)
            .collect();
        assert_eq!(preds, vec![10.0, 20.0, 30.0, 10.0]);
    }

    #[test]
    fn test_seasonal_naive_short_series_falls_back() {
        let context = ramp("a", &[1.0, 2.0]);
        let model = SeasonalNaiveModel::new(&ModelParams::new()).unwrap();
        let preds: Vec<f64> = model
            .predict(&context, 2, None)
            .unwrap()
            .complete_points()
            .map(|p| p.pred)
            .collect();
        assert_eq!(preds, vec![2.0, 2.0]);
    }

    #[test]
    fn test_seasonal_naive_rejects_zero_season() {
        let params = ModelParams::new().with("season_length", 0);
        assert!(SeasonalNaiveModel::new(&params).is_err());
    }
}
