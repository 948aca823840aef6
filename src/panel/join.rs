use super::forecast::{ForecastFrame, ForecastPoint, ForecastTuple};
use super::frame::PanelFrame;
use crate::labels::SeriesId;

/// A realtime observation paired with the forecast at the same key.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRow {
    /// Epoch milliseconds
    pub timestamp: i64,
    pub series: SeriesId,
    pub actual: f64,
    pub forecast: ForecastTuple,
}

impl MatchedRow {
    /// The forecast as a point, if every component is present.
    pub fn forecast_point(&self) -> Option<ForecastPoint> {
        Some(ForecastPoint {
            timestamp: self.timestamp,
            series: self.series.clone(),
            pred: self.forecast.pred?,
            lower: self.forecast.lower?,
            upper: self.forecast.upper?,
        })
    }
}

/// Inner-join a realtime panel with forecast tuples on (timestamp, series).
///
/// Only keys present on both sides are emitted; the result is ordered by
/// (timestamp, series).
pub fn inner_join(actual: &PanelFrame, forecast: &ForecastFrame) -> Vec<MatchedRow> {
    if actual.len() <= forecast.len() {
        actual
            .entries()
            .filter_map(|(key, value)| {
                forecast.get_key(key).map(|tuple| MatchedRow {
                    timestamp: key.timestamp,
                    series: key.series.clone(),
                    actual: value,
                    forecast: *tuple,
                })
            })
            .collect()
    } else {
        forecast
            .entries()
            .filter_map(|(key, tuple)| {
                actual.get_key(key).map(|value| MatchedRow {
                    timestamp: key.timestamp,
                    series: key.series.clone(),
                    actual: value,
                    forecast: *tuple,
                })
            })
            .collect()
    }
}
