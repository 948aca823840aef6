//! Anomaly scoring against forecast confidence bounds
//!
//! A score is the distance between the observed value and the point
//! forecast, measured in half-widths of the confidence interval:
//!
//! ```text
//! width = upper - lower
//! width <= 1e-9  ->  |actual - pred|
//! otherwise      ->  |actual - pred| / (width / 2)
//! ```
//!
//! The score is 0 at the prediction and exactly 1 at either bound. It is
//! not clamped, so points outside the interval score above 1. Scores in
//! `[0, 1]` are normal and scores above 1 are anomalous.
//!
//! When the interval has collapsed (models that only emit point forecasts
//! write `lower == upper == pred`) the score falls back to the raw absolute
//! error, which is NOT on the 0..1 scale.

use crate::panel::{MatchedRow, PanelBuilder, PanelFrame};

/// Interval widths at or below this are treated as degenerate.
pub const DEGENERATE_WIDTH: f64 = 1e-9;

/// Conventional boundary between normal and anomalous scores.
pub const ANOMALY_THRESHOLD: f64 = 1.0;

/// Outcome of scoring a batch of matched rows.
#[derive(Debug, Default)]
pub struct ScoredPanel {
    pub scores: PanelFrame,
    /// Rows skipped because a forecast component was missing.
    pub incomplete: usize,
    /// Rows scored through the degenerate-interval branch.
    pub degenerate: usize,
    /// Rows scoring above [`ANOMALY_THRESHOLD`].
    pub anomalous: usize,
}

pub struct AnomalyScorer;

impl AnomalyScorer {
    /// Score one observation against its forecast.
    pub fn score(actual: f64, pred: f64, lower: f64, upper: f64) -> f64 {
        let deviation = (actual - pred).abs();
        let width = upper - lower;
        if width <= DEGENERATE_WIDTH {
            deviation
        } else {
            deviation / (width / 2.0)
        }
    }

    pub fn is_degenerate(lower: f64, upper: f64) -> bool {
        upper - lower <= DEGENERATE_WIDTH
    }

    /// Score every matched row independently.
    ///
    /// Rows whose forecast tuple is incomplete are skipped and counted; the
    /// output panel keeps each row's timestamp and series identifier.
    pub fn score_rows(rows: &[MatchedRow]) -> ScoredPanel {
        let mut builder = PanelBuilder::new();
        let mut scored = ScoredPanel::default();

        for row in rows {
            let Some(point) = row.forecast_point() else {
                scored.incomplete += 1;
                continue;
            };
            if Self::is_degenerate(point.lower, point.upper) {
                scored.degenerate += 1;
            }
            let score = Self::score(row.actual, point.pred, point.lower, point.upper);
            if score > ANOMALY_THRESHOLD {
                scored.anomalous += 1;
            }
            builder.push_value(row.timestamp, row.series.clone(), score);
        }

        scored.scores = builder.finish();
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{LabelCodec, LabelSet};
    use crate::panel::ForecastTuple;

    #[test]
    fn test_score_at_prediction_is_zero() {
        assert_eq!(AnomalyScorer::score(10.0, 10.0, 8.0, 12.0), 0.0);
    }

    #[test]
    fn test_score_at_bound_is_one() {
        assert_eq!(AnomalyScorer::score(12.0, 10.0, 8.0, 12.0), 1.0);
        assert_eq!(AnomalyScorer::score(8.0, 10.0, 8.0, 12.0), 1.0);
    }

    #[test]
    fn test_score_is_unbounded_outside_interval() {
        assert_eq!(AnomalyScorer::score(14.0, 10.0, 8.0, 12.0), 2.0);
        assert_eq!(AnomalyScorer::score(30.0, 10.0, 8.0, 12.0), 10.0);
    }

    #[test]
    fn test_degenerate_interval_uses_absolute_error() {
        assert_eq!(AnomalyScorer::score(7.0, 5.0, 5.0, 5.0), 2.0);
        assert!(AnomalyScorer::is_degenerate(5.0, 5.0 + 1e-10));
    }

    #[test]
    fn test_inverted_bounds_are_degenerate() {
        assert_eq!(AnomalyScorer::score(7.0, 5.0, 6.0, 4.0), 2.0);
    }

    #[test]
    fn test_score_rows_skips_incomplete() {
        let series = LabelCodec::encode(&LabelSet::new().with("job", "a"));
        let rows = vec![
            MatchedRow {
                timestamp: 0,
                series: series.clone(),
                actual: 14.0,
                forecast: ForecastTuple {
                    pred: Some(10.0),
                    lower: Some(8.0),
                    upper: Some(12.0),
                },
            },
            MatchedRow {
                timestamp: 60,
                series: series.clone(),
                actual: 14.0,
                forecast: ForecastTuple {
                    pred: Some(10.0),
                    lower: None,
                    upper: Some(12.0),
                },
            },
        ];

        let scored = AnomalyScorer::score_rows(&rows);
        assert_eq!(scored.scores.len(), 1);
        assert_eq!(scored.incomplete, 1);
        assert_eq!(scored.anomalous, 1);
        assert_eq!(scored.scores.get(0, &series), Some(2.0));
    }
}
