use super::frame::{PanelBuilder, PanelFrame, PanelKey};
use crate::labels::SeriesId;
use crate::schema::{ANOMALY_LOWER_METRIC, ANOMALY_PRED_METRIC, ANOMALY_UPPER_METRIC};

use std::collections::BTreeMap;

/// One forecast step for one series.
///
/// `upper >= lower` is expected but not enforced; inverted bounds degrade
/// scoring rather than failing construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastPoint {
    /// Epoch milliseconds
    pub timestamp: i64,
    pub series: SeriesId,
    pub pred: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Component of a forecast stored as its own metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ForecastComponent {
    Pred,
    Lower,
    Upper,
}

impl ForecastComponent {
    pub const ALL: [ForecastComponent; 3] = [
        ForecastComponent::Pred,
        ForecastComponent::Lower,
        ForecastComponent::Upper,
    ];

    /// Metric name the component is written under.
    pub fn metric_name(&self) -> &'static str {
        match self {
            ForecastComponent::Pred => ANOMALY_PRED_METRIC,
            ForecastComponent::Lower => ANOMALY_LOWER_METRIC,
            ForecastComponent::Upper => ANOMALY_UPPER_METRIC,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastComponent::Pred => "pred",
            ForecastComponent::Lower => "lower",
            ForecastComponent::Upper => "upper",
        }
    }
}

/// Forecast components at one (timestamp, series) key. A `None` component
/// was absent from its source; it is never defaulted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ForecastTuple {
    pub pred: Option<f64>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl ForecastTuple {
    pub fn get(&self, component: ForecastComponent) -> Option<f64> {
        match component {
            ForecastComponent::Pred => self.pred,
            ForecastComponent::Lower => self.lower,
            ForecastComponent::Upper => self.upper,
        }
    }

    fn set(&mut self, component: ForecastComponent, value: f64) {
        let slot = match component {
            ForecastComponent::Pred => &mut self.pred,
            ForecastComponent::Lower => &mut self.lower,
            ForecastComponent::Upper => &mut self.upper,
        };
        *slot = Some(value);
    }

    /// Whether all three components are present.
    pub fn is_complete(&self) -> bool {
        self.pred.is_some() && self.lower.is_some() && self.upper.is_some()
    }
}

fn present(value: f64) -> Option<f64> {
    (!value.is_nan()).then_some(value)
}

/// Panel of forecast tuples keyed by (timestamp, series).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastFrame {
    points: BTreeMap<PanelKey, ForecastTuple>,
}

impl ForecastFrame {
    /// Collect model output. The first point for a key wins.
    pub fn from_points(points: impl IntoIterator<Item = ForecastPoint>) -> Self {
        let mut map = BTreeMap::new();
        for p in points {
            map.entry(PanelKey::new(p.timestamp, p.series))
                .or_insert(ForecastTuple {
                    pred: present(p.pred),
                    lower: present(p.lower),
                    upper: present(p.upper),
                });
        }
        Self { points: map }
    }

    /// Outer-join independently read component panels.
    ///
    /// Every (timestamp, series) present in any input yields one tuple;
    /// components missing from their panel stay `None`.
    pub fn outer_join<'a>(
        components: impl IntoIterator<Item = (ForecastComponent, &'a PanelFrame)>,
    ) -> Self {
        let mut map: BTreeMap<PanelKey, ForecastTuple> = BTreeMap::new();
        for (component, frame) in components {
            for (key, value) in frame.entries() {
                map.entry(key.clone()).or_default().set(component, value);
            }
        }
        Self { points: map }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, timestamp: i64, series: &SeriesId) -> Option<&ForecastTuple> {
        self.points.get(&PanelKey::new(timestamp, series.clone()))
    }

    pub(crate) fn get_key(&self, key: &PanelKey) -> Option<&ForecastTuple> {
        self.points.get(key)
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&PanelKey, &ForecastTuple)> {
        self.points.iter()
    }

    /// Project one component into its own panel, skipping absent values.
    pub fn component(&self, component: ForecastComponent) -> PanelFrame {
        let mut builder = PanelBuilder::new();
        for (key, tuple) in &self.points {
            if let Some(value) = tuple.get(component) {
                builder.push_value(key.timestamp, key.series.clone(), value);
            }
        }
        builder.finish()
    }

    /// Fully specified points, ordered by (timestamp, series).
    pub fn complete_points(&self) -> impl Iterator<Item = ForecastPoint> + '_ {
        self.points.iter().filter_map(|(key, t)| {
            Some(ForecastPoint {
                timestamp: key.timestamp,
                series: key.series.clone(),
                pred: t.pred?,
                lower: t.lower?,
                upper: t.upper?,
            })
        })
    }
}
