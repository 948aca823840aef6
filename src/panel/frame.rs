use crate::labels::{LabelCodec, LabelSet, SeriesId};

use std::collections::BTreeMap;
use tracing::debug;

/// Join key of a panel: one series at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PanelKey {
    /// Epoch milliseconds
    pub timestamp: i64,
    pub series: SeriesId,
}

impl PanelKey {
    pub fn new(timestamp: i64, series: SeriesId) -> Self {
        Self { timestamp, series }
    }
}

/// A single time-stamped value of one series.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Epoch milliseconds
    pub timestamp: i64,
    pub series: SeriesId,
    pub value: f64,
}

impl Observation {
    pub fn new(timestamp: i64, series: SeriesId, value: f64) -> Self {
        Self {
            timestamp,
            series,
            value,
        }
    }
}

/// Immutable panel of observations keyed by (timestamp, series).
///
/// Frames are only produced by [`PanelBuilder`] or by the join operations,
/// which always return new frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelFrame {
    points: BTreeMap<PanelKey, f64>,
}

impl PanelFrame {
    pub fn builder() -> PanelBuilder {
        PanelBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, timestamp: i64, series: &SeriesId) -> Option<f64> {
        self.points
            .get(&PanelKey::new(timestamp, series.clone()))
            .copied()
    }

    pub(crate) fn get_key(&self, key: &PanelKey) -> Option<f64> {
        self.points.get(key).copied()
    }

    /// Observations ordered by (timestamp, series).
    pub fn observations(&self) -> impl Iterator<Item = Observation> + '_ {
        self.points
            .iter()
            .map(|(k, v)| Observation::new(k.timestamp, k.series.clone(), *v))
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&PanelKey, f64)> {
        self.points.iter().map(|(k, v)| (k, *v))
    }

    /// Number of distinct series in the frame.
    pub fn series_count(&self) -> usize {
        self.by_series().len()
    }

    /// Regroup into per-series `(timestamp, value)` vectors sorted by time.
    pub fn by_series(&self) -> BTreeMap<SeriesId, Vec<(i64, f64)>> {
        let mut grouped: BTreeMap<SeriesId, Vec<(i64, f64)>> = BTreeMap::new();
        // Keys are ordered by timestamp first, so each vector comes out sorted
        for (key, value) in &self.points {
            grouped
                .entry(key.series.clone())
                .or_default()
                .push((key.timestamp, *value));
        }
        grouped
    }

    /// Last timestamp in the frame, if any.
    pub fn max_timestamp(&self) -> Option<i64> {
        self.points.keys().next_back().map(|k| k.timestamp)
    }
}

/// Single-owner builder for [`PanelFrame`].
///
/// Missing values (NaN) are dropped rather than zero-filled. A second value
/// for an existing (timestamp, series) key is ignored so the first
/// occurrence wins.
#[derive(Debug, Default)]
pub struct PanelBuilder {
    points: BTreeMap<PanelKey, f64>,
    dropped_missing: usize,
    dropped_duplicates: usize,
}

impl PanelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observation. Returns `true` if it was kept.
    pub fn push(&mut self, observation: Observation) -> bool {
        self.push_value(observation.timestamp, observation.series, observation.value)
    }

    /// Add a value for the series identified by `labels`.
    pub fn push_labeled(&mut self, timestamp: i64, labels: &LabelSet, value: f64) -> bool {
        self.push_value(timestamp, LabelCodec::encode(labels), value)
    }

    pub fn push_value(&mut self, timestamp: i64, series: SeriesId, value: f64) -> bool {
        if value.is_nan() {
            self.dropped_missing += 1;
            return false;
        }
        match self.points.entry(PanelKey::new(timestamp, series)) {
            std::collections::btree_map::Entry::Occupied(_) => {
                self.dropped_duplicates += 1;
                false
            }
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Record a value that was absent at the source.
    pub fn skip_missing(&mut self) {
        self.dropped_missing += 1;
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn finish(self) -> PanelFrame {
        if self.dropped_missing > 0 || self.dropped_duplicates > 0 {
            debug!(
                kept = self.points.len(),
                dropped_missing = self.dropped_missing,
                dropped_duplicates = self.dropped_duplicates,
                "Built panel with dropped observations"
            );
        }
        PanelFrame {
            points: self.points,
        }
    }
}

impl FromIterator<Observation> for PanelFrame {
    fn from_iter<I: IntoIterator<Item = Observation>>(iter: I) -> Self {
        let mut builder = PanelBuilder::new();
        for obs in iter {
            builder.push(obs);
        }
        builder.finish()
    }
}
