//! Label sets and series identifiers
//!
//! A [`SeriesId`] is an opaque token derived from a [`LabelSet`]. It is the
//! only key used to group and join series, so two label sets with identical
//! pairs must always produce the same identifier regardless of the order the
//! pairs were inserted in.
//!
//! The canonical form is compact JSON with keys in lexicographic order, e.g.
//! `{"instance":"host1","job":"node"}`. The empty label set maps to the
//! sentinel [`EMPTY_SERIES_ID`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier used for series that carry no labels at all.
pub const EMPTY_SERIES_ID: &str = "series_0";

/// Label key used when an identifier cannot be decoded back to labels.
pub const FALLBACK_LABEL: &str = "series_id";

/// Set of key/value tags identifying a series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a label, returning the previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    /// Copy every pair of `other` into this set; `other` wins on conflicts.
    pub fn merge(&mut self, other: &LabelSet) {
        for (k, v) in other.iter() {
            self.0.insert(k.to_string(), v.to_string());
        }
    }
}

impl<K, V> FromIterator<(K, V)> for LabelSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<BTreeMap<String, String>> for LabelSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

/// Opaque series identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesId(String);

impl SeriesId {
    /// Wrap an identifier obtained from outside the codec, e.g. one read back
    /// from storage. No validation is done; undecodable identifiers fall back
    /// on [`LabelCodec::decode`].
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty_series(&self) -> bool {
        self.0 == EMPTY_SERIES_ID
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bidirectional mapping between label sets and series identifiers.
pub struct LabelCodec;

impl LabelCodec {
    /// Derive the canonical identifier for a label set.
    pub fn encode(labels: &LabelSet) -> SeriesId {
        if labels.is_empty() {
            return SeriesId(EMPTY_SERIES_ID.to_string());
        }

        let mut out = String::with_capacity(labels.len() * 16 + 2);
        out.push('{');
        for (i, (key, value)) in labels.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            // Value's Display is compact JSON with string escaping
            out.push_str(&serde_json::Value::from(key).to_string());
            out.push(':');
            out.push_str(&serde_json::Value::from(value).to_string());
        }
        out.push('}');
        SeriesId(out)
    }

    /// Recover the label set behind an identifier.
    ///
    /// Never fails: identifiers that are not in canonical form decode to the
    /// single-entry set `{"series_id": <id>}`.
    pub fn decode(id: &SeriesId) -> LabelSet {
        if id.is_empty_series() {
            return LabelSet::new();
        }
        match serde_json::from_str::<BTreeMap<String, String>>(id.as_str()) {
            Ok(map) => LabelSet(map),
            Err(_) => LabelSet::new().with(FALLBACK_LABEL, id.as_str()),
        }
    }
}
