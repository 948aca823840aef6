use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::warn;

/// Sampling frequency assumed when a job does not set `freq`.
pub const DEFAULT_FREQUENCY: &str = "1min";

/// Free-form backend parameters.
///
/// Stored as a JSON object so each backend can pick the keys it understands;
/// typed accessors cover the common ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelParams(Map<String, Value>);

impl ModelParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(Error::Config(format!(
                "model parameters must be a JSON object, got {}",
                other
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    /// Sampling frequency (`freq`), e.g. `"1min"`, `"5T"`, `"1H"`.
    pub fn frequency(&self) -> &str {
        self.get_str("freq").unwrap_or(DEFAULT_FREQUENCY)
    }

    /// Sampling step in milliseconds derived from [`Self::frequency`].
    pub fn step_ms(&self) -> i64 {
        parse_frequency(self.frequency()).as_millis() as i64
    }
}

/// Parse a pandas-style frequency string into a step.
///
/// Understands `S`, `T`/`MIN`, `H` and `D`, optionally prefixed with a
/// multiple (`5T`, `5min`, `30S`). Anything else falls back to one minute.
pub fn parse_frequency(freq: &str) -> Duration {
    const UNITS: [(&str, u64); 5] = [("MIN", 60), ("T", 60), ("S", 1), ("H", 3600), ("D", 86_400)];

    let upper = freq.trim().to_ascii_uppercase();
    for (suffix, unit_secs) in UNITS {
        if let Some(count) = upper.strip_suffix(suffix) {
            let count = if count.is_empty() {
                Some(1)
            } else {
                count.parse::<u64>().ok()
            };
            if let Some(count) = count.filter(|c| *c > 0) {
                return Duration::from_secs(count * unit_secs);
            }
        }
    }

    warn!(freq = %freq, "Unknown frequency, defaulting to 60s");
    Duration::from_secs(60)
}
