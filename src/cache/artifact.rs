use crate::{Error, Result};

use chrono::{DateTime, TimeDelta, Utc};
use object_store::path::Path;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Envelope layout written by this version.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Location of a model artifact inside the artifact store.
///
/// Keys are caller supplied and not namespaced. URL forms such as
/// `s3://bucket/models/cpu.json` are accepted; scheme and bucket are
/// stripped because the store itself is already bound to a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey(Path);

impl ArtifactKey {
    pub fn parse(uri: &str) -> Result<Self> {
        let trimmed = uri.trim();
        let path = match trimmed.split_once("://") {
            Some((_, rest)) => rest.split_once('/').map(|(_, p)| p).unwrap_or(""),
            None => trimmed,
        };
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Err(Error::Config(format!(
                "artifact key '{}' does not name an object",
                uri
            )));
        }
        Path::parse(path)
            .map(Self)
            .map_err(|e| Error::Config(format!("invalid artifact key '{}': {}", uri, e)))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An artifact observed in the store by a probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactHandle {
    pub key: ArtifactKey,
    pub last_modified: DateTime<Utc>,
    /// `now - last_modified`, floored at zero.
    pub age: TimeDelta,
    pub size: usize,
}

/// Existence and age of the artifact at a key, recomputed on every probe.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactState {
    NoEntry,
    Fresh(ArtifactHandle),
    Stale(ArtifactHandle),
}

/// What the caller should do with the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    Load,
    Refit,
}

impl CacheAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheAction::Load => "load",
            CacheAction::Refit => "refit",
        }
    }
}

/// Why a run ended up fitting a fresh model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefitReason {
    NoEntry,
    Expired,
    ProbeFailed,
    LoadFailed,
    /// The job has no artifact key.
    Uncached,
}

impl RefitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefitReason::NoEntry => "no_entry",
            RefitReason::Expired => "expired",
            RefitReason::ProbeFailed => "probe_failed",
            RefitReason::LoadFailed => "load_failed",
            RefitReason::Uncached => "uncached",
        }
    }
}

/// Result of resolving a key. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    Load(ArtifactHandle),
    Refit {
        reason: RefitReason,
        /// The expired artifact, if one exists.
        artifact: Option<ArtifactHandle>,
    },
}

impl CacheEntry {
    pub fn action(&self) -> CacheAction {
        match self {
            CacheEntry::Load(_) => CacheAction::Load,
            CacheEntry::Refit { .. } => CacheAction::Refit,
        }
    }

    pub fn artifact(&self) -> Option<&ArtifactHandle> {
        match self {
            CacheEntry::Load(handle) => Some(handle),
            CacheEntry::Refit { artifact, .. } => artifact.as_ref(),
        }
    }
}

/// On-store representation of a fitted model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEnvelope {
    pub model_type: String,
    pub version: u32,
    pub fitted_at: DateTime<Utc>,
    pub state: serde_json::Value,
}

impl ArtifactEnvelope {
    pub fn new(model_type: &str, fitted_at: DateTime<Utc>, state: serde_json::Value) -> Self {
        Self {
            model_type: model_type.to_string(),
            version: ARTIFACT_FORMAT_VERSION,
            fitted_at,
            state,
        }
    }

    /// Reject envelopes written by another backend or layout version.
    pub fn check(&self, expected_model_type: &str) -> Result<()> {
        if self.version != ARTIFACT_FORMAT_VERSION {
            return Err(Error::Artifact(format!(
                "unsupported artifact version {} (expected {})",
                self.version, ARTIFACT_FORMAT_VERSION
            )));
        }
        if self.model_type != expected_model_type {
            return Err(Error::Artifact(format!(
                "artifact holds a '{}' model, expected '{}'",
                self.model_type, expected_model_type
            )));
        }
        Ok(())
    }
}
