//! Model artifact cache
//!
//! Decides per run whether a persisted model can be reused or must be refit,
//! and persists freshly fit models. Freshness is derived from the artifact's
//! last-modified time in the object store compared against the cache's clock;
//! nothing about the cache is kept in process.
//!
//! Every failure on the way to a loaded model degrades to refitting. Saving
//! is best effort. Two runs refitting the same key concurrently race, and the
//! last writer wins.

mod artifact;

pub use artifact::{
    ArtifactEnvelope, ArtifactHandle, ArtifactKey, ArtifactState, CacheAction, CacheEntry,
    RefitReason, ARTIFACT_FORMAT_VERSION,
};

use crate::clock::{Clock, SystemClock};
use crate::context::RunContext;
use crate::model::{Model, ModelFactory, ModelParams};
use crate::orchestrator::telemetry;
use crate::panel::PanelFrame;
use crate::{Error, Result};

use chrono::TimeDelta;
use object_store::ObjectStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Inputs for [`ModelCache::load_or_fit`].
pub struct FitRequest<'a> {
    /// `None` bypasses the cache: always fit, never save.
    pub key: Option<&'a ArtifactKey>,
    pub expiration: TimeDelta,
    pub factory: &'a dyn ModelFactory,
    pub params: &'a ModelParams,
    pub context: Arc<PanelFrame>,
}

/// How the model handed back by [`ModelCache::load_or_fit`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Loaded { age: TimeDelta },
    Refit { reason: RefitReason, saved: bool },
}

impl CacheOutcome {
    pub fn action(&self) -> CacheAction {
        match self {
            CacheOutcome::Loaded { .. } => CacheAction::Load,
            CacheOutcome::Refit { .. } => CacheAction::Refit,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            CacheOutcome::Loaded { .. } => "fresh",
            CacheOutcome::Refit { reason, .. } => reason.as_str(),
        }
    }
}

pub struct ResolvedModel {
    pub model: Box<dyn Model>,
    pub outcome: CacheOutcome,
}

impl std::fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("model_type", &self.model.model_type())
            .field("outcome", &self.outcome)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ModelCache {
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
}

impl ModelCache {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn ObjectStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Classify the artifact at `key` against `expiration`.
    ///
    /// An artifact whose last-modified time lies in the future has age zero.
    pub async fn probe(&self, key: &ArtifactKey, expiration: TimeDelta) -> Result<ArtifactState> {
        let meta = match self.store.head(key.path()).await {
            Ok(meta) => meta,
            Err(object_store::Error::NotFound { .. }) => return Ok(ArtifactState::NoEntry),
            Err(e) => return Err(e.into()),
        };

        let age = (self.clock.now() - meta.last_modified).max(TimeDelta::zero());
        let handle = ArtifactHandle {
            key: key.clone(),
            last_modified: meta.last_modified,
            age,
            size: meta.size,
        };
        if age < expiration {
            Ok(ArtifactState::Fresh(handle))
        } else {
            Ok(ArtifactState::Stale(handle))
        }
    }

    /// Decide between loading and refitting. Never fails: a probe error
    /// resolves to a refit.
    pub async fn resolve(
        &self,
        ctx: &RunContext,
        key: &ArtifactKey,
        expiration: TimeDelta,
    ) -> CacheEntry {
        match self.probe(key, expiration).await {
            Ok(ArtifactState::Fresh(handle)) => {
                debug!(parent: ctx.span(), key = %key, age_secs = handle.age.num_seconds(), "Artifact is fresh");
                CacheEntry::Load(handle)
            }
            Ok(ArtifactState::Stale(handle)) => {
                debug!(parent: ctx.span(), key = %key, age_secs = handle.age.num_seconds(), "Artifact expired");
                CacheEntry::Refit {
                    reason: RefitReason::Expired,
                    artifact: Some(handle),
                }
            }
            Ok(ArtifactState::NoEntry) => {
                debug!(parent: ctx.span(), key = %key, "No artifact");
                CacheEntry::Refit {
                    reason: RefitReason::NoEntry,
                    artifact: None,
                }
            }
            Err(e) => {
                warn!(parent: ctx.span(), key = %key, error = %e, "Artifact probe failed, refitting");
                CacheEntry::Refit {
                    reason: RefitReason::ProbeFailed,
                    artifact: None,
                }
            }
        }
    }

    /// Deserialize the artifact behind `handle` with `factory`.
    pub async fn load(
        &self,
        handle: &ArtifactHandle,
        factory: &dyn ModelFactory,
    ) -> Result<Box<dyn Model>> {
        let bytes = self.store.get(handle.key.path()).await?.bytes().await?;
        let envelope: ArtifactEnvelope = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Artifact(format!("undecodable artifact: {}", e)))?;
        envelope.check(factory.model_type())?;
        factory.load(envelope.state)
    }

    /// Persist `model` at `key`, replacing whatever was there.
    pub async fn save(&self, key: &ArtifactKey, model: &dyn Model) -> Result<()> {
        let envelope = ArtifactEnvelope::new(model.model_type(), self.clock.now(), model.save_state()?);
        let bytes = serde_json::to_vec(&envelope)?;
        self.store.put(key.path(), bytes.into()).await?;
        Ok(())
    }

    /// Run the full check, load-or-refit, save protocol.
    ///
    /// Only a failed fit is an error.
    pub async fn load_or_fit(
        &self,
        ctx: &RunContext,
        request: FitRequest<'_>,
    ) -> Result<ResolvedModel> {
        let Some(key) = request.key else {
            let model = self.fit(&request).await?;
            return Ok(self.finish(
                ctx,
                model,
                CacheOutcome::Refit {
                    reason: RefitReason::Uncached,
                    saved: false,
                },
            ));
        };

        let reason = match self.resolve(ctx, key, request.expiration).await {
            CacheEntry::Load(handle) => match self.load(&handle, request.factory).await {
                Ok(model) => {
                    return Ok(self.finish(ctx, model, CacheOutcome::Loaded { age: handle.age }));
                }
                Err(e) => {
                    warn!(parent: ctx.span(), key = %key, error = %e, "Artifact load failed, refitting");
                    RefitReason::LoadFailed
                }
            },
            CacheEntry::Refit { reason, .. } => reason,
        };

        let model = self.fit(&request).await?;
        let saved = match self.save(key, model.as_ref()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(parent: ctx.span(), key = %key, error = %e, "Artifact save failed, continuing with in-memory model");
                false
            }
        };
        Ok(self.finish(ctx, model, CacheOutcome::Refit { reason, saved }))
    }

    async fn fit(&self, request: &FitRequest<'_>) -> Result<Box<dyn Model>> {
        let mut model = request.factory.create(request.params)?;
        let context = Arc::clone(&request.context);
        tokio::task::spawn_blocking(move || -> Result<Box<dyn Model>> {
            model.fit(&context)?;
            Ok(model)
        })
        .await
        .map_err(|e| Error::Internal(format!("model fit task failed: {}", e)))?
    }

    fn finish(&self, ctx: &RunContext, model: Box<dyn Model>, outcome: CacheOutcome) -> ResolvedModel {
        telemetry::record_cache_action(outcome.action().as_str(), outcome.reason());
        info!(
            parent: ctx.span(),
            model_type = model.model_type(),
            action = outcome.action().as_str(),
            reason = outcome.reason(),
            "Model resolved"
        );
        ResolvedModel { model, outcome }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::context::RunKind;
    use crate::labels::SeriesId;
    use crate::model::NaiveFactory;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use object_store::local::LocalFileSystem;
    use object_store::memory::InMemory;
    use object_store::path::Path;
    use object_store::{
        GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, PutMultipartOpts,
        PutOptions, PutPayload, PutResult, Result as ObjectStoreResult,
    };
    use std::fmt;
    use tempfile::TempDir;

    /// In-memory store whose `head` always fails with a transport-style error.
    #[derive(Debug, Default)]
    struct UnreachableHead {
        inner: InMemory,
    }

    impl fmt::Display for UnreachableHead {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "UnreachableHead({})", self.inner)
        }
    }

    #[async_trait]
    impl ObjectStore for UnreachableHead {
        async fn put_opts(
            &self,
            location: &Path,
            payload: PutPayload,
            opts: PutOptions,
        ) -> ObjectStoreResult<PutResult> {
            self.inner.put_opts(location, payload, opts).await
        }

        async fn put_multipart_opts(
            &self,
            location: &Path,
            opts: PutMultipartOpts,
        ) -> ObjectStoreResult<Box<dyn MultipartUpload>> {
            self.inner.put_multipart_opts(location, opts).await
        }

        async fn get_opts(&self, location: &Path, options: GetOptions) -> ObjectStoreResult<GetResult> {
            self.inner.get_opts(location, options).await
        }

        async fn head(&self, _location: &Path) -> ObjectStoreResult<ObjectMeta> {
            Err(object_store::Error::Generic {
                store: "UnreachableHead",
                source: "connection reset".into(),
            })
        }

        async fn delete(&self, location: &Path) -> ObjectStoreResult<()> {
            self.inner.delete(location).await
        }

        fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, ObjectStoreResult<ObjectMeta>> {
            self.inner.list(prefix)
        }

        async fn list_with_delimiter(&self, prefix: Option<&Path>) -> ObjectStoreResult<ListResult> {
            self.inner.list_with_delimiter(prefix).await
        }

        async fn copy(&self, from: &Path, to: &Path) -> ObjectStoreResult<()> {
            self.inner.copy(from, to).await
        }

        async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> ObjectStoreResult<()> {
            self.inner.copy_if_not_exists(from, to).await
        }
    }

    fn context_panel() -> Arc<PanelFrame> {
        let series = SeriesId::from_raw(r#"{"job":"a"}"#);
        let mut builder = PanelFrame::builder();
        for (i, v) in [1.0, 2.0, 4.0, 3.0].into_iter().enumerate() {
            builder.push_value(i as i64 * 60_000, series.clone(), v);
        }
        Arc::new(builder.finish())
    }

    fn ctx() -> RunContext {
        RunContext::new(RunKind::Forecast, "test")
    }

    async fn seeded_cache() -> (ModelCache, Arc<ManualClock>, ArtifactKey) {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let cache = ModelCache::with_clock(store, clock.clone());
        let key = ArtifactKey::parse("models/cpu.json").unwrap();

        let mut model = NaiveFactory.create(&ModelParams::new()).unwrap();
        model.fit(&context_panel()).unwrap();
        cache.save(&key, model.as_ref()).await.unwrap();

        let meta = cache.store().head(key.path()).await.unwrap();
        clock.set(meta.last_modified);
        (cache, clock, key)
    }

    #[tokio::test]
    async fn test_resolve_by_age() {
        let (cache, clock, key) = seeded_cache().await;
        let ttl = TimeDelta::hours(24);

        clock.advance(TimeDelta::hours(23));
        let entry = cache.resolve(&ctx(), &key, ttl).await;
        assert_eq!(entry.action(), CacheAction::Load);

        clock.advance(TimeDelta::hours(2));
        let entry = cache.resolve(&ctx(), &key, ttl).await;
        assert_eq!(entry.action(), CacheAction::Refit);
        assert!(matches!(
            entry,
            CacheEntry::Refit {
                reason: RefitReason::Expired,
                artifact: Some(_)
            }
        ));

        let missing = ArtifactKey::parse("models/absent.json").unwrap();
        let entry = cache.resolve(&ctx(), &missing, ttl).await;
        assert_eq!(
            entry,
            CacheEntry::Refit {
                reason: RefitReason::NoEntry,
                artifact: None
            }
        );
    }

    #[tokio::test]
    async fn test_head_failure_degrades_to_refit() {
        let cache = ModelCache::new(Arc::new(UnreachableHead::default()));
        let key = ArtifactKey::parse("models/cpu.json").unwrap();

        assert!(cache.probe(&key, TimeDelta::hours(24)).await.is_err());
        let entry = cache.resolve(&ctx(), &key, TimeDelta::hours(24)).await;
        assert_eq!(
            entry,
            CacheEntry::Refit {
                reason: RefitReason::ProbeFailed,
                artifact: None
            }
        );

        let resolved = cache
            .load_or_fit(
                &ctx(),
                FitRequest {
                    key: Some(&key),
                    expiration: TimeDelta::hours(24),
                    factory: &NaiveFactory,
                    params: &ModelParams::new(),
                    context: context_panel(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            resolved.outcome,
            CacheOutcome::Refit {
                reason: RefitReason::ProbeFailed,
                saved: true
            }
        );
        assert_eq!(resolved.model.predict(&context_panel(), 3, None).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_zero_expiration_always_refits() {
        let (cache, _clock, key) = seeded_cache().await;
        let entry = cache.resolve(&ctx(), &key, TimeDelta::zero()).await;
        assert_eq!(entry.action(), CacheAction::Refit);
    }

    #[tokio::test]
    async fn test_load_or_fit_loads_fresh_artifact() {
        let (cache, clock, key) = seeded_cache().await;
        clock.advance(TimeDelta::hours(1));

        let resolved = cache
            .load_or_fit(
                &ctx(),
                FitRequest {
                    key: Some(&key),
                    expiration: TimeDelta::hours(24),
                    factory: &NaiveFactory,
                    params: &ModelParams::new(),
                    context: context_panel(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            resolved.outcome,
            CacheOutcome::Loaded {
                age: TimeDelta::hours(1)
            }
        );
        assert_eq!(resolved.model.model_type(), "naive");
    }

    #[tokio::test]
    async fn test_corrupt_artifact_degrades_to_refit_and_is_replaced() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let cache = ModelCache::new(store.clone());
        let key = ArtifactKey::parse("models/corrupt.json").unwrap();
        store
            .put(key.path(), b"not json".to_vec().into())
            .await
            .unwrap();

        let params = ModelParams::new();
        let request = || FitRequest {
            key: Some(&key),
            expiration: TimeDelta::hours(24),
            factory: &NaiveFactory,
            params: &params,
            context: context_panel(),
        };

        let resolved = cache.load_or_fit(&ctx(), request()).await.unwrap();
        assert_eq!(
            resolved.outcome,
            CacheOutcome::Refit {
                reason: RefitReason::LoadFailed,
                saved: true
            }
        );

        let resolved = cache.load_or_fit(&ctx(), request()).await.unwrap();
        assert_eq!(resolved.outcome.action(), CacheAction::Load);
    }

    #[tokio::test]
    async fn test_model_type_mismatch_is_load_failure() {
        let (cache, _clock, key) = seeded_cache().await;
        let resolved = cache
            .load_or_fit(
                &ctx(),
                FitRequest {
                    key: Some(&key),
                    expiration: TimeDelta::hours(24),
                    factory: &crate::model::SeasonalNaiveFactory,
                    params: &ModelParams::new(),
                    context: context_panel(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            resolved.outcome,
            CacheOutcome::Refit {
                reason: RefitReason::LoadFailed,
                saved: true
            }
        );
        assert_eq!(resolved.model.model_type(), "seasonal_naive");
    }

    #[tokio::test]
    async fn test_uncached_request_never_touches_store() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let cache = ModelCache::new(store.clone());

        let resolved = cache
            .load_or_fit(
                &ctx(),
                FitRequest {
                    key: None,
                    expiration: TimeDelta::hours(24),
                    factory: &NaiveFactory,
                    params: &ModelParams::new(),
                    context: context_panel(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            resolved.outcome,
            CacheOutcome::Refit {
                reason: RefitReason::Uncached,
                saved: false
            }
        );

        use futures::TryStreamExt;
        let listed: Vec<_> = store.list(None).try_collect().await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_local_filesystem_round_trip() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> =
            Arc::new(LocalFileSystem::new_with_prefix(dir.path()).unwrap());
        let cache = ModelCache::new(store);
        let key = ArtifactKey::parse("file:///forecast/cpu.json").unwrap();

        let params = ModelParams::new();
        let request = || FitRequest {
            key: Some(&key),
            expiration: TimeDelta::hours(24),
            factory: &NaiveFactory,
            params: &params,
            context: context_panel(),
        };

        let first = cache.load_or_fit(&ctx(), request()).await.unwrap();
        assert_eq!(
            first.outcome,
            CacheOutcome::Refit {
                reason: RefitReason::NoEntry,
                saved: true
            }
        );
        assert!(dir.path().join("forecast/cpu.json").exists());

        let second = cache.load_or_fit(&ctx(), request()).await.unwrap();
        assert_eq!(second.outcome.action(), CacheAction::Load);
    }

    #[tokio::test]
    async fn test_save_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        // A regular file where the key expects a directory makes the write fail
        std::fs::write(dir.path().join("blocker"), b"x").unwrap();
        let store: Arc<dyn ObjectStore> =
            Arc::new(LocalFileSystem::new_with_prefix(dir.path()).unwrap());
        let cache = ModelCache::new(store);
        let key = ArtifactKey::parse("blocker/cpu.json").unwrap();

        let resolved = cache
            .load_or_fit(
                &ctx(),
                FitRequest {
                    key: Some(&key),
                    expiration: TimeDelta::hours(24),
                    factory: &NaiveFactory,
                    params: &ModelParams::new(),
                    context: context_panel(),
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            resolved.outcome,
            CacheOutcome::Refit { saved: false, .. }
        ));
        let forecast = resolved.model.predict(&context_panel(), 2, None).unwrap();
        assert_eq!(forecast.len(), 2);
    }
}
