use super::telemetry;
use super::{RunContext, RunOutcome, SkipReason, WriteSummary};
use crate::cache::{ArtifactKey, CacheOutcome, FitRequest, ModelCache};
use crate::clock::{align_to_minute, Clock};
use crate::labels::LabelSet;
use crate::model::{parse_frequency, ModelFactory, ModelParams, ModelRegistry, MIN_CONFIDENCE_LEVEL};
use crate::panel::{ForecastComponent, PanelFrame};
use crate::tsdb::{read_panel, write_panel, QueryWindow, TsdbClient};
use crate::{Error, Result};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Forecast job parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastJobConfig {
    pub name: String,
    /// Series selector fetched as model context.
    pub query: String,
    pub lookback_minutes: i64,
    /// Forecast steps per series.
    pub horizon: usize,
    /// `None` makes bounds equal the point forecast.
    pub confidence_level: Option<f64>,
    pub step_secs: u64,
    pub model_type: String,
    pub model_params: ModelParams,
    /// Where the fitted model is cached. No key, no caching.
    pub artifact_key: Option<String>,
    pub fit_expiration_hours: i64,
    /// Static labels added to every written forecast row. Detection joins on
    /// the full label set, so realtime series must carry these too.
    pub extra_labels: LabelSet,
}

impl Default for ForecastJobConfig {
    fn default() -> Self {
        Self {
            name: "forecast".to_string(),
            query: String::new(),
            lookback_minutes: 60,
            horizon: 60,
            confidence_level: Some(0.9),
            step_secs: 60,
            model_type: "naive".to_string(),
            model_params: ModelParams::new(),
            artifact_key: None,
            fit_expiration_hours: 24,
            extra_labels: LabelSet::new(),
        }
    }
}

impl ForecastJobConfig {
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(Error::Config("forecast query must not be empty".to_string()));
        }
        if self.lookback_minutes <= 0 {
            return Err(Error::Config("lookback_minutes must be positive".to_string()));
        }
        if self.step_secs == 0 {
            return Err(Error::Config("step_secs must be positive".to_string()));
        }
        if self.fit_expiration_hours < 0 {
            return Err(Error::Config(
                "fit_expiration_hours must not be negative".to_string(),
            ));
        }
        if let Some(level) = self.confidence_level {
            if !(MIN_CONFIDENCE_LEVEL..1.0).contains(&level) {
                return Err(Error::Config(format!(
                    "confidence_level must be in [{}, 1), got {}",
                    MIN_CONFIDENCE_LEVEL, level
                )));
            }
        }
        if let Some(freq) = self.model_params.get_str("freq") {
            if parse_frequency(freq) != self.step() {
                return Err(Error::Config(format!(
                    "model freq '{}' does not match step_secs {}",
                    freq, self.step_secs
                )));
            }
        }
        Ok(())
    }

    /// Model parameters with `freq` defaulted to the query step, so forecast
    /// timestamps land on the same grid as realtime samples.
    pub fn effective_model_params(&self) -> ModelParams {
        if self.model_params.get("freq").is_some() {
            return self.model_params.clone();
        }
        self.model_params
            .clone()
            .with("freq", format!("{}S", self.step_secs))
    }

    pub fn lookback(&self) -> TimeDelta {
        TimeDelta::minutes(self.lookback_minutes)
    }

    pub fn expiration(&self) -> TimeDelta {
        TimeDelta::hours(self.fit_expiration_hours)
    }

    pub fn step(&self) -> Duration {
        Duration::from_secs(self.step_secs)
    }
}

/// Forecast run stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastStage {
    FetchContext,
    ResolveModel,
    Predict,
    Write,
    Done,
    Skipped,
}

impl ForecastStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastStage::FetchContext => "fetch_context",
            ForecastStage::ResolveModel => "resolve_model",
            ForecastStage::Predict => "predict",
            ForecastStage::Write => "write",
            ForecastStage::Done => "done",
            ForecastStage::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastReport {
    pub series: usize,
    pub context_points: usize,
    pub forecast_points: usize,
    pub cache: CacheOutcome,
    pub writes: WriteSummary,
}

pub struct ForecastJob {
    config: ForecastJobConfig,
    factory: Arc<dyn ModelFactory>,
    params: ModelParams,
    artifact_key: Option<ArtifactKey>,
    tsdb: TsdbClient,
    cache: ModelCache,
    clock: Arc<dyn Clock>,
}

impl ForecastJob {
    /// Validate `config` and bind it to its model backend.
    pub fn new(
        config: ForecastJobConfig,
        registry: &ModelRegistry,
        tsdb: TsdbClient,
        cache: ModelCache,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let factory = registry.get(&config.model_type)?;
        let artifact_key = config
            .artifact_key
            .as_deref()
            .map(ArtifactKey::parse)
            .transpose()?;
        let params = config.effective_model_params();
        Ok(Self {
            config,
            factory,
            params,
            artifact_key,
            tsdb,
            cache,
            clock,
        })
    }

    pub fn config(&self) -> &ForecastJobConfig {
        &self.config
    }

    pub async fn run(&self, ctx: &RunContext) -> Result<RunOutcome<ForecastReport>> {
        let started = Instant::now();
        let result = self.execute(ctx).await;
        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(outcome) => telemetry::record_run(ctx.kind().as_str(), outcome.label(), elapsed),
            Err(e) => {
                telemetry::record_run(ctx.kind().as_str(), "failed", elapsed);
                error!(parent: ctx.span(), error = %e, "Forecast run failed");
            }
        }
        result
    }

    async fn execute(&self, ctx: &RunContext) -> Result<RunOutcome<ForecastReport>> {
        let end = align_to_minute(self.clock.now());
        let window = QueryWindow::ending_at(end, self.config.lookback(), self.config.step());

        stage(ctx, ForecastStage::FetchContext);
        let context = read_panel(ctx, self.tsdb.reader.as_ref(), &self.config.query, &window).await?;
        if context.is_empty() {
            return Ok(skip(ctx, SkipReason::EmptyContext));
        }
        info!(
            parent: ctx.span(),
            points = context.len(),
            series = context.series_count(),
            "Fetched context"
        );
        let context = Arc::new(context);

        stage(ctx, ForecastStage::ResolveModel);
        let resolved = self
            .cache
            .load_or_fit(
                ctx,
                FitRequest {
                    key: self.artifact_key.as_ref(),
                    expiration: self.config.expiration(),
                    factory: self.factory.as_ref(),
                    params: &self.params,
                    context: Arc::clone(&context),
                },
            )
            .await?;

        stage(ctx, ForecastStage::Predict);
        let model = resolved.model;
        let horizon = self.config.horizon;
        let confidence = self.config.confidence_level;
        let predict_context = Arc::clone(&context);
        let forecast = tokio::task::spawn_blocking(move || {
            model.predict(&predict_context, horizon, confidence)
        })
        .await
        .map_err(|e| Error::Internal(format!("predict task failed: {}", e)))??;
        if forecast.is_empty() {
            return Ok(skip(ctx, SkipReason::EmptyForecast));
        }

        stage(ctx, ForecastStage::Write);
        let mut writes = WriteSummary::default();
        for component in ForecastComponent::ALL {
            let panel: PanelFrame = forecast.component(component);
            let status = write_panel(
                ctx,
                self.tsdb.writer.as_ref(),
                &panel,
                component.metric_name(),
                &self.config.extra_labels,
            )
            .await;
            writes.record(status);
        }

        stage(ctx, ForecastStage::Done);
        let report = ForecastReport {
            series: context.series_count(),
            context_points: context.len(),
            forecast_points: forecast.len(),
            cache: resolved.outcome,
            writes,
        };
        info!(
            parent: ctx.span(),
            series = report.series,
            forecast_points = report.forecast_points,
            panels_written = writes.written,
            write_failures = writes.failed,
            "Forecast written"
        );
        Ok(RunOutcome::Completed(report))
    }
}

fn stage(ctx: &RunContext, stage: ForecastStage) {
    debug!(parent: ctx.span(), stage = stage.as_str(), "Forecast stage");
}

fn skip<R>(ctx: &RunContext, reason: SkipReason) -> RunOutcome<R> {
    stage(ctx, ForecastStage::Skipped);
    warn!(parent: ctx.span(), reason = reason.as_str(), "Skipping forecast");
    RunOutcome::Skipped(reason)
}
