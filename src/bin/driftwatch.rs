//! driftwatch binary
//!
//! Runs one forecast or detection job, either once or on a fixed interval.

use driftwatch::cache::ModelCache;
use driftwatch::clock::{Clock, SystemClock};
use driftwatch::config::ComponentFactory;
use driftwatch::context::{RunContext, RunKind};
use driftwatch::labels::LabelSet;
use driftwatch::model::{ModelParams, ModelRegistry};
use driftwatch::orchestrator::{
    DetectionJob, DetectionJobConfig, ForecastJob, ForecastJobConfig, RunOutcome,
};
use driftwatch::telemetry::Telemetry;

use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

/// Forecast-driven anomaly scoring
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit or load a model and write forecasts
    Forecast(ForecastArgs),
    /// Score realtime data against stored forecasts
    Detect(DetectArgs),
}

#[derive(Args, Debug)]
struct ScheduleArgs {
    /// Job name used in logs
    #[arg(long, env = "JOB_NAME")]
    name: Option<String>,

    /// Repeat the run every N seconds until interrupted
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Static label added to every written row (key=value, repeatable)
    #[arg(long = "label", value_parser = parse_label)]
    labels: Vec<(String, String)>,
}

#[derive(Args, Debug)]
struct ForecastArgs {
    /// Series selector used as model context
    #[arg(long, env = "FORECAST_QUERY")]
    query: String,

    /// Context window in minutes
    #[arg(long, default_value = "60")]
    lookback_minutes: i64,

    /// Forecast steps per series
    #[arg(long, default_value = "60")]
    horizon: usize,

    /// Confidence level of the written bounds, in [0.5, 1)
    #[arg(long, default_value = "0.9")]
    confidence_level: f64,

    /// Write point forecasts only (bounds equal the prediction)
    #[arg(long)]
    point_only: bool,

    /// Query step in seconds
    #[arg(long, default_value = "60")]
    step_secs: u64,

    /// Model backend
    #[arg(long, env = "MODEL_TYPE", default_value = "naive")]
    model: String,

    /// Model parameters as a JSON object
    #[arg(long, default_value = "{}")]
    params: String,

    /// Artifact key for caching the fitted model (no key, no caching).
    /// Stored under ARTIFACT_BACKEND, which defaults to a local directory
    /// (ARTIFACT_ROOT, default ./artifacts) so runs reuse each other's fits.
    #[arg(long, env = "ARTIFACT_KEY")]
    artifact_key: Option<String>,

    /// Hours before a cached model is refit
    #[arg(long, default_value = "24")]
    fit_expiration_hours: i64,

    #[command(flatten)]
    schedule: ScheduleArgs,
}

#[derive(Args, Debug)]
struct DetectArgs {
    /// Realtime series selector
    #[arg(long, env = "DETECTION_QUERY")]
    query: String,

    /// Realtime window in minutes
    #[arg(long, default_value = "5")]
    lookback_minutes: i64,

    /// Query step in seconds
    #[arg(long, default_value = "60")]
    step_secs: u64,

    #[command(flatten)]
    schedule: ScheduleArgs,
}

fn parse_label(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

enum Job {
    Forecast(ForecastJob),
    Detection(DetectionJob),
}

impl Job {
    fn kind(&self) -> RunKind {
        match self {
            Job::Forecast(_) => RunKind::Forecast,
            Job::Detection(_) => RunKind::Detection,
        }
    }

    fn name(&self) -> &str {
        match self {
            Job::Forecast(job) => &job.config().name,
            Job::Detection(job) => &job.config().name,
        }
    }

    async fn run(&self, ctx: &RunContext) -> driftwatch::Result<()> {
        match self {
            Job::Forecast(job) => match job.run(ctx).await? {
                RunOutcome::Completed(report) => info!(
                    parent: ctx.span(),
                    series = report.series,
                    forecast_points = report.forecast_points,
                    cache_action = report.cache.action().as_str(),
                    "Forecast run completed"
                ),
                RunOutcome::Skipped(reason) => {
                    info!(parent: ctx.span(), reason = reason.as_str(), "Forecast run skipped")
                }
            },
            Job::Detection(job) => match job.run(ctx).await? {
                RunOutcome::Completed(report) => info!(
                    parent: ctx.span(),
                    scored = report.scored,
                    anomalous = report.anomalous,
                    "Detection run completed"
                ),
                RunOutcome::Skipped(reason) => {
                    info!(parent: ctx.span(), reason = reason.as_str(), "Detection run skipped")
                }
            },
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let telemetry = Telemetry::init_for_component("driftwatch", &cli.log_level)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tsdb = ComponentFactory::create_tsdb()?;

    let (job, schedule) = match cli.command {
        Command::Forecast(args) => {
            let config = ForecastJobConfig {
                name: args
                    .schedule
                    .name
                    .clone()
                    .unwrap_or_else(|| "forecast".to_string()),
                query: args.query,
                lookback_minutes: args.lookback_minutes,
                horizon: args.horizon,
                confidence_level: (!args.point_only).then_some(args.confidence_level),
                step_secs: args.step_secs,
                model_type: args.model,
                model_params: ModelParams::from_value(serde_json::from_str(&args.params)?)?,
                artifact_key: args.artifact_key,
                fit_expiration_hours: args.fit_expiration_hours,
                extra_labels: args.schedule.labels.iter().cloned().collect::<LabelSet>(),
            };
            let cache = ModelCache::with_clock(ComponentFactory::create_object_store()?, clock.clone());
            let registry = ModelRegistry::with_builtin();
            let job = ForecastJob::new(config, &registry, tsdb, cache, clock)?;
            (Job::Forecast(job), args.schedule)
        }
        Command::Detect(args) => {
            let config = DetectionJobConfig {
                name: args
                    .schedule
                    .name
                    .clone()
                    .unwrap_or_else(|| "detection".to_string()),
                query: args.query,
                lookback_minutes: args.lookback_minutes,
                step_secs: args.step_secs,
                extra_labels: args.schedule.labels.iter().cloned().collect::<LabelSet>(),
            };
            (Job::Detection(DetectionJob::new(config, tsdb, clock)?), args.schedule)
        }
    };

    let Some(interval_secs) = schedule.interval_secs else {
        let ctx = match telemetry.run_id() {
            Some(run_id) => RunContext::with_run_id(job.kind(), job.name(), run_id),
            None => RunContext::new(job.kind(), job.name()),
        };
        job.run(&ctx).await?;
        return Ok(());
    };

    info!(job = job.name(), interval_secs, "Starting scheduled runs");
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let ctx = RunContext::new(job.kind(), job.name());
                if let Err(e) = job.run(&ctx).await {
                    error!(parent: ctx.span(), error = %e, "Run failed, waiting for next tick");
                }
            }
            _ = &mut shutdown => break,
        }
    }

    info!("driftwatch shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
