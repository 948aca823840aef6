use super::telemetry;
use super::{RunContext, RunOutcome, SkipReason, WriteSummary};
use crate::clock::{align_to_minute, Clock};
use crate::labels::LabelSet;
use crate::panel::{inner_join, ForecastComponent, ForecastFrame};
use crate::schema::ANOMALY_SCORE_METRIC;
use crate::scoring::AnomalyScorer;
use crate::tsdb::{read_panel, write_panel, QueryWindow, TsdbClient};
use crate::{Error, Result};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Detection job parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionJobConfig {
    pub name: String,
    /// Realtime series selector.
    pub query: String,
    pub lookback_minutes: i64,
    pub step_secs: u64,
    /// Static labels added to every written score row.
    pub extra_labels: LabelSet,
}

impl Default for DetectionJobConfig {
    fn default() -> Self {
        Self {
            name: "detection".to_string(),
            query: String::new(),
            lookback_minutes: 5,
            step_secs: 60,
            extra_labels: LabelSet::new(),
        }
    }
}

impl DetectionJobConfig {
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(Error::Config("detection query must not be empty".to_string()));
        }
        if self.lookback_minutes <= 0 {
            return Err(Error::Config("lookback_minutes must be positive".to_string()));
        }
        if self.step_secs == 0 {
            return Err(Error::Config("step_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn lookback(&self) -> TimeDelta {
        TimeDelta::minutes(self.lookback_minutes)
    }

    pub fn step(&self) -> Duration {
        Duration::from_secs(self.step_secs)
    }
}

/// Detection run stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionStage {
    FetchRealtime,
    FetchForecast,
    Join,
    Score,
    Write,
    Done,
    Skipped,
}

impl DetectionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionStage::FetchRealtime => "fetch_realtime",
            DetectionStage::FetchForecast => "fetch_forecast",
            DetectionStage::Join => "join",
            DetectionStage::Score => "score",
            DetectionStage::Write => "write",
            DetectionStage::Done => "done",
            DetectionStage::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionReport {
    pub realtime_points: usize,
    pub forecast_points: usize,
    /// Keys present on both sides of the join.
    pub matched: usize,
    pub scored: usize,
    /// Matched rows skipped for a missing forecast component.
    pub incomplete: usize,
    pub degenerate: usize,
    pub anomalous: usize,
    pub writes: WriteSummary,
}

pub struct DetectionJob {
    config: DetectionJobConfig,
    tsdb: TsdbClient,
    clock: Arc<dyn Clock>,
}

impl DetectionJob {
    pub fn new(config: DetectionJobConfig, tsdb: TsdbClient, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, tsdb, clock })
    }

    pub fn config(&self) -> &DetectionJobConfig {
        &self.config
    }

    pub async fn run(&self, ctx: &RunContext) -> Result<RunOutcome<DetectionReport>> {
        let started = Instant::now();
        let result = self.execute(ctx).await;
        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(outcome) => telemetry::record_run(ctx.kind().as_str(), outcome.label(), elapsed),
            Err(e) => {
                telemetry::record_run(ctx.kind().as_str(), "failed", elapsed);
                error!(parent: ctx.span(), error = %e, "Detection run failed");
            }
        }
        result
    }

    async fn execute(&self, ctx: &RunContext) -> Result<RunOutcome<DetectionReport>> {
        let end = align_to_minute(self.clock.now());
        let window = QueryWindow::ending_at(end, self.config.lookback(), self.config.step());
        let reader = self.tsdb.reader.as_ref();

        stage(ctx, DetectionStage::FetchRealtime);
        let realtime = read_panel(ctx, reader, &self.config.query, &window).await?;

        stage(ctx, DetectionStage::FetchForecast);
        let pred = read_panel(ctx, reader, ForecastComponent::Pred.metric_name(), &window).await?;
        let lower = read_panel(ctx, reader, ForecastComponent::Lower.metric_name(), &window).await?;
        let upper = read_panel(ctx, reader, ForecastComponent::Upper.metric_name(), &window).await?;

        if realtime.is_empty() {
            return Ok(skip(ctx, SkipReason::NoRealtimeData));
        }
        if pred.is_empty() {
            return Ok(skip(ctx, SkipReason::NoForecastData));
        }

        stage(ctx, DetectionStage::Join);
        let forecast = ForecastFrame::outer_join([
            (ForecastComponent::Pred, &pred),
            (ForecastComponent::Lower, &lower),
            (ForecastComponent::Upper, &upper),
        ]);
        let matched = inner_join(&realtime, &forecast);
        if matched.is_empty() {
            return Ok(skip(ctx, SkipReason::NoOverlap));
        }

        stage(ctx, DetectionStage::Score);
        let scored = AnomalyScorer::score_rows(&matched);
        if scored.incomplete > 0 {
            warn!(
                parent: ctx.span(),
                incomplete = scored.incomplete,
                "Matched rows with missing forecast components were not scored"
            );
        }
        if scored.scores.is_empty() {
            return Ok(skip(ctx, SkipReason::IncompleteForecast));
        }
        telemetry::record_scored_points(scored.scores.len() as u64);

        stage(ctx, DetectionStage::Write);
        let mut writes = WriteSummary::default();
        writes.record(
            write_panel(
                ctx,
                self.tsdb.writer.as_ref(),
                &scored.scores,
                ANOMALY_SCORE_METRIC,
                &self.config.extra_labels,
            )
            .await,
        );

        stage(ctx, DetectionStage::Done);
        let report = DetectionReport {
            realtime_points: realtime.len(),
            forecast_points: forecast.len(),
            matched: matched.len(),
            scored: scored.scores.len(),
            incomplete: scored.incomplete,
            degenerate: scored.degenerate,
            anomalous: scored.anomalous,
            writes,
        };
        info!(
            parent: ctx.span(),
            scored = report.scored,
            anomalous = report.anomalous,
            write_failures = writes.failed,
            "Anomaly scores written"
        );
        Ok(RunOutcome::Completed(report))
    }
}

fn stage(ctx: &RunContext, stage: DetectionStage) {
    debug!(parent: ctx.span(), stage = stage.as_str(), "Detection stage");
}

fn skip<R>(ctx: &RunContext, reason: SkipReason) -> RunOutcome<R> {
    stage(ctx, DetectionStage::Skipped);
    info!(parent: ctx.span(), reason = reason.as_str(), "Skipping detection");
    RunOutcome::Skipped(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::context::RunKind;
    use crate::labels::LabelCodec;
    use crate::tsdb::MemoryTsdb;
    use chrono::{TimeZone, Utc};

    const MINUTE: i64 = 60_000;

    fn job(tsdb: &Arc<MemoryTsdb>) -> DetectionJob {
        // Window covers [0, 5min]
        let clock = Arc::new(ManualClock::new(
            Utc.timestamp_millis_opt(5 * MINUTE + 30_000).unwrap(),
        ));
        DetectionJob::new(
            DetectionJobConfig {
                query: "cpu".to_string(),
                ..Default::default()
            },
            TsdbClient::new(tsdb.clone()),
            clock,
        )
        .unwrap()
    }

    fn seed_forecast(tsdb: &MemoryTsdb, labels: &LabelSet, ts: i64, pred: f64, half_width: f64) {
        tsdb.insert("anomaly_pred", labels, ts, pred);
        tsdb.insert("anomaly_lower", labels, ts, pred - half_width);
        tsdb.insert("anomaly_upper", labels, ts, pred + half_width);
    }

    #[tokio::test]
    async fn test_scores_realtime_against_forecast() {
        let tsdb = Arc::new(MemoryTsdb::new());
        let a = LabelSet::new().with("job", "a");
        for (i, v) in [10.0, 12.0, 14.0].into_iter().enumerate() {
            tsdb.insert("cpu", &a, i as i64 * MINUTE, v);
        }
        for i in 1..4 {
            seed_forecast(&tsdb, &a, i * MINUTE, 10.0, 2.0);
        }

        let ctx = RunContext::new(RunKind::Detection, "cpu");
        let outcome = job(&tsdb).run(&ctx).await.unwrap();
        let report = outcome.completed().unwrap();
        assert_eq!(report.matched, 2);
        assert_eq!(report.anomalous, 1);

        let written = tsdb.series("anomaly_score");
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].0, a);
        assert_eq!(written[0].1, vec![(MINUTE, 1.0), (2 * MINUTE, 2.0)]);
        assert_eq!(LabelCodec::encode(&written[0].0), LabelCodec::encode(&a));
    }

    #[tokio::test]
    async fn test_skips_without_overlap() {
        let tsdb = Arc::new(MemoryTsdb::new());
        tsdb.insert("cpu", &LabelSet::new().with("job", "a"), 0, 1.0);
        seed_forecast(&tsdb, &LabelSet::new().with("job", "b"), 0, 1.0, 1.0);

        let ctx = RunContext::new(RunKind::Detection, "cpu");
        let outcome = job(&tsdb).run(&ctx).await.unwrap();
        assert_eq!(outcome, RunOutcome::Skipped(SkipReason::NoOverlap));
        assert_eq!(tsdb.write_batches(), 0);
    }

    #[tokio::test]
    async fn test_skips_when_bounds_are_missing() {
        let tsdb = Arc::new(MemoryTsdb::new());
        let a = LabelSet::new().with("job", "a");
        for i in 0..3 {
            tsdb.insert("cpu", &a, i * MINUTE, 10.0);
            tsdb.insert("anomaly_pred", &a, i * MINUTE, 10.0);
        }

        let ctx = RunContext::new(RunKind::Detection, "cpu");
        let outcome = job(&tsdb).run(&ctx).await.unwrap();
        assert_eq!(outcome, RunOutcome::Skipped(SkipReason::IncompleteForecast));
        assert_eq!(tsdb.write_batches(), 0);
    }

    #[tokio::test]
    async fn test_reads_global_forecast_metrics() {
        let tsdb = Arc::new(MemoryTsdb::new());
        let ctx = RunContext::new(RunKind::Detection, "cpu");
        let outcome = job(&tsdb).run(&ctx).await.unwrap();
        assert_eq!(outcome, RunOutcome::Skipped(SkipReason::NoRealtimeData));
        assert_eq!(
            tsdb.queries(),
            vec!["cpu", "anomaly_pred", "anomaly_lower", "anomaly_upper"]
        );
    }
}
