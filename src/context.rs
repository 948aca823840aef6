//! Per-run logging context
//!
//! Every operation that logs takes a `&RunContext` and emits its events with
//! the context's span as explicit parent, so run identity travels with each
//! log line without relying on the ambient span stack.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info_span, Span};

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Kind of orchestrated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Forecast,
    Detection,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Forecast => "forecast",
            RunKind::Detection => "detection",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunContext {
    kind: RunKind,
    run_id: String,
    job: String,
    span: Span,
}

impl RunContext {
    /// Create a context with a generated run id.
    pub fn new(kind: RunKind, job: impl Into<String>) -> Self {
        let seq = RUN_SEQ.fetch_add(1, Ordering::Relaxed);
        let run_id = format!("{}-{}-{}", kind.as_str(), Utc::now().timestamp_millis(), seq);
        Self::with_run_id(kind, job, run_id)
    }

    /// Create a context with a caller-chosen run id, e.g. one handed down by
    /// a scheduler.
    pub fn with_run_id(kind: RunKind, job: impl Into<String>, run_id: impl Into<String>) -> Self {
        let job = job.into();
        let run_id = run_id.into();
        let span = info_span!("run", kind = kind.as_str(), job = %job, run_id = %run_id);
        Self {
            kind,
            run_id,
            job,
            span,
        }
    }

    pub fn kind(&self) -> RunKind {
        self.kind
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_run_ids_are_unique() {
        let a = RunContext::new(RunKind::Forecast, "cpu");
        let b = RunContext::new(RunKind::Forecast, "cpu");
        assert_ne!(a.run_id(), b.run_id());
        assert!(a.run_id().starts_with("forecast-"));
        assert_eq!(a.job(), "cpu");
    }

    #[test]
    fn test_explicit_run_id() {
        let ctx = RunContext::with_run_id(RunKind::Detection, "cpu", "sched-42");
        assert_eq!(ctx.run_id(), "sched-42");
        assert_eq!(ctx.kind(), RunKind::Detection);
    }
}
