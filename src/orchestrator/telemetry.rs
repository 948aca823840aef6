//! Run telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct RunInstruments {
    runs: Counter<u64>,
    run_duration_seconds: Histogram<f64>,
    cache_actions: Counter<u64>,
    scored_points: Histogram<u64>,
    write_failures: Counter<u64>,
}

fn instruments() -> &'static RunInstruments {
    static INSTRUMENTS: OnceLock<RunInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("driftwatch.runs");
        RunInstruments {
            runs: meter
                .u64_counter("driftwatch.runs.total")
                .with_description("Runs by kind and outcome")
                .init(),
            run_duration_seconds: meter
                .f64_histogram("driftwatch.runs.duration")
                .with_description("Run wall-clock duration")
                .with_unit("s")
                .init(),
            cache_actions: meter
                .u64_counter("driftwatch.cache.actions")
                .with_description("Model cache decisions by action and reason")
                .init(),
            scored_points: meter
                .u64_histogram("driftwatch.detection.scored_points")
                .with_description("Points scored per detection run")
                .init(),
            write_failures: meter
                .u64_counter("driftwatch.tsdb.write_failures")
                .with_description("Swallowed TSDB write failures by metric")
                .init(),
        }
    })
}

pub fn record_run(kind: &'static str, outcome: &'static str, duration_seconds: f64) {
    let i = instruments();
    let attrs = [KeyValue::new("kind", kind), KeyValue::new("outcome", outcome)];
    i.runs.add(1, &attrs);
    i.run_duration_seconds.record(duration_seconds, &attrs);
}

pub fn record_cache_action(action: &'static str, reason: &'static str) {
    instruments().cache_actions.add(
        1,
        &[
            KeyValue::new("action", action),
            KeyValue::new("reason", reason),
        ],
    );
}

pub fn record_scored_points(points: u64) {
    instruments().scored_points.record(points, &[]);
}

pub fn record_write_failure(metric: &str) {
    instruments()
        .write_failures
        .add(1, &[KeyValue::new("metric", metric.to_string())]);
}
