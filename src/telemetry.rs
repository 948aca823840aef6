//! Telemetry bootstrap for the driftwatch binary.
//!
//! Installs a JSON `tracing` subscriber and the OpenTelemetry tracer and
//! meter providers that back the run instruments. Exporters are left to the
//! deployment; without one, instruments are recorded in-process only.

use crate::{Error, Result};

use opentelemetry::global;
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{self, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;
use std::collections::BTreeMap;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const ATTR_SERVICE_NAME: &str = "service.name";
const ATTR_SERVICE_NAMESPACE: &str = "service.namespace";
const ATTR_RUN_ID: &str = "driftwatch.run_id";
const RUN_ID_VAR: &str = "DRIFTWATCH_TELEMETRY_RUN_ID";

/// Telemetry settings read from the standard `OTEL_*` variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub traces_sampler: String,
    /// Scheduler-provided run id, reused as the run context id.
    pub run_id: Option<String>,
    pub resource_attributes: Vec<KeyValue>,
    sampler: Sampler,
}

impl TelemetryConfig {
    pub fn from_env(default_service_name: &str) -> Result<Self> {
        Self::from_lookup(default_service_name, |name| std::env::var(name).ok())
    }

    fn from_lookup(
        default_service_name: &str,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let service_name = var("OTEL_SERVICE_NAME")
            .unwrap_or_else(|| default_service_name.to_string())
            .trim()
            .to_string();
        if service_name.is_empty() {
            return Err(Error::Config("OTEL_SERVICE_NAME cannot be empty".to_string()));
        }

        let run_id = var(RUN_ID_VAR)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let traces_sampler =
            var("OTEL_TRACES_SAMPLER").unwrap_or_else(|| "parentbased_always_on".to_string());
        let sampler = parse_sampler(&traces_sampler, var("OTEL_TRACES_SAMPLER_ARG").as_deref())?;

        let mut attrs: BTreeMap<String, String> = match var("OTEL_RESOURCE_ATTRIBUTES") {
            Some(raw) => parse_resource_attributes(&raw)?.into_iter().collect(),
            None => BTreeMap::new(),
        };
        attrs.insert(ATTR_SERVICE_NAME.to_string(), service_name.clone());
        attrs
            .entry(ATTR_SERVICE_NAMESPACE.to_string())
            .or_insert_with(|| "driftwatch".to_string());
        if let Some(run_id) = &run_id {
            attrs.insert(ATTR_RUN_ID.to_string(), run_id.clone());
        }

        Ok(Self {
            service_name,
            traces_sampler,
            run_id,
            resource_attributes: attrs
                .into_iter()
                .map(|(k, v)| KeyValue::new(k, v))
                .collect(),
            sampler,
        })
    }
}

/// Keeps the SDK providers alive until the process exits.
pub struct Telemetry {
    config: TelemetryConfig,
    tracer_provider: TracerProvider,
    meter_provider: SdkMeterProvider,
}

impl Telemetry {
    /// Initialize logging and the OTel providers for a binary.
    ///
    /// `RUST_LOG` overrides `log_level` when set.
    pub fn init_for_component(default_service_name: &str, log_level: &str) -> Result<Self> {
        let config = TelemetryConfig::from_env(default_service_name)?;
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(parse_log_level(log_level)?)
                .map_err(|e| Error::Config(format!("invalid log filter: {e}")))?,
        };

        FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .map_err(|e| Error::Config(format!("failed to initialize log subscriber: {e}")))?;

        let resource =
            Resource::default().merge(&Resource::new(config.resource_attributes.clone()));

        let tracer_provider = TracerProvider::builder()
            .with_config(
                trace::Config::default()
                    .with_sampler(config.sampler.clone())
                    .with_resource(resource.clone()),
            )
            .build();
        let _ = global::set_tracer_provider(tracer_provider.clone());

        let meter_provider = SdkMeterProvider::builder().with_resource(resource).build();
        global::set_meter_provider(meter_provider.clone());
        global::set_text_map_propagator(TraceContextPropagator::new());

        info!(
            service_name = %config.service_name,
            traces_sampler = %config.traces_sampler,
            run_id = %config.run_id.as_deref().unwrap_or("none"),
            "Telemetry initialized"
        );

        Ok(Self {
            config,
            tracer_provider,
            meter_provider,
        })
    }

    pub fn run_id(&self) -> Option<&str> {
        self.config.run_id.as_deref()
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        let _ = self.meter_provider.shutdown();
        let _ = self.tracer_provider.shutdown();
    }
}

fn parse_log_level(raw: &str) -> Result<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(Error::Config(format!(
            "invalid log level '{other}', expected one of [trace, debug, info, warn, error]"
        ))),
    }
}

fn parse_sampler(name: &str, arg: Option<&str>) -> Result<Sampler> {
    let ratio = || -> Result<f64> {
        let raw = arg.ok_or_else(|| {
            Error::Config("OTEL_TRACES_SAMPLER_ARG is required for ratio samplers".to_string())
        })?;
        let value = raw
            .trim()
            .parse::<f64>()
            .map_err(|e| Error::Config(format!("OTEL_TRACES_SAMPLER_ARG is not a float: {e}")))?;
        if !(0.0..=1.0).contains(&value) {
            return Err(Error::Config(format!(
                "OTEL_TRACES_SAMPLER_ARG must be in [0,1], got {value}"
            )));
        }
        Ok(value)
    };

    match name.trim().to_ascii_lowercase().as_str() {
        "always_on" => Ok(Sampler::AlwaysOn),
        "always_off" => Ok(Sampler::AlwaysOff),
        "traceidratio" => Ok(Sampler::TraceIdRatioBased(ratio()?)),
        "parentbased_always_on" => Ok(Sampler::ParentBased(Box::new(Sampler::AlwaysOn))),
        "parentbased_always_off" => Ok(Sampler::ParentBased(Box::new(Sampler::AlwaysOff))),
        "parentbased_traceidratio" => Ok(Sampler::ParentBased(Box::new(
            Sampler::TraceIdRatioBased(ratio()?),
        ))),
        other => Err(Error::Config(format!(
            "OTEL_TRACES_SAMPLER '{other}' is not supported"
        ))),
    }
}

fn parse_resource_attributes(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                Error::Config(format!(
                    "OTEL_RESOURCE_ATTRIBUTES entry '{pair}' is invalid, expected key=value"
                ))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::Config(
                    "OTEL_RESOURCE_ATTRIBUTES contains an empty attribute key".to_string(),
                ));
            }
            Ok((key.to_string(), value.trim().to_string()))
        })
        .collect()
}
