use crate::error::AppError;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, runtime, trace as sdktrace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One flattened JSON object per event (containers, log shipping).
    Json,
    /// Human readable lines for local runs.
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

/// Flushes pending spans to the OTLP collector when dropped.
pub struct TracingGuard {
    otlp_enabled: bool,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if self.otlp_enabled {
            opentelemetry::global::shutdown_tracer_provider();
        }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `log_level`. Span export over OTLP is only wired up
/// when an endpoint is given, so local runs and tests need no collector.
pub fn init_tracing(
    service_name: &str,
    log_level: &str,
    otlp_endpoint: Option<&str>,
    format: LogFormat,
) -> Result<TracingGuard, AppError> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let tracer = match otlp_endpoint {
        Some(endpoint) => {
            let otlp_exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint);

            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(otlp_exporter)
                .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                    KeyValue::new("service.name", service_name.to_string()),
                ])))
                .install_batch(runtime::Tokio)
                .map_err(|e| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "Failed to initialize OTLP tracer for service '{}' at endpoint '{}': {}",
                        service_name,
                        endpoint,
                        e
                    ))
                })?;
            Some(tracer)
        }
        None => None,
    };

    let otlp_enabled = tracer.is_some();
    let telemetry = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));

    let json_layer = (format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .json()
            .flatten_event(true)
    });
    let pretty_layer =
        (format == LogFormat::Pretty).then(|| tracing_subscriber::fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(telemetry)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "Tracing subscriber already installed: {}",
                e
            ))
        })?;

    tracing::info!(
        service = service_name,
        otlp_enabled = otlp_enabled,
        "Tracing initialized"
    );

    Ok(TracingGuard { otlp_enabled })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
