//! Logging and tracing setup.
//!
//! Console output follows the verbosity flag (or `RUST_LOG`), pretty for
//! development and JSON for production. `ERROR` events are also written to
//! the rotating file sink. Spans are exported over OTLP/gRPC when
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

use crate::logfile::{RollingConfig, RollingFile};
use anyhow::{Context, Result};
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime::Tokio,
    trace::{Tracer, TracerProvider},
    Resource,
};
use std::{env::var, path::PathBuf, sync::Arc, time::Duration};
use tracing::{debug, Level};
use tracing_subscriber::{filter::LevelFilter, fmt, EnvFilter, Layer, Registry};
use ulid::Ulid;

const LOG_FILE_PREFIX: &str = "error";

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub verbosity: Option<Level>,
    pub log_dir: PathBuf,
    pub json: bool,
}

/// Keeps the file sink and span exporter alive; flushes both when dropped.
#[must_use = "dropping the guard stops file logging and span export"]
pub struct Telemetry {
    file: Arc<RollingFile>,
    provider: Option<TracerProvider>,
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        let _ = self.file.flush();
        if let Some(provider) = self.provider.take() {
            debug!("shutting down tracer provider");
            let _ = provider.shutdown();
        }
    }
}

fn env_filter(level: Level) -> Result<EnvFilter> {
    Ok(EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?))
}

fn init_tracer(endpoint: String) -> Result<(TracerProvider, Tracer)> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(3))
        .build()
        .context("Failed to build OTLP span exporter")?;

    let instance_id = var("OTEL_SERVICE_INSTANCE_ID").unwrap_or_else(|_| Ulid::new().to_string());

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_resource(Resource::new(vec![
            KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("service.instance.id", instance_id),
        ]))
        .build();

    global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer(env!("CARGO_PKG_NAME"));

    Ok((provider, tracer))
}

/// Install the global subscriber.
///
/// # Errors
/// Returns an error if the log directory cannot be prepared, the exporter
/// fails to build, or a subscriber was already installed.
pub fn init(options: &LogOptions) -> Result<Telemetry> {
    let level = options.verbosity.unwrap_or(Level::ERROR);

    let file = Arc::new(
        RollingFile::open(RollingConfig::new(&options.log_dir, LOG_FILE_PREFIX)).with_context(
            || format!("Failed to open log directory {}", options.log_dir.display()),
        )?,
    );

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console = fmt::layer().with_target(false);
    if options.json {
        layers.push(console.json().with_filter(env_filter(level)?).boxed());
    } else {
        layers.push(console.pretty().with_filter(env_filter(level)?).boxed());
    }

    layers.push(
        fmt::layer()
            .with_ansi(false)
            .with_writer(file.clone())
            .with_filter(LevelFilter::ERROR)
            .boxed(),
    );

    let provider = match var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Ok(endpoint) => {
            let (provider, tracer) = init_tracer(endpoint)?;
            layers.push(
                tracing_opentelemetry::layer()
                    .with_tracer(tracer)
                    .with_filter(env_filter(level)?)
                    .boxed(),
            );
            Some(provider)
        }
        Err(_) => None,
    };

    let subscriber = tracing_subscriber::layer::SubscriberExt::with(Registry::default(), layers);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(Telemetry { file, provider })
}
