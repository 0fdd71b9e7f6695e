//! Logging, tracing and metrics setup.
//!
//! Log verbosity is controlled by `RUST_LOG` when set, then by
//! `SS_LOG_LEVEL`, and defaults to `info` unless the caller picks another
//! default. `RUST_LOG_FORMAT=json` switches
//! to JSON output. OpenTelemetry export over OTLP is disabled unless
//! `OTEL_SDK_DISABLED=false`.
use std::borrow::Cow;
use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{InstrumentationScope, global};
use opentelemetry_otlp::{ExporterBuildError, MetricExporter, SpanExporter};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;
use snafu::{ResultExt, Snafu};
use tracing::Subscriber;
use tracing_opentelemetry::MetricsLayer;
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::{prelude::*, registry::LookupSpan};

pub use opentelemetry::{
    KeyValue,
    metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter},
};

use crate::format::CompactFormat;

mod format;

const OTEL_SDK_DISABLED: &str = "OTEL_SDK_DISABLED";
const SS_LOG_LEVEL: &str = "SS_LOG_LEVEL";
const DEFAULT_LOG_DIRECTIVE: &str = "info";
const METRICS_EXPORT_INTERVAL: Duration = Duration::from_secs(10);

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

#[derive(Debug, Snafu)]
pub enum ObservabilityError {
    #[snafu(display("Failed to build exporter"))]
    Exporter { source: ExporterBuildError },
    #[snafu(display("Failed to install the tracing subscriber"))]
    Subscriber {
        source: tracing_subscriber::util::TryInitError,
    },
}

pub fn meter(name: &'static str) -> Meter {
    global::meter(name)
}

pub fn init_observability(
    package_name: impl Into<Cow<'static, str>>,
    package_version: impl Into<Cow<'static, str>>,
) -> Result<(), ObservabilityError> {
    init_observability_with_default(package_name, package_version, DEFAULT_LOG_DIRECTIVE)
}

/// Like [`init_observability`], logging at `default_directive` when neither
/// `RUST_LOG` nor `SS_LOG_LEVEL` is set.
pub fn init_observability_with_default(
    package_name: impl Into<Cow<'static, str>>,
    package_version: impl Into<Cow<'static, str>>,
    default_directive: &str,
) -> Result<(), ObservabilityError> {
    // The otel sdk ignores OTEL_SDK_DISABLED, so it is handled here.
    // Export stays off unless explicitly enabled.
    let sdk_disabled = std::env::var(OTEL_SDK_DISABLED)
        .map(|v| v != "false")
        .unwrap_or(true);

    let directive = resolve_log_directive(
        std::env::var("RUST_LOG").ok(),
        std::env::var(SS_LOG_LEVEL).ok(),
        default_directive,
    );

    let otel_layer = otel(
        package_name.into(),
        package_version.into(),
        &directive,
        !sdk_disabled,
    )?;
    let layers = vec![stdout(&directive), otel_layer];

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context(SubscriberSnafu {})
}

/// Returns the log filter directive to use.
///
/// `RUST_LOG` takes precedence. `SS_LOG_LEVEL` accepts tracing levels and
/// directives as well as the `WARNING`, `CRITICAL` and `FATAL` level names.
pub fn resolve_log_directive(
    rust_log: Option<String>,
    ss_log_level: Option<String>,
    default_directive: &str,
) -> String {
    if let Some(rust_log) = rust_log.filter(|value| !value.trim().is_empty()) {
        return rust_log;
    }

    let Some(level) = ss_log_level.filter(|value| !value.trim().is_empty()) else {
        return default_directive.to_string();
    };

    match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        "notset" => "trace".to_string(),
        "trace" | "debug" | "info" | "warn" | "error" | "off" => level.trim().to_ascii_lowercase(),
        _ => level.trim().to_string(),
    }
}

fn env_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVE))
}

fn stdout<S>(directive: &str) -> BoxedLayer<S>
where
    S: Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    let json_fmt = std::env::var("RUST_LOG_FORMAT")
        .map(|val| val == "json")
        .unwrap_or(false);

    if json_fmt {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .json()
            .with_filter(env_filter(directive))
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .event_format(CompactFormat)
            .fmt_fields(CompactFormat)
            .with_filter(env_filter(directive))
            .boxed()
    }
}

fn otel<S>(
    package_name: Cow<'static, str>,
    version: Cow<'static, str>,
    directive: &str,
    export: bool,
) -> Result<BoxedLayer<S>, ObservabilityError>
where
    S: Subscriber + Send + Sync,
    for<'a> S: LookupSpan<'a>,
{
    let resource = Resource::builder()
        .with_service_name(package_name.to_string())
        .build();

    let scope = InstrumentationScope::builder(package_name)
        .with_version(version)
        .build();
    let tracer = tracer_provider(resource.clone(), export)?.tracer_with_scope(scope);

    let meter_provider = meter_provider(resource, export)?;
    global::set_meter_provider(meter_provider.clone());

    Ok(env_filter(directive)
        .and_then(MetricsLayer::new(meter_provider))
        .and_then(tracing_opentelemetry::layer().with_tracer(tracer))
        .boxed())
}

/// Spans are exported over OTLP only when `export` is set.
fn tracer_provider(
    resource: Resource,
    export: bool,
) -> Result<SdkTracerProvider, ObservabilityError> {
    let builder = SdkTracerProvider::builder().with_resource(resource);
    if !export {
        return Ok(builder.build());
    }

    let exporter = SpanExporter::builder()
        .with_tonic()
        .build()
        .context(ExporterSnafu {})?;

    Ok(builder.with_batch_exporter(exporter).build())
}

fn meter_provider(resource: Resource, export: bool) -> Result<SdkMeterProvider, ObservabilityError> {
    let builder = SdkMeterProvider::builder().with_resource(resource);
    if !export {
        return Ok(builder.build());
    }

    let exporter = MetricExporter::builder()
        .with_tonic()
        .build()
        .context(ExporterSnafu {})?;
    let reader = PeriodicReader::builder(exporter)
        .with_interval(METRICS_EXPORT_INTERVAL)
        .build();

    Ok(builder.with_reader(reader).build())
}
