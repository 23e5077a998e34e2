//! Logs, traces and metrics for a hellojohn node.
//!
//! `tracing` events go to stdout through an `EnvFilter` (`RUST_LOG`, default
//! `info`). With OTLP enabled the same spans are exported, and an incoming
//! W3C `traceparent` becomes the parent of the request span. Metrics use the
//! `metrics` facade with a Prometheus recorder rendered at `/metrics`.
//!
//! Both the subscriber and the recorder are process-wide; setup runs once and
//! later calls reuse it, so tests may build many servers in one process.
use metrics::Unit;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();
static SUBSCRIBER: OnceLock<()> = OnceLock::new();
static PROPAGATOR: OnceLock<()> = OnceLock::new();

/// Raft apply latency, in milliseconds.
const APPLY_BUCKETS_MS: &[f64] = &[
    0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0,
];

pub fn init_observability(service_name: &str, node_id: u64, otlp_enabled: bool) -> PrometheusHandle {
    SUBSCRIBER.get_or_init(|| {
        install_propagator();
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer());
        match otlp_enabled.then(|| tracer_provider(service_name, node_id)).flatten() {
            Some(provider) => {
                let tracer = provider.tracer(service_name.to_string());
                global::set_tracer_provider(provider);
                let _ = registry
                    .with(tracing_opentelemetry::layer().with_tracer(tracer))
                    .try_init();
            }
            None => {
                let _ = registry.try_init();
            }
        }
    });
    let handle = install_metrics_recorder();
    describe_metrics();
    handle
}

fn install_propagator() {
    PROPAGATOR.get_or_init(|| global::set_text_map_propagator(TraceContextPropagator::new()));
}

fn tracer_provider(service_name: &str, node_id: u64) -> Option<SdkTracerProvider> {
    let exporter = match opentelemetry_otlp::SpanExporter::builder().with_tonic().build() {
        Ok(exporter) => exporter,
        Err(err) => {
            eprintln!("otlp exporter disabled: {err}");
            return None;
        }
    };
    let resource = Resource::builder_empty()
        .with_attributes(resource_attributes(service_name, node_id))
        .build();
    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build(),
    )
}

fn resource_attributes(service_name: &str, node_id: u64) -> Vec<KeyValue> {
    let mut attrs = vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("hellojohn.node_id", node_id as i64),
    ];
    if let Ok(host) = std::env::var("HOSTNAME") {
        attrs.push(KeyValue::new("service.instance.id", host));
    }
    if let Ok(environment) = std::env::var("DEPLOYMENT_ENVIRONMENT") {
        attrs.push(KeyValue::new("deployment.environment", environment));
    }
    attrs
}

/// Parent context carried by `traceparent`/`tracestate`, if any.
pub fn trace_context_from_headers(headers: &axum::http::HeaderMap) -> opentelemetry::Context {
    install_propagator();
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

struct HeaderExtractor<'a>(&'a axum::http::HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

/// The process-wide Prometheus handle. When another recorder already holds
/// the global slot the handle is detached and renders nothing.
pub fn install_metrics_recorder() -> PrometheusHandle {
    RECORDER
        .get_or_init(|| {
            let builder = PrometheusBuilder::new()
                .set_buckets_for_metric(
                    Matcher::Full("raft_apply_latency_ms".to_string()),
                    APPLY_BUCKETS_MS,
                )
                .unwrap_or_else(|err| {
                    tracing::warn!(error = %err, "apply latency buckets rejected");
                    PrometheusBuilder::new()
                });
            builder.install_recorder().unwrap_or_else(|err| {
                tracing::warn!(error = %err, "metrics recorder not installed");
                PrometheusBuilder::new().build_recorder().handle()
            })
        })
        .clone()
}

fn describe_metrics() {
    metrics::describe_histogram!(
        "raft_apply_latency_ms",
        Unit::Milliseconds,
        "Time to apply one control-plane command on this node"
    );
    metrics::describe_gauge!("fs_degraded", "1 while the control-plane store refuses writes");
    metrics::describe_counter!(
        "hellojohn_tokens_issued_total",
        "Token responses issued, by grant"
    );
    metrics::describe_counter!(
        "hellojohn_refresh_reuse_total",
        "Rotated-out refresh tokens presented again"
    );
    metrics::describe_counter!(
        "hellojohn_rate_limited_total",
        "Requests refused by the credential rate limiter"
    );
    metrics::describe_gauge!(
        "hellojohn_tenant_pool_connections",
        "Open tenant database handles"
    );
}
