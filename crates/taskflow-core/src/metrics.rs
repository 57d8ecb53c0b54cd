use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use tracing::info;

struct SchedulerMetrics {
    events_received: Counter<u64>,
    reruns_requested: Counter<u64>,
    dependents_scheduled: Counter<u64>,
    graphs_blocked: Counter<u64>,
    graphs_finished: Counter<u64>,
    handler_duration_ms: Histogram<f64>,
}

static METRICS: OnceCell<SchedulerMetrics> = OnceCell::new();

fn handles() -> &'static SchedulerMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("taskflow.scheduler");
        SchedulerMetrics {
            events_received: meter
                .u64_counter("scheduler_events_received_total")
                .with_description("Inbound execution-queue events received, by kind")
                .init(),
            reruns_requested: meter
                .u64_counter("scheduler_reruns_requested_total")
                .with_description("Reruns requested after a soft task failure")
                .init(),
            dependents_scheduled: meter
                .u64_counter("scheduler_dependents_scheduled_total")
                .with_description("Dependent tasks scheduled after their requirements resolved")
                .init(),
            graphs_blocked: meter
                .u64_counter("scheduler_graphs_blocked_total")
                .with_description("Task graphs transitioned to blocked")
                .init(),
            graphs_finished: meter
                .u64_counter("scheduler_graphs_finished_total")
                .with_description("Task graphs transitioned to finished")
                .init(),
            handler_duration_ms: meter
                .f64_histogram("scheduler_handler_duration_ms")
                .with_description("Event handler latency in milliseconds, by event kind")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
/// No-op unless an OTLP meter provider is installed by the embedding binary.
pub fn init_metrics_from_env(service_name: &str) {
    if std::env::var("TASKFLOW_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "TASKFLOW_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export scheduler metrics."
        );
    }
}

pub fn record_event_received(kind: &str) {
    handles()
        .events_received
        .add(1, &[KeyValue::new("kind", kind.to_string())]);
}

pub fn record_rerun_requested() {
    handles().reruns_requested.add(1, &[]);
}

pub fn record_dependents_scheduled(count: u64) {
    if count > 0 {
        handles().dependents_scheduled.add(count, &[]);
    }
}

pub fn record_graph_blocked() {
    handles().graphs_blocked.add(1, &[]);
}

pub fn record_graph_finished() {
    handles().graphs_finished.add(1, &[]);
}

pub fn record_handler_duration(event_kind: &str, duration_ms: f64) {
    handles().handler_duration_ms.record(
        duration_ms,
        &[KeyValue::new("event_kind", event_kind.to_string())],
    );
}
