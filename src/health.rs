//! Health and metrics endpoints.
//!
//! - `/healthz`: liveness, 200 while the process serves requests
//! - `/readyz`: readiness, 200 once this replica leads and runs the controller
//! - `/metrics`: Prometheus text exposition, every metric prefixed `mysqloperator_`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{Router, extract::State, http::StatusCode, http::header, routing::get};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const METRICS_PREFIX: &str = "mysqloperator";
const OPENMETRICS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Identifies one InnoDBCluster in metric labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ClusterLabels {
    pub namespace: String,
    pub name: String,
}

impl ClusterLabels {
    fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl EncodeLabelSet for ClusterLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())
    }
}

/// Action kind and whether it was applied.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ActionLabels {
    pub kind: &'static str,
    pub result: &'static str,
}

impl EncodeLabelSet for ActionLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind).encode(encoder.encode_label())?;
        ("result", self.result).encode(encoder.encode_label())
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PhaseLabels {
    pub phase: String,
}

impl EncodeLabelSet for PhaseLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("phase", self.phase.as_str()).encode(encoder.encode_label())
    }
}

/// Operator metrics.
pub struct Metrics {
    pub reconciliations: Family<ClusterLabels, Counter>,
    pub reconcile_errors: Family<ClusterLabels, Counter>,
    pub reconcile_duration: Family<ClusterLabels, Histogram>,
    /// Transitions by target phase
    pub phase_transitions: Family<PhaseLabels, Counter>,
    pub instances_desired: Family<ClusterLabels, Gauge>,
    pub instances_online: Family<ClusterLabels, Gauge>,
    pub actions: Family<ActionLabels, Counter>,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix(METRICS_PREFIX);
        let metrics = Self {
            reconciliations: Family::default(),
            reconcile_errors: Family::default(),
            reconcile_duration: Family::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.005, 2.0, 12))
            }),
            phase_transitions: Family::default(),
            instances_desired: Family::default(),
            instances_online: Family::default(),
            actions: Family::default(),
            registry: Registry::default(),
        };

        registry.register(
            "reconciliations",
            "Reconciliation cycles completed per cluster",
            metrics.reconciliations.clone(),
        );
        registry.register(
            "reconciliation_errors",
            "Reconciliation cycles that ended in an error per cluster",
            metrics.reconcile_errors.clone(),
        );
        registry.register(
            "reconcile_duration_seconds",
            "Wall time of one reconciliation cycle",
            metrics.reconcile_duration.clone(),
        );
        registry.register(
            "phase_transitions",
            "InnoDBCluster phase transitions by target phase",
            metrics.phase_transitions.clone(),
        );
        registry.register(
            "instances_desired",
            "Server instances requested by spec.instances",
            metrics.instances_desired.clone(),
        );
        registry.register(
            "instances_online",
            "Server instances online in the group",
            metrics.instances_online.clone(),
        );
        registry.register(
            "actions",
            "Actions executed by kind and result",
            metrics.actions.clone(),
        );

        Self {
            registry,
            ..metrics
        }
    }

    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ClusterLabels::new(namespace, name);
        self.reconciliations.get_or_create(&labels).inc();
        self.reconcile_duration
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn record_error(&self, namespace: &str, name: &str) {
        self.reconcile_errors
            .get_or_create(&ClusterLabels::new(namespace, name))
            .inc();
    }

    pub fn record_phase_transition(&self, phase: &str) {
        self.phase_transitions
            .get_or_create(&PhaseLabels {
                phase: phase.to_string(),
            })
            .inc();
    }

    pub fn set_instances(&self, namespace: &str, name: &str, desired: i64, online: i64) {
        let labels = ClusterLabels::new(namespace, name);
        self.instances_desired.get_or_create(&labels).set(desired);
        self.instances_online.get_or_create(&labels).set(online);
    }

    pub fn record_action(&self, kind: &'static str, success: bool) {
        let result = if success { "applied" } else { "failed" };
        self.actions
            .get_or_create(&ActionLabels { kind, result })
            .inc();
    }

    /// Render all metrics in the text exposition format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            error!(error = %e, "Failed to encode metrics");
        }
        buffer
    }
}

/// State shared between the operator and the health server.
#[derive(Default)]
pub struct HealthState {
    ready: AtomicBool,
    pub metrics: Metrics,
}

impl HealthState {
    /// Not ready until [`set_ready`](Self::set_ready) is called.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

async fn readyz(State(state): State<Arc<HealthState>>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, OPENMETRICS_TEXT)],
        state.metrics.encode(),
    )
}

pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the health and metrics endpoints on `0.0.0.0:port` until `shutdown` fires.
pub async fn run_health_server(
    state: Arc<HealthState>,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(port, "Health server listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
