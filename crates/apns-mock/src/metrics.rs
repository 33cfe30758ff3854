use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Body of `/health`.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Body of `/ready`.
#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    ready: bool,
}

/// Shared readiness state. Goes not-ready once shutdown starts.
#[derive(Clone, Default)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    /// Starts out ready.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flips readiness; `main` clears it when shutdown begins.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Whether both listeners still accept connections.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Serves `/metrics`, `/health` and `/ready` on `addr`.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed or binding fails.
pub async fn start_metrics_server(
    addr: SocketAddr,
    health_state: HealthState,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route("/health", get(health_handler))
        .route("/ready", get(move || ready_handler(health_state.clone())));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Always 200 while the process is up.
async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "healthy" }))
}

/// 200 while accepting connections, 503 once draining.
async fn ready_handler(state: HealthState) -> (StatusCode, Json<ReadyResponse>) {
    if state.is_ready() {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                ready: true,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "draining",
                ready: false,
            }),
        )
    }
}

/// Connection count gauges.
pub mod gauges {
    /// Increment the active connections gauge of a listener.
    pub fn inc_connections_active(service: &'static str) {
        metrics::gauge!("apns_connections_active", "service" => service).increment(1.0);
    }

    /// Decrement the active connections gauge of a listener.
    pub fn dec_connections_active(service: &'static str) {
        metrics::gauge!("apns_connections_active", "service" => service).decrement(1.0);
    }
}

/// Event counters.
pub mod counters {
    use apns_common::ErrorCode;

    /// Record an accepted or rejected connection on a listener.
    pub fn connections_total(service: &'static str, outcome: &'static str) {
        metrics::counter!("apns_connections_total", "service" => service, "outcome" => outcome)
            .increment(1);
    }

    /// Increment the decoded-frames counter.
    pub fn frames_total() {
        metrics::counter!("apns_frames_total").increment(1);
    }

    /// Record an error response with its status code.
    pub fn error_responses_total(code: ErrorCode) {
        metrics::counter!("apns_error_responses_total", "code" => code.as_u8().to_string())
            .increment(1);
    }

    /// Increment the feedback-enqueued counter.
    pub fn feedback_enqueued_total() {
        metrics::counter!("apns_feedback_enqueued_total").increment(1);
    }

    /// Increment the feedback-delivered counter.
    pub fn feedback_delivered_total() {
        metrics::counter!("apns_feedback_delivered_total").increment(1);
    }
}
