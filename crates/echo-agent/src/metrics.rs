use axum::{http::StatusCode, response::Json};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

static RECORDER: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the process-wide Prometheus recorder on first call.
///
/// Returns `None` if another recorder was installed first; metrics are then
/// recorded there and `/metrics` renders nothing.
pub fn install_recorder() -> Option<PrometheusHandle> {
    RECORDER
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("prometheus recorder not installed: {}", e);
                None
            }
        })
        .clone()
}

/// Health check response.
#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    ready: bool,
}

/// Shared readiness state, cleared when shutdown begins.
#[derive(Clone, Debug)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mark the service as ready.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// 200 while serving, 503 once shutdown has started.
    pub(crate) fn respond(&self) -> (StatusCode, Json<HealthResponse>) {
        if self.is_ready() {
            (
                StatusCode::OK,
                Json(HealthResponse {
                    status: "healthy",
                    ready: true,
                }),
            )
        } else {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "shutting down",
                    ready: false,
                }),
            )
        }
    }
}

/// Connection count gauges.
pub mod gauges {
    /// Set the active connections gauge.
    pub fn connections_active(count: usize) {
        metrics::gauge!("echo_connections_active").set(count as f64);
    }
}

/// Event counters.
pub mod counters {
    /// Increment the inbound-messages counter.
    pub fn messages_received_total(via: &'static str) {
        metrics::counter!("echo_messages_received_total", "via" => via).increment(1);
    }

    /// Increment the rejected-messages counter with the given reason label.
    pub fn messages_rejected_total(reason: &'static str) {
        metrics::counter!("echo_messages_rejected_total", "reason" => reason).increment(1);
    }

    /// Increment the outbound-messages counter.
    pub fn messages_sent_total(via: &'static str) {
        metrics::counter!("echo_messages_sent_total", "via" => via).increment(1);
    }

    /// Increment the created-connections counter.
    pub fn connections_created_total() {
        metrics::counter!("echo_connections_created_total").increment(1);
    }

    /// Increment the received-webhooks counter.
    pub fn webhooks_received_total() {
        metrics::counter!("echo_webhooks_received_total").increment(1);
    }
}

/// Latency histograms.
pub mod histograms {
    /// Record how long a selective wait took, labelled by outcome.
    pub fn wait_seconds(outcome: &'static str, value: f64) {
        metrics::histogram!("echo_wait_seconds", "outcome" => outcome).record(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_flips_when_not_ready() {
        let health = HealthState::new();
        assert_eq!(health.respond().0, StatusCode::OK);
        health.set_ready(false);
        assert_eq!(health.respond().0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn recorder_installs_once() {
        let first = install_recorder();
        let second = install_recorder();
        assert_eq!(first.is_some(), second.is_some());
    }
}
