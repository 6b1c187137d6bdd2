//! Health endpoint.
//!
//! `GET /health` always answers `200` with `{"Status":"OK","connected":..}`;
//! `connected` follows the supervisor's lifecycle events.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;
use warden_consumer::{LifecycleEvent, LifecycleObserver, TracingObserver};

use crate::error::{ServerError, ServerResult};

/// Shared connection state read by the health endpoint.
#[derive(Debug, Default)]
pub struct HealthState {
    connected: AtomicBool,
}

impl HealthState {
    /// Records whether the broker connection is up.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Returns whether the broker connection is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// Body of a health response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Always `"OK"` while the process serves requests.
    #[serde(rename = "Status")]
    pub status: String,
    /// Whether the broker connection is up.
    pub connected: bool,
}

/// Handles `GET /health`.
pub async fn health(State(state): State<Arc<HealthState>>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "OK".to_string(),
        connected: state.is_connected(),
    })
}

/// Builds the health router.
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// Serves the health endpoint on `addr` until `shutdown` fires.
///
/// # Errors
/// Returns `Health` if the address cannot be bound or serving fails.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<HealthState>,
    shutdown: CancellationToken,
) -> ServerResult<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Health { addr, source })?;
    info!(addr = %addr, "Health endpoint listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|source| ServerError::Health { addr, source })
}

/// Lifecycle observer that logs events and tracks connectivity.
#[derive(Debug, Clone)]
pub struct HealthObserver {
    state: Arc<HealthState>,
}

impl HealthObserver {
    /// Creates an observer updating `state`.
    #[must_use]
    pub const fn new(state: Arc<HealthState>) -> Self {
        Self { state }
    }
}

impl LifecycleObserver for HealthObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        TracingObserver.on_event(event);
        match event {
            LifecycleEvent::Connected { .. } | LifecycleEvent::Reconnected { .. } => {
                self.state.set_connected(true);
            }
            LifecycleEvent::Disconnected | LifecycleEvent::Closed => {
                self.state.set_connected(false);
            }
            LifecycleEvent::Error { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use warden_core::SessionGeneration;

    use super::*;

    #[tokio::test]
    async fn test_health_reports_ok_and_connectivity() {
        let state = Arc::new(HealthState::default());
        let Json(report) = health(State(Arc::clone(&state))).await;
        assert_eq!(report.status, "OK");
        assert!(!report.connected);

        state.set_connected(true);
        let Json(report) = health(State(state)).await;
        assert!(report.connected);
    }

    #[test]
    fn test_report_wire_format() {
        let report = HealthReport {
            status: "OK".to_string(),
            connected: true,
        };
        assert_eq!(
            serde_json::to_string(&report).unwrap(),
            r#"{"Status":"OK","connected":true}"#
        );
    }

    #[test]
    fn test_observer_tracks_lifecycle() {
        let state = Arc::new(HealthState::default());
        let observer = HealthObserver::new(Arc::clone(&state));

        observer.on_event(&LifecycleEvent::Connected {
            address: "sim://local".to_string(),
        });
        assert!(state.is_connected());
        observer.on_event(&LifecycleEvent::Disconnected);
        assert!(!state.is_connected());
        observer.on_event(&LifecycleEvent::Error {
            message: "slow consumer".to_string(),
        });
        assert!(!state.is_connected());
        observer.on_event(&LifecycleEvent::Reconnected {
            generation: SessionGeneration::new(2),
        });
        assert!(state.is_connected());
        observer.on_event(&LifecycleEvent::Closed);
        assert!(!state.is_connected());
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(HealthState::default()),
            shutdown.clone(),
        ));
        tokio::task::yield_now().await;
        shutdown.cancel();
        task.await.unwrap().unwrap();
    }
}
