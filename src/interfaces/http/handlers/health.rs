//! Health check endpoint

use std::time::Instant;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::application::session::SharedSessionRegistry;

#[derive(Clone)]
pub struct HealthState {
    pub started_at: Instant,
    pub sessions: SharedSessionRegistry,
}

/// Service health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub connected_charge_points: usize,
}

pub async fn health_check(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        connected_charge_points: state.sessions.count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session::SessionRegistry;

    #[tokio::test]
    async fn reports_sessions() {
        let sessions = SessionRegistry::shared();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        sessions.register("A001", tx, None);

        let Json(health) = health_check(State(HealthState {
            started_at: Instant::now(),
            sessions,
        }))
        .await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.connected_charge_points, 1);
    }
}
