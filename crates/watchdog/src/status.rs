// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only HTTP view of the supervisor.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::supervisor::{LivenessSupervisor, Snapshot, SupervisorState};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

/// `GET /api/v1/health`: always 200 while the process is up.
pub async fn health(State(supervisor): State<LivenessSupervisor>) -> impl IntoResponse {
    Json(HealthResponse { status: "running", snapshot: supervisor.snapshot() })
}

/// `GET /api/v1/ready`: 200 when the connection is online, 503 otherwise.
pub async fn ready(State(supervisor): State<LivenessSupervisor>) -> impl IntoResponse {
    let snapshot = supervisor.snapshot();
    let status = if snapshot.state == SupervisorState::Online {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(serde_json::json!({ "ready": status == StatusCode::OK, "state": snapshot.state })))
}

pub fn build_router(supervisor: LivenessSupervisor) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/ready", get(ready))
        .layer(TraceLayer::new_for_http())
        .with_state(supervisor)
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
