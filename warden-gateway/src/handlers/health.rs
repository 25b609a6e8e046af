// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use warden_policy_engine::{PolicyStore, StartupMode};

/// Shared application state for health endpoints.
#[derive(Clone)]
pub struct AppState {
    /// Policy store backing the admission listener
    pub store: Arc<PolicyStore>,
    /// Flag indicating if we're shutting down
    pub shutting_down: Arc<AtomicBool>,
}

/// Health check response body.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    policies: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

impl HealthResponse {
    fn status(status: &'static str) -> Self {
        Self {
            status,
            generation: None,
            policies: None,
            last_error: None,
        }
    }
}

/// Kubernetes liveness probe endpoint.
///
/// Returns 200 OK if the process is alive.
///
/// # Endpoint
/// `GET /health/live`
pub async fn health_live() -> Response {
    (StatusCode::OK, Json(HealthResponse::status("ok"))).into_response()
}

/// Kubernetes readiness probe endpoint.
///
/// Returns 503 if:
/// - The gateway is shutting down
/// - No policy set has loaded yet and `startupMode=failClosed`
///
/// # Endpoint
/// `GET /health/ready`
pub async fn health_ready(State(state): State<AppState>) -> Response {
    if state.shutting_down.load(Ordering::SeqCst) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse::status("shutting_down")),
        )
            .into_response();
    }

    let status = state.store.status();
    let waiting = !status.loaded_once && status.startup_mode == StartupMode::FailClosed;

    let response = HealthResponse {
        status: if waiting {
            "loading"
        } else if status.last_error.is_some() {
            "degraded"
        } else {
            "ok"
        },
        generation: Some(status.generation),
        policies: Some(status.policies),
        last_error: status.last_error,
    };

    // A failed reload keeps serving the previous set, so degraded stays ready
    let code = if waiting {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(response)).into_response()
}
