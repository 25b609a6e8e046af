// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use crate::metrics::Metrics;
use axum::{extract::State, http::header, response::IntoResponse};

/// Prometheus metrics endpoint.
///
/// Returns metrics in Prometheus text format.
///
/// # Endpoint
/// `GET /metrics`
pub async fn metrics_handler(State(metrics): State<Metrics>) -> impl IntoResponse {
    let body = metrics.encode();
    (
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}
