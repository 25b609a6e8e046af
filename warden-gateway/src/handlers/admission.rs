use std::sync::Arc;

use axum::{body::Bytes, extract::State, http::StatusCode, response::IntoResponse, Json};
use warden_policy_engine::AdmissionListener;

/// Validating admission webhook endpoint.
///
/// Always answers 200 with a response AdmissionReview; undecodable bodies
/// get a deny review rather than an HTTP error.
///
/// # Endpoint
/// `POST /validate`
pub async fn validate(State(listener): State<Arc<AdmissionListener>>, body: Bytes) -> impl IntoResponse {
    let review = listener.admit_bytes(&body).await;
    (StatusCode::OK, Json(review))
}
