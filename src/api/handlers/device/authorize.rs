//! Fingerprint re-authentication challenge endpoint.
//!
//! Unauthenticated by design (the device has no token yet). The challenge is
//! minted without looking the registration up, so the endpoint reveals nothing
//! about which registration ids exist; bogus ids simply fail later at the
//! token endpoint.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::DeviceAuthState;
use super::types::{AuthorizeInitRequest, AuthorizeInitResponse};
use super::utils::{extract_client_ip, generate_challenge};

#[utoipa::path(
    post,
    path = "/v1/devices/authorize/init",
    request_body = AuthorizeInitRequest,
    responses(
        (status = 200, description = "Challenge issued", body = AuthorizeInitResponse),
        (status = 400, description = "Invalid request", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "devices"
)]
pub async fn authorize_init(
    headers: HeaderMap,
    state: Extension<Arc<DeviceAuthState>>,
    payload: Option<Json<AuthorizeInitRequest>>,
) -> impl IntoResponse {
    let request: AuthorizeInitRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let client_ip = extract_client_ip(&headers);
    if state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::AuthorizeInit)
        == RateLimitDecision::Limited
        || state
            .rate_limiter()
            .check_subject(&request.registration_id, RateLimitAction::AuthorizeInit)
            == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    if request.client_id != state.config().client_id() {
        return (StatusCode::BAD_REQUEST, "Invalid request".to_string()).into_response();
    }
    if request.code_challenge.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Invalid request".to_string()).into_response();
    }
    let Ok(registration_id) = Uuid::parse_str(&request.registration_id) else {
        return (StatusCode::BAD_REQUEST, "Invalid request".to_string()).into_response();
    };

    let challenge = match generate_challenge() {
        Ok(challenge) => challenge,
        Err(err) => {
            error!("Failed to mint authorize challenge: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Authorization failed".to_string(),
            )
                .into_response();
        }
    };

    state
        .challenges()
        .store_authorize(
            registration_id,
            challenge.clone(),
            request.code_challenge.clone(),
        )
        .await;

    (StatusCode::OK, Json(AuthorizeInitResponse { challenge })).into_response()
}
