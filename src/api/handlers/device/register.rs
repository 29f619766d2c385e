//! Device registration endpoints (init/complete). Both require a bearer
//! session; which kind is enforced by the registration service when a second
//! slot is added to an existing device.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::registration::{CompleteOutcome, InitiateOutcome, RegistrationService};

use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::session::authenticate_bearer;
use super::state::DeviceAuthState;
use super::storage::{UserRecord, get_user};
use super::types::{
    RegisterCompleteRequest, RegisterCompleteResponse, RegisterInitRequest, RegisterInitResponse,
};
use super::utils::extract_client_ip;

/// Resolve the caller's bearer session into a user row, or fail with 401.
async fn require_user(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<(UserRecord, super::session::SessionKind), StatusCode> {
    let session = authenticate_bearer(headers, pool)
        .await?
        .ok_or(StatusCode::UNAUTHORIZED)?;
    match get_user(pool, session.user_id).await {
        Ok(Some(user)) => Ok((user, session.kind)),
        Ok(None) => Err(StatusCode::UNAUTHORIZED),
        Err(err) => {
            error!("Failed to load user for registration: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Mint a registration challenge and, for the pin slot, send the one-time code.
#[utoipa::path(
    post,
    path = "/v1/devices/register/init",
    request_body = RegisterInitRequest,
    responses(
        (status = 200, description = "Challenge issued", body = RegisterInitResponse),
        (status = 400, description = "Invalid request", body = String),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "devices"
)]
pub async fn register_init(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<DeviceAuthState>>,
    payload: Option<Json<RegisterInitRequest>>,
) -> impl IntoResponse {
    let request: RegisterInitRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let client_ip = extract_client_ip(&headers);
    if state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::RegisterInit)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let (user, _) = match require_user(&headers, &pool).await {
        Ok(user) => user,
        Err(status) => return status.into_response(),
    };

    let service = RegistrationService::new(&pool, &state);
    match service.initiate(&user, &request).await {
        Ok(InitiateOutcome::Challenge(challenge)) => {
            (StatusCode::OK, Json(RegisterInitResponse { challenge })).into_response()
        }
        Ok(InitiateOutcome::OtpRateLimited) => {
            (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response()
        }
        Ok(InitiateOutcome::InvalidRequest) => {
            (StatusCode::BAD_REQUEST, "Invalid request".to_string()).into_response()
        }
        Err(err) => {
            error!("Registration init failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Burn the pending challenge, verify proofs, and persist the credential slot.
#[utoipa::path(
    post,
    path = "/v1/devices/register/complete",
    request_body = RegisterCompleteRequest,
    responses(
        (status = 200, description = "Device registered", body = RegisterCompleteResponse),
        (status = 400, description = "Verification failed", body = String),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Password login required", body = String),
        (status = 409, description = "Device limit reached", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "devices"
)]
pub async fn register_complete(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<DeviceAuthState>>,
    payload: Option<Json<RegisterCompleteRequest>>,
) -> impl IntoResponse {
    let request: RegisterCompleteRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let client_ip = extract_client_ip(&headers);
    if state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::RegisterComplete)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let (user, session_kind) = match require_user(&headers, &pool).await {
        Ok(user) => user,
        Err(status) => return status.into_response(),
    };

    let service = RegistrationService::new(&pool, &state);
    match service.complete(&user, session_kind, &request).await {
        Ok(CompleteOutcome::Registered {
            registration_id,
            device_id,
        }) => (
            StatusCode::OK,
            Json(RegisterCompleteResponse {
                registration_id: registration_id.to_string(),
                device_id,
            }),
        )
            .into_response(),
        // One generic message for every verification failure.
        Ok(CompleteOutcome::Rejected) => {
            (StatusCode::BAD_REQUEST, "Registration failed".to_string()).into_response()
        }
        Ok(CompleteOutcome::PasswordRequired) => (
            StatusCode::FORBIDDEN,
            "Password login required".to_string(),
        )
            .into_response(),
        Ok(CompleteOutcome::MaxDevicesExceeded) => {
            (StatusCode::CONFLICT, "Device limit reached".to_string()).into_response()
        }
        Err(err) => {
            error!("Registration complete failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response()
        }
    }
}
