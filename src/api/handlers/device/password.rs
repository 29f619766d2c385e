//! Password change endpoint.
//!
//! Requires a password-kind session: a device-grant token must not be able to
//! rotate the very credential that would unlock other devices. A successful
//! change rotates the security stamp and locks every device of the user
//! behind a fresh password login.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info};

use crate::device::proof::{hash_secret, secret_hash_matches};
use crate::device::trust::DeviceTrust;

use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::session::{SessionKind, authenticate_bearer};
use super::state::DeviceAuthState;
use super::storage::{get_user, rotate_security_stamp, update_password_hash};
use super::types::ChangePasswordRequest;
use super::utils::extract_client_ip;

const MIN_PASSWORD_LENGTH: usize = 8;

#[utoipa::path(
    post,
    path = "/v1/auth/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed; all devices locked"),
        (status = 400, description = "Wrong current password or weak new password", body = String),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Password-kind session required", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn change_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<DeviceAuthState>>,
    payload: Option<Json<ChangePasswordRequest>>,
) -> impl IntoResponse {
    let request: ChangePasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let client_ip = extract_client_ip(&headers);
    if state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::PasswordChange)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let session = match authenticate_bearer(&headers, &pool).await {
        Ok(Some(session)) => session,
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(status) => return status.into_response(),
    };
    if session.kind != SessionKind::Password {
        return (
            StatusCode::FORBIDDEN,
            "Password login required".to_string(),
        )
            .into_response();
    }

    let user = match get_user(&pool, session.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            error!("Failed to load user for password change: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if request.new_password.len() < MIN_PASSWORD_LENGTH {
        return (StatusCode::BAD_REQUEST, "Password too short".to_string()).into_response();
    }
    if !secret_hash_matches(&request.current_password, &user.password_hash) {
        return (StatusCode::BAD_REQUEST, "Invalid password".to_string()).into_response();
    }

    let new_hash = match hash_secret(&request.new_password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash new password: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let result = async {
        update_password_hash(&pool, user.user_id, &new_hash).await?;
        rotate_security_stamp(&pool, user.user_id).await?;
        DeviceTrust::on_credential_changed(&pool, user.user_id).await
    }
    .await;

    match result {
        Ok(locked) => {
            info!(user_id = %user.user_id, locked_devices = locked, "password changed");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            error!("Failed to apply password change: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
