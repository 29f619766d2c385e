//! OAuth2 token endpoint (`password` and `device_authentication` grants).
//!
//! Errors follow RFC 6749: JSON `{"error": "..."}` bodies, `invalid_client`
//! for client authentication, `invalid_grant` for every proof failure. The one
//! deliberate exception is `requires_password`, which tells a locked device to
//! fall back to a full password login.

use axum::{
    Form, Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::grant::{DeviceGrantValidator, GrantOutcome, PasswordGrantOutcome};

use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::session::SessionKind;
use super::state::DeviceAuthState;
use super::storage::insert_session;
use super::types::{TokenErrorResponse, TokenRequest, TokenResponse};
use super::utils::{extract_client_ip, generate_access_token, hash_token, secret_matches};

const GRANT_DEVICE_AUTHENTICATION: &str = "device_authentication";
const GRANT_PASSWORD: &str = "password";
const ERROR_RATE_LIMITED: &str = "rate_limited";

fn oauth_error(status: StatusCode, error: &str) -> axum::response::Response {
    (
        status,
        Json(TokenErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/v1/oauth/token",
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Access token issued", body = TokenResponse),
        (status = 400, description = "Grant rejected", body = TokenErrorResponse),
        (status = 401, description = "Client authentication failed", body = TokenErrorResponse),
        (status = 429, description = "Rate limited", body = TokenErrorResponse)
    ),
    tag = "oauth"
)]
pub async fn token(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<DeviceAuthState>>,
    payload: Option<Form<TokenRequest>>,
) -> impl IntoResponse {
    let request: TokenRequest = match payload {
        Some(Form(payload)) => payload,
        None => return oauth_error(StatusCode::BAD_REQUEST, "invalid_request"),
    };

    let client_ip = extract_client_ip(&headers);
    if state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Token)
        == RateLimitDecision::Limited
    {
        return oauth_error(StatusCode::TOO_MANY_REQUESTS, ERROR_RATE_LIMITED);
    }

    // Confidential client: id and secret must both match the configured pair.
    let client_ok = request
        .client_id
        .as_deref()
        .is_some_and(|id| id == state.config().client_id())
        && request.client_secret.as_deref().is_some_and(|secret| {
            secret_matches(secret, state.config().client_secret().expose_secret())
        });
    if !client_ok {
        return oauth_error(StatusCode::UNAUTHORIZED, "invalid_client");
    }

    if let Some(subject) = request.registration_id.as_deref()
        && state
            .rate_limiter()
            .check_subject(subject, RateLimitAction::Token)
            == RateLimitDecision::Limited
    {
        return oauth_error(StatusCode::TOO_MANY_REQUESTS, ERROR_RATE_LIMITED);
    }

    let validator = DeviceGrantValidator::new(&pool, &state);
    match request.grant_type.as_str() {
        GRANT_DEVICE_AUTHENTICATION => match validator.device_authentication(&request).await {
            Ok(GrantOutcome::Authorized {
                user_id,
                registration_id,
            }) => {
                issue_token(
                    &pool,
                    &state,
                    user_id,
                    Some(registration_id),
                    SessionKind::TrustedDevice,
                    request.scope,
                )
                .await
            }
            Ok(GrantOutcome::RequiresPassword) => {
                oauth_error(StatusCode::BAD_REQUEST, "requires_password")
            }
            Ok(GrantOutcome::InvalidGrant) => oauth_error(StatusCode::BAD_REQUEST, "invalid_grant"),
            Err(err) => {
                error!("Device grant failed: {err}");
                oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error")
            }
        },
        GRANT_PASSWORD => match validator.password(&request).await {
            Ok(PasswordGrantOutcome::Authorized { user_id }) => {
                issue_token(&pool, &state, user_id, None, SessionKind::Password, request.scope)
                    .await
            }
            Ok(PasswordGrantOutcome::InvalidGrant) => {
                oauth_error(StatusCode::BAD_REQUEST, "invalid_grant")
            }
            Err(err) => {
                error!("Password grant failed: {err}");
                oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error")
            }
        },
        _ => oauth_error(StatusCode::BAD_REQUEST, "unsupported_grant_type"),
    }
}

/// Mint, persist (hashed), and return an access token.
async fn issue_token(
    pool: &PgPool,
    state: &DeviceAuthState,
    user_id: Uuid,
    registration_id: Option<Uuid>,
    kind: SessionKind,
    scope: Option<String>,
) -> axum::response::Response {
    let ttl = state.config().token_ttl_seconds();
    let access_token = match generate_access_token(kind.token_prefix()) {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to mint access token: {err}");
            return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error");
        }
    };

    let expires_at = Utc::now() + Duration::seconds(i64::try_from(ttl).unwrap_or(i64::MAX));
    if let Err(err) = insert_session(
        pool,
        &hash_token(&access_token),
        user_id,
        registration_id,
        kind,
        expires_at,
    )
    .await
    {
        error!("Failed to persist session: {err}");
        return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error");
    }

    (
        StatusCode::OK,
        Json(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: ttl,
            scope,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limited_error_body() {
        let response = oauth_error(StatusCode::TOO_MANY_REQUESTS, ERROR_RATE_LIMITED);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .expect("body");
        assert_eq!(body.as_ref(), br#"{"error":"rate_limited"}"#);
    }
}
