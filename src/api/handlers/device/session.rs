//! Bearer sessions issued by the token endpoint.
//!
//! Tokens carry a kind prefix (`pwd_` for password grants, `tdev_` for
//! device-authentication grants) so downstream policy can require the
//! stronger password assurance for sensitive operations. The prefix is a
//! convenience only; the kind stored next to the token hash is authoritative.

use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::error;
use utoipa::ToSchema;

use super::storage::{BearerSession, lookup_session};
use super::utils::{extract_bearer_token, hash_token};

/// Prefix for password-grant access tokens.
pub(crate) const PASSWORD_TOKEN_PREFIX: &str = "pwd_";
/// Prefix for device-authentication access tokens.
pub(crate) const TRUSTED_DEVICE_TOKEN_PREFIX: &str = "tdev_";

/// How an access token was obtained.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Issued by the password grant; full assurance.
    Password,
    /// Issued by the device-authentication grant (proof-based login).
    TrustedDevice,
}

impl SessionKind {
    #[must_use]
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::TrustedDevice => "trusted_device",
        }
    }

    pub(crate) fn from_db(value: &str) -> Result<Self, sqlx::Error> {
        match value {
            "password" => Ok(Self::Password),
            "trusted_device" => Ok(Self::TrustedDevice),
            _ => Err(sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid device_sessions.kind value: {value}"),
            )))),
        }
    }

    #[must_use]
    pub(crate) fn token_prefix(self) -> &'static str {
        match self {
            Self::Password => PASSWORD_TOKEN_PREFIX,
            Self::TrustedDevice => TRUSTED_DEVICE_TOKEN_PREFIX,
        }
    }
}

/// Resolve a bearer token into a session record, if present and unexpired.
///
/// Returns `Ok(None)` when the header is missing or the token is unknown.
///
/// # Errors
/// Returns `500` if the session lookup itself fails.
pub(crate) async fn authenticate_bearer(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<Option<BearerSession>, StatusCode> {
    let Some(token) = extract_bearer_token(headers) else {
        return Ok(None);
    };
    // Only the hash is stored; never compare raw tokens against the database.
    let token_hash = hash_token(&token);
    match lookup_session(pool, &token_hash).await {
        Ok(session) => Ok(session),
        Err(err) => {
            error!("Failed to lookup session: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
