//! Request/response types for device registration and token endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterInitRequest {
    pub device_id: String,
    /// `pin` or `fingerprint`.
    pub mode: String,
    /// Base64Url(SHA-256(code_verifier)), no padding.
    pub code_challenge: String,
    /// Delivery channel for the one-time code (pin mode only).
    pub channel: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterInitResponse {
    pub challenge: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterCompleteRequest {
    pub device_id: String,
    /// The challenge returned by register-init.
    pub code: String,
    pub code_verifier: String,
    pub device_name: String,
    /// `ios`, `android`, or `other`.
    pub device_platform: String,
    /// Fingerprint mode: Base64 signature of `code` under `public_key`.
    pub code_signature: Option<String>,
    /// Fingerprint mode: PEM-encoded RSA public key to pin.
    pub public_key: Option<String>,
    /// Pin mode: the delivered one-time code.
    pub otp: Option<String>,
    /// Pin mode: the PIN to bind to this device.
    pub pin: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterCompleteResponse {
    pub registration_id: String,
    pub device_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuthorizeInitRequest {
    pub client_id: String,
    pub registration_id: String,
    pub code_challenge: String,
    pub scope: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuthorizeInitResponse {
    pub challenge: String,
}

/// Token endpoint form body. Which fields are required depends on
/// `grant_type`; everything else stays `None`.
#[derive(ToSchema, Deserialize, Debug, Default)]
pub struct TokenRequest {
    pub grant_type: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
    // device_authentication
    pub registration_id: Option<String>,
    pub pin: Option<String>,
    pub code: Option<String>,
    pub code_signature: Option<String>,
    pub code_verifier: Option<String>,
    pub public_key: Option<String>,
    // password
    pub username: Option<String>,
    pub password: Option<String>,
    pub device_id: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// OAuth2-style error body.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenErrorResponse {
    pub error: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DeviceSummary {
    pub registration_id: String,
    pub device_id: String,
    pub name: String,
    pub platform: String,
    /// Registered credential slots (`pin`, `fingerprint`).
    pub modes: Vec<String>,
    pub is_trusted: bool,
    pub requires_password: bool,
    pub created_at: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn register_init_request_round_trips() -> Result<()> {
        let request = RegisterInitRequest {
            device_id: "dev-1".to_string(),
            mode: "pin".to_string(),
            code_challenge: "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".to_string(),
            channel: Some("sms".to_string()),
        };
        let value = serde_json::to_value(&request)?;
        let mode = value
            .get("mode")
            .and_then(serde_json::Value::as_str)
            .context("missing mode")?;
        assert_eq!(mode, "pin");
        let decoded: RegisterInitRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.channel.as_deref(), Some("sms"));
        Ok(())
    }

    #[test]
    fn token_request_tolerates_missing_optionals() -> Result<()> {
        let decoded: TokenRequest =
            serde_json::from_value(serde_json::json!({ "grant_type": "password" }))?;
        assert_eq!(decoded.grant_type, "password");
        assert!(decoded.registration_id.is_none());
        assert!(decoded.pin.is_none());
        Ok(())
    }

    #[test]
    fn token_response_omits_empty_scope() -> Result<()> {
        let response = TokenResponse {
            access_token: "tdev_abc".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 3600,
            scope: None,
        };
        let value = serde_json::to_value(&response)?;
        assert!(value.get("scope").is_none());
        Ok(())
    }
}
