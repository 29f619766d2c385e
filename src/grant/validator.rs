//! Proof checks for the `device_authentication` and `password` grants.
//!
//! Every verification failure in the device grant collapses into
//! [`GrantOutcome::InvalidGrant`]; the only distinguishable rejection is the
//! password lock, which the client must be able to react to by prompting for
//! the account password.

use anyhow::Result;
use sqlx::PgPool;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::handlers::device::state::DeviceAuthState;
use crate::api::handlers::device::storage::lookup_user_by_email;
use crate::api::handlers::device::types::TokenRequest;
use crate::api::handlers::device::utils::pkce_matches;
use crate::device::models::Device;
use crate::device::proof::{secret_hash_matches, signature_matches};
use crate::device::repo::DeviceRepo;
use crate::device::trust::DeviceTrust;

/// Outcome of a `device_authentication` grant attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Authorized {
        user_id: Uuid,
        registration_id: Uuid,
    },
    /// Generic rejection; the caller learns nothing about which check failed.
    InvalidGrant,
    /// Proof was valid but the device is locked behind a password login.
    RequiresPassword,
}

/// Outcome of a `password` grant attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordGrantOutcome {
    Authorized { user_id: Uuid },
    InvalidGrant,
}

pub struct DeviceGrantValidator<'a> {
    pool: &'a PgPool,
    state: &'a DeviceAuthState,
}

impl<'a> DeviceGrantValidator<'a> {
    #[must_use]
    pub fn new(pool: &'a PgPool, state: &'a DeviceAuthState) -> Self {
        Self { pool, state }
    }

    /// Validate a `device_authentication` grant.
    ///
    /// Order: device lookup, proof (pin or fingerprint challenge), password
    /// lock, trust activation. The password lock is only reported after a
    /// valid proof so it cannot be used to enumerate locked devices.
    ///
    /// # Errors
    /// Returns error if a database query fails.
    pub async fn device_authentication(&self, request: &TokenRequest) -> Result<GrantOutcome> {
        let Some(registration_id) = request
            .registration_id
            .as_deref()
            .and_then(|value| Uuid::parse_str(value).ok())
        else {
            return Ok(GrantOutcome::InvalidGrant);
        };

        let Some(mut device) =
            DeviceRepo::get_by_registration_id(self.pool, registration_id).await?
        else {
            return Ok(GrantOutcome::InvalidGrant);
        };

        if !self.proof_matches(&device, request).await {
            warn!(registration_id = %registration_id, "device grant proof rejected");
            return Ok(GrantOutcome::InvalidGrant);
        }

        if device.requires_password {
            return Ok(GrantOutcome::RequiresPassword);
        }

        if !DeviceTrust::check_trust(self.pool, &mut device).await? {
            // Still inside the activation delay.
            return Ok(GrantOutcome::InvalidGrant);
        }

        DeviceRepo::touch_last_used(self.pool, device.registration_id).await?;
        info!(
            user_id = %device.user_id,
            registration_id = %device.registration_id,
            "device grant authorized"
        );
        Ok(GrantOutcome::Authorized {
            user_id: device.user_id,
            registration_id: device.registration_id,
        })
    }

    /// Validate a `password` grant. A `device_id` on the request additionally
    /// clears the password lock for that one device.
    ///
    /// # Errors
    /// Returns error if a database query fails.
    pub async fn password(&self, request: &TokenRequest) -> Result<PasswordGrantOutcome> {
        let (Some(username), Some(password)) = (&request.username, &request.password) else {
            return Ok(PasswordGrantOutcome::InvalidGrant);
        };

        let Some(user) = lookup_user_by_email(self.pool, username).await? else {
            return Ok(PasswordGrantOutcome::InvalidGrant);
        };
        if !secret_hash_matches(password, &user.password_hash) {
            warn!(user_id = %user.user_id, "password grant rejected");
            return Ok(PasswordGrantOutcome::InvalidGrant);
        }

        if let Some(device_id) = &request.device_id {
            // Unlock is per device; siblings stay locked.
            let unlocked =
                DeviceTrust::on_password_login(self.pool, user.user_id, device_id).await?;
            if unlocked {
                info!(user_id = %user.user_id, device_id = %device_id, "device password lock cleared");
            }
        }

        Ok(PasswordGrantOutcome::Authorized {
            user_id: user.user_id,
        })
    }

    /// Pin proof beats fingerprint proof when both are supplied; the request
    /// picks the slot by the fields it fills.
    async fn proof_matches(&self, device: &Device, request: &TokenRequest) -> bool {
        if let Some(pin) = &request.pin {
            return device
                .pin_secret_hash
                .as_deref()
                .is_some_and(|stored| secret_hash_matches(pin, stored));
        }

        // The challenge is burned before any other check runs; a failed
        // attempt must not leave it replayable, so a retry needs a new init.
        let Some(entry) = self
            .state
            .challenges()
            .take_authorize(device.registration_id)
            .await
        else {
            return false;
        };

        let (Some(code), Some(signature), Some(verifier)) = (
            &request.code,
            &request.code_signature,
            &request.code_verifier,
        ) else {
            return false;
        };
        let Some(public_key) = device.public_key_pem.as_deref() else {
            return false;
        };
        // The stored key is authoritative; a caller-supplied key is only
        // accepted when it matches it exactly.
        if let Some(supplied) = &request.public_key {
            let supplied_ok: bool = supplied.as_bytes().ct_eq(public_key.as_bytes()).into();
            if !supplied_ok {
                return false;
            }
        }

        let code_ok: bool = code.as_bytes().ct_eq(entry.challenge.as_bytes()).into();
        code_ok
            && pkce_matches(verifier, &entry.code_challenge)
            && signature_matches(public_key, &entry.challenge, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::device::rate_limit::NoopRateLimiter;
    use crate::api::handlers::device::state::{DeviceAuthConfig, DeviceAuthState};
    use crate::api::handlers::device::utils::code_challenge_for;
    use crate::device::models::DevicePlatform;
    use crate::device::proof::hash_secret;
    use crate::device::trust::NewDevice;
    use crate::otp::channel::LogOtpSender;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use chrono::Utc;
    use rsa::RsaPrivateKey;
    use rsa::pkcs1v15::SigningKey;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::sha2::Sha256;
    use rsa::signature::{SignatureEncoding, Signer};
    use secrecy::SecretString;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;

    fn lazy_pool() -> PgPool {
        // Never connected; these tests stay in front of the database.
        PgPoolOptions::new()
            .connect_lazy("postgres://localhost/fidinda")
            .expect("lazy pool")
    }

    fn state() -> DeviceAuthState {
        DeviceAuthState::new(
            DeviceAuthConfig::new("mobile-app".to_string(), SecretString::from("s3cret")),
            Arc::new(LogOtpSender),
            Arc::new(NoopRateLimiter),
        )
    }

    fn keypair() -> (SigningKey<Sha256>, String) {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("keygen");
        let pem = private_key
            .to_public_key()
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .expect("pem");
        (SigningKey::new(private_key), pem)
    }

    fn device(pin_secret_hash: Option<String>, public_key_pem: Option<String>) -> Device {
        Device {
            registration_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            device_id: "dev-1".to_string(),
            name: "Pixel".to_string(),
            platform: DevicePlatform::Android,
            pin_secret_hash,
            public_key_pem,
            is_trusted: true,
            trust_activation_at: None,
            requires_password: false,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    fn fingerprint_request(
        code: &str,
        signature: &str,
        verifier: &str,
        public_key: Option<String>,
    ) -> TokenRequest {
        TokenRequest {
            grant_type: "device_authentication".to_string(),
            code: Some(code.to_string()),
            code_signature: Some(signature.to_string()),
            code_verifier: Some(verifier.to_string()),
            public_key,
            ..TokenRequest::default()
        }
    }

    #[tokio::test]
    async fn pin_proof_checks_stored_hash() {
        let pool = lazy_pool();
        let state = state();
        let validator = DeviceGrantValidator::new(&pool, &state);

        let device = device(Some(hash_secret("2468").expect("hash")), None);
        let request = TokenRequest {
            grant_type: "device_authentication".to_string(),
            pin: Some("2468".to_string()),
            ..TokenRequest::default()
        };
        assert!(validator.proof_matches(&device, &request).await);

        let wrong = TokenRequest {
            pin: Some("0000".to_string()),
            ..request
        };
        assert!(!validator.proof_matches(&device, &wrong).await);

        // No pin slot registered at all.
        let no_slot = Device {
            pin_secret_hash: None,
            ..device.clone()
        };
        let request = TokenRequest {
            grant_type: "device_authentication".to_string(),
            pin: Some("2468".to_string()),
            ..TokenRequest::default()
        };
        assert!(!validator.proof_matches(&no_slot, &request).await);
    }

    #[tokio::test]
    async fn fingerprint_proof_round_trips() {
        let pool = lazy_pool();
        let state = state();
        let validator = DeviceGrantValidator::new(&pool, &state);

        let (signing_key, pem) = keypair();
        let device = device(None, Some(pem.clone()));

        let challenge = "c2VydmVyLWNoYWxsZW5nZQ";
        state
            .challenges()
            .store_authorize(
                device.registration_id,
                challenge.to_string(),
                code_challenge_for("verifier-1"),
            )
            .await;

        let signature = STANDARD.encode(signing_key.sign(challenge.as_bytes()).to_bytes());
        let request = fingerprint_request(challenge, &signature, "verifier-1", Some(pem));
        assert!(validator.proof_matches(&device, &request).await);
    }

    #[tokio::test]
    async fn failed_attempt_consumes_the_challenge() {
        let pool = lazy_pool();
        let state = state();
        let validator = DeviceGrantValidator::new(&pool, &state);

        let (signing_key, pem) = keypair();
        let (_, other_pem) = keypair();
        let device = device(None, Some(pem));

        let challenge = "c2VydmVyLWNoYWxsZW5nZQ";
        state
            .challenges()
            .store_authorize(
                device.registration_id,
                challenge.to_string(),
                code_challenge_for("verifier-1"),
            )
            .await;

        let signature = STANDARD.encode(signing_key.sign(challenge.as_bytes()).to_bytes());

        // First attempt transports a key that does not match the pinned one.
        let mismatched =
            fingerprint_request(challenge, &signature, "verifier-1", Some(other_pem));
        assert!(!validator.proof_matches(&device, &mismatched).await);

        // The otherwise-valid retry must fail: the challenge is gone.
        let valid = fingerprint_request(challenge, &signature, "verifier-1", None);
        assert!(!validator.proof_matches(&device, &valid).await);
    }

    #[tokio::test]
    async fn incomplete_attempt_consumes_the_challenge() {
        let pool = lazy_pool();
        let state = state();
        let validator = DeviceGrantValidator::new(&pool, &state);

        let (signing_key, pem) = keypair();
        let device = device(None, Some(pem));

        let challenge = "c2VydmVyLWNoYWxsZW5nZQ";
        state
            .challenges()
            .store_authorize(
                device.registration_id,
                challenge.to_string(),
                code_challenge_for("verifier-1"),
            )
            .await;

        // Missing signature field.
        let incomplete = TokenRequest {
            grant_type: "device_authentication".to_string(),
            code: Some(challenge.to_string()),
            code_verifier: Some("verifier-1".to_string()),
            ..TokenRequest::default()
        };
        assert!(!validator.proof_matches(&device, &incomplete).await);

        let signature = STANDARD.encode(signing_key.sign(challenge.as_bytes()).to_bytes());
        let valid = fingerprint_request(challenge, &signature, "verifier-1", None);
        assert!(!validator.proof_matches(&device, &valid).await);
    }

    async fn seed_user(pool: &PgPool) -> Result<(Uuid, String)> {
        let user_id = Uuid::new_v4();
        let email = format!("{user_id}@example.com");
        sqlx::query(
            "INSERT INTO users (user_id, email, phone, password_hash, security_stamp)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(user_id)
        .bind(&email)
        .bind("+37060000000")
        .bind(hash_secret("hunter22")?)
        .bind(Uuid::new_v4())
        .execute(pool)
        .await?;
        Ok((user_id, email))
    }

    async fn register_pin_device(
        pool: &PgPool,
        user_id: Uuid,
        device_id: &str,
        pin: &str,
    ) -> Result<Device> {
        DeviceTrust::register(
            pool,
            NewDevice {
                user_id,
                device_id: device_id.to_string(),
                name: "Pixel".to_string(),
                platform: DevicePlatform::Android,
                pin_secret_hash: Some(hash_secret(pin)?),
                public_key_pem: None,
            },
            chrono::Duration::zero(),
        )
        .await
    }

    fn pin_grant(registration_id: Uuid, pin: &str) -> TokenRequest {
        TokenRequest {
            grant_type: "device_authentication".to_string(),
            registration_id: Some(registration_id.to_string()),
            pin: Some(pin.to_string()),
            ..TokenRequest::default()
        }
    }

    #[sqlx::test]
    #[ignore = "needs a running postgres (set DATABASE_URL)"]
    async fn device_grant_lockout_and_per_device_unlock(pool: PgPool) -> Result<()> {
        let (user_id, email) = seed_user(&pool).await?;
        let state = state();
        let validator = DeviceGrantValidator::new(&pool, &state);

        let first = register_pin_device(&pool, user_id, "dev-1", "2468").await?;
        let second = register_pin_device(&pool, user_id, "dev-2", "1357").await?;

        let outcome = validator
            .device_authentication(&pin_grant(first.registration_id, "2468"))
            .await?;
        assert_eq!(
            outcome,
            GrantOutcome::Authorized {
                user_id,
                registration_id: first.registration_id,
            }
        );

        let outcome = validator
            .device_authentication(&pin_grant(first.registration_id, "0000"))
            .await?;
        assert_eq!(outcome, GrantOutcome::InvalidGrant);

        // A credential change locks every device; the valid proof now only
        // reports the lock.
        DeviceTrust::on_credential_changed(&pool, user_id).await?;
        for (registration_id, pin) in [
            (first.registration_id, "2468"),
            (second.registration_id, "1357"),
        ] {
            let outcome = validator
                .device_authentication(&pin_grant(registration_id, pin))
                .await?;
            assert_eq!(outcome, GrantOutcome::RequiresPassword);
        }

        // A password grant naming dev-1 clears that lock only.
        let password_request = TokenRequest {
            grant_type: "password".to_string(),
            username: Some(email),
            password: Some("hunter22".to_string()),
            device_id: Some("dev-1".to_string()),
            ..TokenRequest::default()
        };
        let outcome = validator.password(&password_request).await?;
        assert_eq!(outcome, PasswordGrantOutcome::Authorized { user_id });

        let outcome = validator
            .device_authentication(&pin_grant(first.registration_id, "2468"))
            .await?;
        assert_eq!(
            outcome,
            GrantOutcome::Authorized {
                user_id,
                registration_id: first.registration_id,
            }
        );

        // The sibling stays locked.
        let outcome = validator
            .device_authentication(&pin_grant(second.registration_id, "1357"))
            .await?;
        assert_eq!(outcome, GrantOutcome::RequiresPassword);

        Ok(())
    }
}
