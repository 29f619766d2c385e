//! Time-based one-time codes (RFC 6238).
//!
//! Codes are derived, not stored: the secret is a digest of the subject's
//! security stamp and a `(purpose, recipient)` modifier, so rotating the stamp
//! invalidates every outstanding code at once. The dedup cache only records
//! that a code was sent; its presence blocks resends until the validity
//! window elapses.

use crate::otp::channel::{OtpChannel, OtpMessage, OtpSender};
use anyhow::{Context, Result, anyhow};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use totp_rs::{Algorithm, TOTP};
use uuid::Uuid;

/// What a code authorizes. Part of the derivation modifier, so a code sent
/// for one purpose never verifies for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OtpPurpose {
    DeviceRegistration,
}

impl OtpPurpose {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeviceRegistration => "device_registration",
        }
    }
}

/// Delivery parameters, validated once at construction.
#[derive(Debug, Clone)]
pub struct OtpDelivery {
    recipient: String,
    purpose: OtpPurpose,
    channel: OtpChannel,
    template: String,
}

impl OtpDelivery {
    /// Builds a delivery request. The template must contain the `{code}`
    /// placeholder and the recipient must be non-empty.
    ///
    /// # Errors
    /// Returns an error on an empty recipient or a template without `{code}`.
    pub fn new(
        recipient: String,
        purpose: OtpPurpose,
        channel: OtpChannel,
        template: String,
    ) -> Result<Self> {
        if recipient.trim().is_empty() {
            return Err(anyhow!("otp recipient must not be empty"));
        }
        if !template.contains("{code}") {
            return Err(anyhow!("otp template is missing the {{code}} placeholder"));
        }
        Ok(Self {
            recipient,
            purpose,
            channel,
            template,
        })
    }

    #[must_use]
    pub fn recipient(&self) -> &str {
        &self.recipient
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// The previous code for this `(recipient, channel, purpose)` has not
    /// expired yet.
    RateLimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Valid,
    InvalidCode,
    NotANumber,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    service: &'static str,
    subject: String,
    channel: OtpChannel,
    purpose: OtpPurpose,
}

pub struct OneTimeCodeService {
    sender: Arc<dyn OtpSender>,
    dedup: Mutex<HashMap<DedupKey, Instant>>,
    validity: Duration,
    developer_code: Option<String>,
}

impl OneTimeCodeService {
    #[must_use]
    pub fn new(sender: Arc<dyn OtpSender>, validity: Duration) -> Self {
        Self {
            sender,
            dedup: Mutex::new(HashMap::new()),
            validity,
            developer_code: None,
        }
    }

    /// Accept a fixed code instead of a delivered one. The caller is
    /// responsible for gating this on a non-production environment.
    #[must_use]
    pub fn with_developer_code(mut self, code: String) -> Self {
        self.developer_code = Some(code);
        self
    }

    /// Derives a fresh code and dispatches it over the configured channel.
    ///
    /// The dedup key is claimed atomically before dispatch (set-if-absent
    /// under the cache lock) so concurrent sends cannot both pass the rate
    /// limit. A failed dispatch releases the key.
    ///
    /// # Errors
    /// Returns an error if code derivation or dispatch fails.
    pub async fn send(&self, delivery: &OtpDelivery, security_stamp: Uuid) -> Result<SendOutcome> {
        if self.developer_code.is_some() {
            // Developer mode skips delivery entirely; verify accepts the
            // pre-shared code.
            return Ok(SendOutcome::Sent);
        }

        let key = DedupKey {
            service: env!("CARGO_PKG_NAME"),
            subject: delivery.recipient.clone(),
            channel: delivery.channel,
            purpose: delivery.purpose,
        };

        {
            let mut dedup = self.dedup.lock().await;
            dedup.retain(|_, sent_at| sent_at.elapsed() < self.validity);
            if dedup.contains_key(&key) {
                return Ok(SendOutcome::RateLimited);
            }
            dedup.insert(key.clone(), Instant::now());
        }

        let code = self
            .totp(delivery.purpose, &delivery.recipient, security_stamp)?
            .generate_current()
            .context("Failed to derive one-time code")?;

        let message = OtpMessage {
            recipient: delivery.recipient.clone(),
            body: delivery.template.replace("{code}", &code),
            channel: delivery.channel,
        };

        if let Err(err) = self.sender.send(&message) {
            let mut dedup = self.dedup.lock().await;
            dedup.remove(&key);
            return Err(err.context("Failed to dispatch one-time code"));
        }

        Ok(SendOutcome::Sent)
    }

    /// Recomputes the expected code and compares.
    ///
    /// Stamp rotation on success is the caller's job; this service holds no
    /// database handle.
    ///
    /// # Errors
    /// Returns an error if code derivation fails.
    pub async fn verify(
        &self,
        recipient: &str,
        code: &str,
        purpose: OtpPurpose,
        security_stamp: Uuid,
    ) -> Result<VerifyOutcome> {
        if let Some(developer_code) = &self.developer_code {
            return Ok(if code == developer_code {
                VerifyOutcome::Valid
            } else {
                VerifyOutcome::InvalidCode
            });
        }

        if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
            return Ok(VerifyOutcome::NotANumber);
        }

        let valid = self
            .totp(purpose, recipient, security_stamp)?
            .check_current(code)
            .context("Failed to check one-time code")?;

        Ok(if valid {
            VerifyOutcome::Valid
        } else {
            VerifyOutcome::InvalidCode
        })
    }

    fn totp(&self, purpose: OtpPurpose, recipient: &str, security_stamp: Uuid) -> Result<TOTP> {
        let step = self.validity.as_secs().max(30);
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            step,
            derive_secret(purpose, recipient, security_stamp),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }
}

/// Secret = SHA-256(stamp || SHA-256(purpose | recipient)).
///
/// The inner digest is the per-purpose modifier; the stamp binds the code to
/// the subject's current credential generation.
fn derive_secret(purpose: OtpPurpose, recipient: &str, security_stamp: Uuid) -> Vec<u8> {
    let mut modifier = Sha256::new();
    modifier.update(purpose.as_str().as_bytes());
    modifier.update(b"|");
    modifier.update(recipient.as_bytes());

    let mut secret = Sha256::new();
    secret.update(security_stamp.as_bytes());
    secret.update(modifier.finalize());
    secret.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::channel::LogOtpSender;

    fn service(validity: Duration) -> OneTimeCodeService {
        OneTimeCodeService::new(Arc::new(LogOtpSender), validity)
    }

    fn delivery() -> OtpDelivery {
        OtpDelivery::new(
            "+37060000000".to_string(),
            OtpPurpose::DeviceRegistration,
            OtpChannel::Sms,
            "Your registration code is {code}".to_string(),
        )
        .expect("valid delivery")
    }

    #[test]
    fn delivery_requires_code_placeholder() {
        let result = OtpDelivery::new(
            "+37060000000".to_string(),
            OtpPurpose::DeviceRegistration,
            OtpChannel::Sms,
            "no placeholder".to_string(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn delivery_requires_recipient() {
        let result = OtpDelivery::new(
            "  ".to_string(),
            OtpPurpose::DeviceRegistration,
            OtpChannel::Sms,
            "{code}".to_string(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn derived_code_verifies() {
        let service = service(Duration::from_secs(120));
        let stamp = Uuid::new_v4();

        let code = service
            .totp(OtpPurpose::DeviceRegistration, "+37060000000", stamp)
            .expect("totp")
            .generate_current()
            .expect("code");

        let outcome = service
            .verify("+37060000000", &code, OtpPurpose::DeviceRegistration, stamp)
            .await
            .expect("verify");
        assert_eq!(outcome, VerifyOutcome::Valid);
    }

    #[tokio::test]
    async fn stamp_rotation_invalidates_code() {
        let service = service(Duration::from_secs(120));
        let stamp = Uuid::new_v4();

        let code = service
            .totp(OtpPurpose::DeviceRegistration, "+37060000000", stamp)
            .expect("totp")
            .generate_current()
            .expect("code");

        let rotated = Uuid::new_v4();
        let outcome = service
            .verify(
                "+37060000000",
                &code,
                OtpPurpose::DeviceRegistration,
                rotated,
            )
            .await
            .expect("verify");
        assert_eq!(outcome, VerifyOutcome::InvalidCode);
    }

    #[tokio::test]
    async fn non_numeric_code_is_rejected() {
        let service = service(Duration::from_secs(120));
        let outcome = service
            .verify(
                "+37060000000",
                "12a456",
                OtpPurpose::DeviceRegistration,
                Uuid::new_v4(),
            )
            .await
            .expect("verify");
        assert_eq!(outcome, VerifyOutcome::NotANumber);
    }

    #[tokio::test]
    async fn resend_within_window_is_rate_limited() {
        let service = service(Duration::from_secs(120));
        let stamp = Uuid::new_v4();

        let first = service.send(&delivery(), stamp).await.expect("send");
        assert_eq!(first, SendOutcome::Sent);

        let second = service.send(&delivery(), stamp).await.expect("send");
        assert_eq!(second, SendOutcome::RateLimited);
    }

    #[tokio::test]
    async fn resend_allowed_after_window_elapses() {
        let service = service(Duration::from_millis(10));
        let stamp = Uuid::new_v4();

        let first = service.send(&delivery(), stamp).await.expect("send");
        assert_eq!(first, SendOutcome::Sent);

        tokio::time::sleep(Duration::from_millis(30)).await;

        let again = service.send(&delivery(), stamp).await.expect("send");
        assert_eq!(again, SendOutcome::Sent);
    }

    #[tokio::test]
    async fn developer_code_short_circuits() {
        let service = service(Duration::from_secs(120)).with_developer_code("424242".to_string());
        let stamp = Uuid::new_v4();

        let outcome = service
            .verify(
                "+37060000000",
                "424242",
                OtpPurpose::DeviceRegistration,
                stamp,
            )
            .await
            .expect("verify");
        assert_eq!(outcome, VerifyOutcome::Valid);

        let wrong = service
            .verify(
                "+37060000000",
                "000000",
                OtpPurpose::DeviceRegistration,
                stamp,
            )
            .await
            .expect("verify");
        assert_eq!(wrong, VerifyOutcome::InvalidCode);
    }
}
