//! Device-auth state, configuration, and the single-use challenge caches.

use crate::api::handlers::device::rate_limit::RateLimiter;
use crate::device::models::DeviceMode;
use crate::otp::channel::OtpSender;
use crate::otp::service::OneTimeCodeService;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

const DEFAULT_TRUST_DELAY_SECONDS: u64 = 0;
const DEFAULT_MAX_DEVICES: u32 = 5;
const DEFAULT_OTP_VALIDITY_SECONDS: u64 = 120;
const DEFAULT_CHALLENGE_TTL_SECONDS: u64 = 5 * 60;
const DEFAULT_TOKEN_TTL_SECONDS: u64 = 60 * 60;
const PRODUCTION_ENVIRONMENT: &str = "production";

#[derive(Clone, Debug)]
pub struct DeviceAuthConfig {
    client_id: String,
    client_secret: SecretString,
    trust_delay_seconds: u64,
    max_devices: u32,
    otp_validity_seconds: u64,
    challenge_ttl_seconds: u64,
    token_ttl_seconds: u64,
    environment: String,
    developer_code: Option<String>,
}

impl DeviceAuthConfig {
    #[must_use]
    pub fn new(client_id: String, client_secret: SecretString) -> Self {
        Self {
            client_id,
            client_secret,
            trust_delay_seconds: DEFAULT_TRUST_DELAY_SECONDS,
            max_devices: DEFAULT_MAX_DEVICES,
            otp_validity_seconds: DEFAULT_OTP_VALIDITY_SECONDS,
            challenge_ttl_seconds: DEFAULT_CHALLENGE_TTL_SECONDS,
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            environment: PRODUCTION_ENVIRONMENT.to_string(),
            developer_code: None,
        }
    }

    #[must_use]
    pub fn with_trust_delay_seconds(mut self, seconds: u64) -> Self {
        self.trust_delay_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_max_devices(mut self, max_devices: u32) -> Self {
        self.max_devices = max_devices;
        self
    }

    #[must_use]
    pub fn with_otp_validity_seconds(mut self, seconds: u64) -> Self {
        self.otp_validity_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_challenge_ttl_seconds(mut self, seconds: u64) -> Self {
        self.challenge_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_token_ttl_seconds(mut self, seconds: u64) -> Self {
        self.token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_environment(mut self, environment: String) -> Self {
        self.environment = environment;
        self
    }

    #[must_use]
    pub fn with_developer_code(mut self, code: String) -> Self {
        self.developer_code = Some(code);
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> &SecretString {
        &self.client_secret
    }

    #[must_use]
    pub fn trust_delay_seconds(&self) -> u64 {
        self.trust_delay_seconds
    }

    #[must_use]
    pub fn max_devices(&self) -> u32 {
        self.max_devices
    }

    #[must_use]
    pub fn otp_validity_seconds(&self) -> u64 {
        self.otp_validity_seconds
    }

    #[must_use]
    pub fn challenge_ttl_seconds(&self) -> u64 {
        self.challenge_ttl_seconds
    }

    #[must_use]
    pub fn token_ttl_seconds(&self) -> u64 {
        self.token_ttl_seconds
    }

    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// The developer bypass code, only when one is configured AND the
    /// environment is not production. Never default-on.
    #[must_use]
    pub fn developer_code_allowed(&self) -> Option<&str> {
        if self.environment == PRODUCTION_ENVIRONMENT {
            return None;
        }
        self.developer_code.as_deref()
    }
}

/// Pending registration challenge, keyed by `(user_id, device_id)`.
pub struct RegistrationChallenge {
    pub challenge: String,
    pub code_challenge: String,
    pub mode: DeviceMode,
    /// Where the one-time code went (pin slot only); verify must target the
    /// same address.
    pub otp_recipient: Option<String>,
    created_at: Instant,
}

/// Pending fingerprint re-authentication challenge, keyed by registration id.
pub struct AuthorizeChallenge {
    pub challenge: String,
    pub code_challenge: String,
    created_at: Instant,
}

/// In-memory single-use challenge store.
///
/// Entries are consumed on take (removed under the lock before any check
/// runs), so two racing completions see exactly one winner. Expiry is
/// enforced on both store (prune) and take.
pub struct ChallengeCache {
    ttl: Duration,
    registration: Mutex<HashMap<(Uuid, String), RegistrationChallenge>>,
    authorize: Mutex<HashMap<Uuid, AuthorizeChallenge>>,
}

impl ChallengeCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            registration: Mutex::new(HashMap::new()),
            authorize: Mutex::new(HashMap::new()),
        }
    }

    /// Stores a registration challenge, replacing any previous one for the
    /// same `(user, device)` pair (re-init overwrites).
    pub async fn store_registration(
        &self,
        user_id: Uuid,
        device_id: &str,
        challenge: String,
        code_challenge: String,
        mode: DeviceMode,
        otp_recipient: Option<String>,
    ) {
        let mut entries = self.registration.lock().await;
        entries.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        entries.insert(
            (user_id, device_id.to_string()),
            RegistrationChallenge {
                challenge,
                code_challenge,
                mode,
                otp_recipient,
                created_at: Instant::now(),
            },
        );
    }

    /// Atomically removes and returns the pending registration challenge.
    pub async fn take_registration(
        &self,
        user_id: Uuid,
        device_id: &str,
    ) -> Option<RegistrationChallenge> {
        let mut entries = self.registration.lock().await;
        entries
            .remove(&(user_id, device_id.to_string()))
            .filter(|entry| entry.created_at.elapsed() < self.ttl)
    }

    /// Stores an authorize challenge, replacing any previous one for the
    /// registration id.
    pub async fn store_authorize(
        &self,
        registration_id: Uuid,
        challenge: String,
        code_challenge: String,
    ) {
        let mut entries = self.authorize.lock().await;
        entries.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        entries.insert(
            registration_id,
            AuthorizeChallenge {
                challenge,
                code_challenge,
                created_at: Instant::now(),
            },
        );
    }

    /// Atomically removes and returns the pending authorize challenge.
    pub async fn take_authorize(&self, registration_id: Uuid) -> Option<AuthorizeChallenge> {
        let mut entries = self.authorize.lock().await;
        entries
            .remove(&registration_id)
            .filter(|entry| entry.created_at.elapsed() < self.ttl)
    }
}

pub struct DeviceAuthState {
    config: DeviceAuthConfig,
    challenges: ChallengeCache,
    otp: OneTimeCodeService,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl DeviceAuthState {
    #[must_use]
    pub fn new(
        config: DeviceAuthConfig,
        otp_sender: Arc<dyn OtpSender>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        let mut otp = OneTimeCodeService::new(
            otp_sender,
            Duration::from_secs(config.otp_validity_seconds()),
        );
        if let Some(code) = config.developer_code_allowed() {
            otp = otp.with_developer_code(code.to_string());
        }
        let challenges = ChallengeCache::new(Duration::from_secs(config.challenge_ttl_seconds()));
        Self {
            config,
            challenges,
            otp,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &DeviceAuthConfig {
        &self.config
    }

    #[must_use]
    pub fn challenges(&self) -> &ChallengeCache {
        &self.challenges
    }

    #[must_use]
    pub fn otp(&self) -> &OneTimeCodeService {
        &self.otp
    }

    pub(crate) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DeviceAuthConfig {
        DeviceAuthConfig::new("mobile-app".to_string(), SecretString::from("s3cret"))
    }

    #[test]
    fn config_defaults_and_overrides() {
        let config = config();
        assert_eq!(config.client_id(), "mobile-app");
        assert_eq!(config.trust_delay_seconds(), DEFAULT_TRUST_DELAY_SECONDS);
        assert_eq!(config.max_devices(), DEFAULT_MAX_DEVICES);
        assert_eq!(config.otp_validity_seconds(), DEFAULT_OTP_VALIDITY_SECONDS);
        assert_eq!(
            config.challenge_ttl_seconds(),
            DEFAULT_CHALLENGE_TTL_SECONDS
        );
        assert_eq!(config.token_ttl_seconds(), DEFAULT_TOKEN_TTL_SECONDS);
        assert_eq!(config.environment(), "production");

        let config = config
            .with_trust_delay_seconds(600)
            .with_max_devices(2)
            .with_otp_validity_seconds(60)
            .with_challenge_ttl_seconds(120)
            .with_token_ttl_seconds(1800)
            .with_environment("staging".to_string());

        assert_eq!(config.trust_delay_seconds(), 600);
        assert_eq!(config.max_devices(), 2);
        assert_eq!(config.otp_validity_seconds(), 60);
        assert_eq!(config.challenge_ttl_seconds(), 120);
        assert_eq!(config.token_ttl_seconds(), 1800);
        assert_eq!(config.environment(), "staging");
    }

    #[test]
    fn developer_code_refused_in_production() {
        let config = config().with_developer_code("424242".to_string());
        assert_eq!(config.developer_code_allowed(), None);

        let config = config.with_environment("dev".to_string());
        assert_eq!(config.developer_code_allowed(), Some("424242"));
    }

    #[tokio::test]
    async fn registration_challenge_is_single_use() {
        let cache = ChallengeCache::new(Duration::from_secs(60));
        let user_id = Uuid::new_v4();

        cache
            .store_registration(
                user_id,
                "dev-1",
                "challenge".to_string(),
                "code-challenge".to_string(),
                DeviceMode::Pin,
                None,
            )
            .await;

        let first = cache.take_registration(user_id, "dev-1").await;
        assert!(first.is_some());

        // Consumed on first take, even though nothing was verified yet.
        let second = cache.take_registration(user_id, "dev-1").await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn expired_registration_challenge_is_gone() {
        let cache = ChallengeCache::new(Duration::from_millis(5));
        let user_id = Uuid::new_v4();

        cache
            .store_registration(
                user_id,
                "dev-1",
                "challenge".to_string(),
                "code-challenge".to_string(),
                DeviceMode::Pin,
                None,
            )
            .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.take_registration(user_id, "dev-1").await.is_none());
    }

    #[tokio::test]
    async fn authorize_challenge_is_single_use() {
        let cache = ChallengeCache::new(Duration::from_secs(60));
        let registration_id = Uuid::new_v4();

        cache
            .store_authorize(
                registration_id,
                "challenge".to_string(),
                "code-challenge".to_string(),
            )
            .await;

        assert!(cache.take_authorize(registration_id).await.is_some());
        assert!(cache.take_authorize(registration_id).await.is_none());
    }

    #[tokio::test]
    async fn reinit_overwrites_previous_challenge() {
        let cache = ChallengeCache::new(Duration::from_secs(60));
        let user_id = Uuid::new_v4();

        cache
            .store_registration(
                user_id,
                "dev-1",
                "first".to_string(),
                "cc-1".to_string(),
                DeviceMode::Pin,
                None,
            )
            .await;
        cache
            .store_registration(
                user_id,
                "dev-1",
                "second".to_string(),
                "cc-2".to_string(),
                DeviceMode::Fingerprint,
                Some("+37060000000".to_string()),
            )
            .await;

        let entry = cache
            .take_registration(user_id, "dev-1")
            .await
            .expect("entry");
        assert_eq!(entry.challenge, "second");
        assert_eq!(entry.mode, DeviceMode::Fingerprint);
    }
}
