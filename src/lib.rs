//! # Fidinda (Trusted Device Authority)
//!
//! `fidinda` binds cryptographic credentials to user accounts so that mobile
//! and native clients can obtain access tokens without re-entering a password.
//!
//! ## Device lifecycle
//!
//! A device is registered through a two-phase, PKCE-bound protocol and then
//! moves through a small state machine:
//!
//! - **Pending:** registered but still inside the trust-activation delay.
//! - **Trusted:** the delay has elapsed (evaluated lazily at read time).
//! - **RequiresPassword:** a sensitive account change (password/email) locked
//!   every device of the user; a password-grant login carrying the matching
//!   `device_id` unlocks that one device.
//! - **Removed:** deleted by the user or by the device-count eviction policy.
//!
//! ## Credential slots
//!
//! One device record may hold up to two credential slots under a single
//! `registration_id`:
//!
//! - **Pin:** a salted hash of the user's PIN, verified directly at the token
//!   endpoint. Registration is gated by a one-time code sent out of band.
//! - **Fingerprint:** an RSA public key pinned at registration; token requests
//!   prove possession by signing a fresh server challenge. The stored key is
//!   always authoritative.
//!
//! ## Token issuance
//!
//! The `/v1/oauth/token` endpoint implements the `device_authentication`
//! extension grant next to a standard password grant. Proof failures collapse
//! to the generic `invalid_grant`; the one intentionally distinguishable error
//! is `requires_password`, which instructs the client to fall back to a full
//! password login.

pub mod api;
pub mod cli;
pub mod device;
pub mod grant;
pub mod otp;
pub mod registration;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
