//! Two-step registration of a device credential slot.
//!
//! Init mints an opaque challenge bound to the caller's PKCE code challenge
//! and, for the pin slot, delivers a one-time code out of band. Complete burns
//! the challenge, checks the PKCE verifier, checks the slot-specific proof,
//! and only then touches the devices table.

use anyhow::Result;
use chrono::Duration;
use sqlx::PgPool;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::handlers::device::session::SessionKind;
use crate::api::handlers::device::state::DeviceAuthState;
use crate::api::handlers::device::storage::{UserRecord, rotate_security_stamp};
use crate::api::handlers::device::types::{RegisterCompleteRequest, RegisterInitRequest};
use crate::api::handlers::device::utils::{generate_challenge, pkce_matches};
use crate::device::models::{Device, DeviceMode, DevicePlatform};
use crate::device::proof::{hash_secret, public_key_is_valid, signature_matches};
use crate::device::repo::DeviceRepo;
use crate::device::trust::{DeviceTrust, LimitDecision, NewDevice};
use crate::otp::channel::OtpChannel;
use crate::otp::service::{OtpDelivery, OtpPurpose, SendOutcome, VerifyOutcome};

const OTP_TEMPLATE: &str = "Your device registration code is {code}";

/// Outcome of the init step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiateOutcome {
    /// Challenge minted (and code dispatched, for the pin slot).
    Challenge(String),
    /// A code for this recipient is still valid; no new challenge was minted.
    OtpRateLimited,
    /// Unknown mode/channel, or the user has no address for the channel.
    InvalidRequest,
}

/// Outcome of the complete step. Every verification failure collapses into
/// [`CompleteOutcome::Rejected`] so callers cannot probe which check failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompleteOutcome {
    Registered {
        registration_id: Uuid,
        device_id: String,
    },
    Rejected,
    /// Adding a slot to an existing registration needs password assurance.
    PasswordRequired,
    /// Device cap reached and nothing was evictable.
    MaxDevicesExceeded,
}

pub struct RegistrationService<'a> {
    pool: &'a PgPool,
    state: &'a DeviceAuthState,
}

impl<'a> RegistrationService<'a> {
    #[must_use]
    pub fn new(pool: &'a PgPool, state: &'a DeviceAuthState) -> Self {
        Self { pool, state }
    }

    /// Mint a registration challenge for `(user, device_id)`.
    ///
    /// Pin slot: the one-time code is dispatched before the challenge is
    /// stored, so a rate-limited send leaves any earlier challenge intact.
    /// Re-init for the same pair overwrites the pending challenge.
    ///
    /// # Errors
    /// Returns error if code derivation, dispatch, or RNG fails.
    pub async fn initiate(
        &self,
        user: &UserRecord,
        request: &RegisterInitRequest,
    ) -> Result<InitiateOutcome> {
        let Some(mode) = DeviceMode::parse(&request.mode) else {
            return Ok(InitiateOutcome::InvalidRequest);
        };
        if request.code_challenge.trim().is_empty() || request.device_id.trim().is_empty() {
            return Ok(InitiateOutcome::InvalidRequest);
        }

        let otp_recipient = if mode == DeviceMode::Pin {
            let channel = match request.channel.as_deref() {
                None => OtpChannel::Sms,
                Some(value) => match OtpChannel::parse(value) {
                    Some(channel) => channel,
                    None => return Ok(InitiateOutcome::InvalidRequest),
                },
            };
            let Some(recipient) = recipient_for(user, channel) else {
                return Ok(InitiateOutcome::InvalidRequest);
            };
            let delivery = OtpDelivery::new(
                recipient.clone(),
                OtpPurpose::DeviceRegistration,
                channel,
                OTP_TEMPLATE.to_string(),
            )?;
            if self.state.otp().send(&delivery, user.security_stamp).await?
                == SendOutcome::RateLimited
            {
                return Ok(InitiateOutcome::OtpRateLimited);
            }
            Some(recipient)
        } else {
            None
        };

        let challenge = generate_challenge()?;
        self.state
            .challenges()
            .store_registration(
                user.user_id,
                &request.device_id,
                challenge.clone(),
                request.code_challenge.clone(),
                mode,
                otp_recipient,
            )
            .await;

        info!(
            user_id = %user.user_id,
            device_id = %request.device_id,
            mode = %mode.as_str(),
            "registration challenge issued"
        );
        Ok(InitiateOutcome::Challenge(challenge))
    }

    /// Burn the pending challenge and finish registration.
    ///
    /// The challenge is consumed before any check runs; a failed completion
    /// requires a fresh init. `session_kind` gates augmenting an existing
    /// registration with a second slot.
    ///
    /// # Errors
    /// Returns error if a database query or hashing fails.
    pub async fn complete(
        &self,
        user: &UserRecord,
        session_kind: SessionKind,
        request: &RegisterCompleteRequest,
    ) -> Result<CompleteOutcome> {
        let Some(entry) = self
            .state
            .challenges()
            .take_registration(user.user_id, &request.device_id)
            .await
        else {
            return Ok(CompleteOutcome::Rejected);
        };

        let code_ok: bool = request
            .code
            .as_bytes()
            .ct_eq(entry.challenge.as_bytes())
            .into();
        if !code_ok || !pkce_matches(&request.code_verifier, &entry.code_challenge) {
            warn!(user_id = %user.user_id, "registration challenge mismatch");
            return Ok(CompleteOutcome::Rejected);
        }

        let Some(platform) = DevicePlatform::parse(&request.device_platform) else {
            return Ok(CompleteOutcome::Rejected);
        };
        if request.device_name.trim().is_empty() {
            return Ok(CompleteOutcome::Rejected);
        }

        let credential = match entry.mode {
            DeviceMode::Fingerprint => {
                let (Some(public_key), Some(signature)) =
                    (&request.public_key, &request.code_signature)
                else {
                    return Ok(CompleteOutcome::Rejected);
                };
                if !public_key_is_valid(public_key)
                    || !signature_matches(public_key, &entry.challenge, signature)
                {
                    return Ok(CompleteOutcome::Rejected);
                }
                SlotCredential::PublicKey(public_key.clone())
            }
            DeviceMode::Pin => {
                let (Some(otp), Some(pin)) = (&request.otp, &request.pin) else {
                    return Ok(CompleteOutcome::Rejected);
                };
                if pin.trim().is_empty() {
                    return Ok(CompleteOutcome::Rejected);
                }
                let Some(recipient) = &entry.otp_recipient else {
                    return Ok(CompleteOutcome::Rejected);
                };
                let outcome = self
                    .state
                    .otp()
                    .verify(
                        recipient,
                        otp,
                        OtpPurpose::DeviceRegistration,
                        user.security_stamp,
                    )
                    .await?;
                if outcome != VerifyOutcome::Valid {
                    return Ok(CompleteOutcome::Rejected);
                }
                // Consume the code: rotating the stamp invalidates it everywhere.
                rotate_security_stamp(self.pool, user.user_id).await?;
                SlotCredential::PinHash(hash_secret(pin)?)
            }
        };

        if let Some(existing) =
            DeviceRepo::get_by_user_device(self.pool, user.user_id, &request.device_id).await?
        {
            if slot_change_blocked(&existing, session_kind) {
                return Ok(CompleteOutcome::PasswordRequired);
            }
            match &credential {
                SlotCredential::PinHash(hash) => {
                    DeviceRepo::set_pin_secret(self.pool, existing.registration_id, hash).await?;
                }
                SlotCredential::PublicKey(pem) => {
                    DeviceRepo::set_public_key(self.pool, existing.registration_id, pem).await?;
                }
            }
            info!(
                user_id = %user.user_id,
                registration_id = %existing.registration_id,
                mode = %entry.mode.as_str(),
                "credential slot added to existing device"
            );
            return Ok(CompleteOutcome::Registered {
                registration_id: existing.registration_id,
                device_id: existing.device_id,
            });
        }

        match DeviceTrust::enforce_device_limit(
            self.pool,
            user.user_id,
            self.state.config().max_devices(),
        )
        .await?
        {
            LimitDecision::Exceeded => return Ok(CompleteOutcome::MaxDevicesExceeded),
            LimitDecision::Evicted(evicted) => {
                info!(user_id = %user.user_id, evicted = %evicted, "pending device evicted");
            }
            LimitDecision::Allowed => {}
        }

        let (pin_secret_hash, public_key_pem) = match credential {
            SlotCredential::PinHash(hash) => (Some(hash), None),
            SlotCredential::PublicKey(pem) => (None, Some(pem)),
        };
        let device = DeviceTrust::register(
            self.pool,
            NewDevice {
                user_id: user.user_id,
                device_id: request.device_id.clone(),
                name: request.device_name.clone(),
                platform,
                pin_secret_hash,
                public_key_pem,
            },
            Duration::seconds(i64::try_from(self.state.config().trust_delay_seconds())?),
        )
        .await?;

        info!(
            user_id = %user.user_id,
            registration_id = %device.registration_id,
            mode = %entry.mode.as_str(),
            "device registered"
        );
        Ok(CompleteOutcome::Registered {
            registration_id: device.registration_id,
            device_id: device.device_id,
        })
    }
}

enum SlotCredential {
    PinHash(String),
    PublicKey(String),
}

/// A locked device only accepts new credentials over a password-assured
/// session; proof-based sessions stay blocked until a password login.
fn slot_change_blocked(existing: &Device, session_kind: SessionKind) -> bool {
    existing.requires_password && session_kind != SessionKind::Password
}

/// Address on file for the given channel, if any.
fn recipient_for(user: &UserRecord, channel: OtpChannel) -> Option<String> {
    match channel {
        OtpChannel::Email => Some(user.email.clone()),
        OtpChannel::Sms | OtpChannel::Viber | OtpChannel::Push => user.phone.clone(),
    }
}
