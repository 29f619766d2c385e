//! Trust lifecycle for device records.
//!
//! States: Pending (inside the activation delay) -> Trusted -> RequiresPassword
//! (after a credential change) -> Trusted (cleared by a password login) ->
//! Removed. Activation is evaluated lazily against the stored timestamp; no
//! background job exists.

use crate::device::models::{Device, DevicePlatform};
use crate::device::repo::DeviceRepo;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Input for a new device row. Credential slots are filled by the
/// registration service before calling [`DeviceTrust::register`].
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub user_id: Uuid,
    pub device_id: String,
    pub name: String,
    pub platform: DevicePlatform,
    pub pin_secret_hash: Option<String>,
    pub public_key_pem: Option<String>,
}

/// Outcome of the per-user device-count policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    /// Below the maximum; registration may proceed.
    Allowed,
    /// At the maximum; the named pending device was removed to make room.
    Evicted(Uuid),
    /// At the maximum and every device is trusted; registration must fail.
    Exceeded,
}

pub struct DeviceTrust;

impl DeviceTrust {
    /// Creates the device row in the Pending state.
    ///
    /// `trust_activation_at` is set to `now + delay`; the device cannot
    /// authenticate until that instant passes.
    ///
    /// # Errors
    /// Returns error if the database insert fails.
    pub async fn register(pool: &PgPool, new: NewDevice, delay: Duration) -> Result<Device> {
        let now = Utc::now();
        let device = Device {
            registration_id: Uuid::new_v4(),
            user_id: new.user_id,
            device_id: new.device_id,
            name: new.name,
            platform: new.platform,
            pin_secret_hash: new.pin_secret_hash,
            public_key_pem: new.public_key_pem,
            is_trusted: false,
            trust_activation_at: Some(now + delay),
            requires_password: false,
            created_at: now,
            last_used_at: None,
        };
        DeviceRepo::create(pool, &device).await?;
        Ok(device)
    }

    /// Lazily evaluates the activation delay, persisting the flip to Trusted
    /// the first time it is observed.
    ///
    /// # Errors
    /// Returns error if the database update fails.
    pub async fn check_trust(pool: &PgPool, device: &mut Device) -> Result<bool> {
        if device.is_trusted {
            return Ok(true);
        }
        if activation_passed(device, Utc::now()) {
            DeviceRepo::mark_trusted(pool, device.registration_id).await?;
            device.is_trusted = true;
            return Ok(true);
        }
        Ok(false)
    }

    /// Broad invalidation after a username/password/email change: every device
    /// of the user must see a password login before proof-based auth resumes.
    ///
    /// # Errors
    /// Returns error if the database update fails.
    pub async fn on_credential_changed(pool: &PgPool, user_id: Uuid) -> Result<u64> {
        DeviceRepo::set_requires_password_for_all(pool, user_id).await
    }

    /// A password-grant login carrying a device id unlocks that device only;
    /// siblings stay locked. Returns whether a device matched.
    ///
    /// # Errors
    /// Returns error if the database update fails.
    pub async fn on_password_login(pool: &PgPool, user_id: Uuid, device_id: &str) -> Result<bool> {
        DeviceRepo::clear_requires_password(pool, user_id, device_id).await
    }

    /// Enforces the per-user maximum, evicting the oldest still-pending device
    /// when possible. Count-then-evict is best effort under concurrency; a
    /// transient overshoot is acceptable and self-corrects.
    ///
    /// # Errors
    /// Returns error if a database query fails.
    pub async fn enforce_device_limit(
        pool: &PgPool,
        user_id: Uuid,
        max_devices: u32,
    ) -> Result<LimitDecision> {
        let devices = DeviceRepo::list_for_user(pool, user_id).await?;
        if devices.len() < max_devices as usize {
            return Ok(LimitDecision::Allowed);
        }
        match eviction_candidate(&devices, Utc::now()) {
            Some(registration_id) => {
                DeviceRepo::remove_by_registration_id(pool, registration_id).await?;
                Ok(LimitDecision::Evicted(registration_id))
            }
            None => Ok(LimitDecision::Exceeded),
        }
    }
}

/// Whether the activation instant has passed. A missing timestamp means the
/// row predates the delay feature and counts as activated.
fn activation_passed(device: &Device, now: DateTime<Utc>) -> bool {
    device
        .trust_activation_at
        .is_none_or(|activation_at| now >= activation_at)
}

/// Picks the oldest device that is not yet effectively trusted. A device past
/// its activation instant counts as trusted even if the lazy flip has not been
/// persisted yet; evicting it would silently drop a usable credential.
pub(crate) fn eviction_candidate(devices: &[Device], now: DateTime<Utc>) -> Option<Uuid> {
    devices
        .iter()
        .filter(|device| !device.is_trusted && !activation_passed(device, now))
        .min_by_key(|device| device.created_at)
        .map(|device| device.registration_id)
}
