use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, postgres::PgRow};
use utoipa::ToSchema;
use uuid::Uuid;

/// Proof type configured for a credential slot.
///
/// A single device record may hold both slots at once (PIN registered first,
/// fingerprint added later, or the other way around) under one
/// `registration_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    Pin,
    Fingerprint,
}

impl DeviceMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pin => "pin",
            Self::Fingerprint => "fingerprint",
        }
    }

    /// Parse an API-supplied mode string.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pin" => Some(Self::Pin),
            "fingerprint" => Some(Self::Fingerprint),
            _ => None,
        }
    }
}

/// Platform of the registering device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DevicePlatform {
    Ios,
    Android,
    Other,
}

impl DevicePlatform {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
            Self::Other => "other",
        }
    }

    /// Parse an API-supplied platform string.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ios" => Some(Self::Ios),
            "android" => Some(Self::Android),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Parse the persisted `devices.platform` textual value into a typed enum.
    fn from_db(value: &str) -> Result<Self, sqlx::Error> {
        Self::parse(value).ok_or_else(|| {
            sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid devices.platform value: {value}"),
            )))
        })
    }
}

/// One registered device: at most one row per `(user_id, device_id)`.
///
/// `registration_id` is the stable identifier clients use at the token
/// endpoint; it does not change when a second credential slot is added.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub registration_id: Uuid,
    pub user_id: Uuid,
    pub device_id: String,
    pub name: String,
    pub platform: DevicePlatform,
    /// Salted hash of the PIN; present when the pin slot is registered.
    pub pin_secret_hash: Option<String>,
    /// PEM-encoded RSA public key; present when the fingerprint slot is registered.
    pub public_key_pem: Option<String>,
    pub is_trusted: bool,
    pub trust_activation_at: Option<DateTime<Utc>>,
    pub requires_password: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Whether the given credential slot is populated.
    #[must_use]
    pub fn has_slot(&self, mode: DeviceMode) -> bool {
        match mode {
            DeviceMode::Pin => self.pin_secret_hash.is_some(),
            DeviceMode::Fingerprint => self.public_key_pem.is_some(),
        }
    }

    /// Registered credential slots, pin first.
    #[must_use]
    pub fn modes(&self) -> Vec<DeviceMode> {
        let mut modes = Vec::with_capacity(2);
        if self.pin_secret_hash.is_some() {
            modes.push(DeviceMode::Pin);
        }
        if self.public_key_pem.is_some() {
            modes.push(DeviceMode::Fingerprint);
        }
        modes
    }
}

impl<'r> FromRow<'r, PgRow> for Device {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let platform: String = row.try_get("platform")?;
        Ok(Self {
            registration_id: row.try_get("registration_id")?,
            user_id: row.try_get("user_id")?,
            device_id: row.try_get("device_id")?,
            name: row.try_get("name")?,
            platform: DevicePlatform::from_db(&platform)?,
            pin_secret_hash: row.try_get("pin_secret_hash")?,
            public_key_pem: row.try_get("public_key_pem")?,
            is_trusted: row.try_get("is_trusted")?,
            trust_activation_at: row.try_get("trust_activation_at")?,
            requires_password: row.try_get("requires_password")?,
            created_at: row.try_get("created_at")?,
            last_used_at: row.try_get("last_used_at")?,
        })
    }
}
