//! Delivery abstraction for one-time codes.
//!
//! The core only interprets success/failure from a sender; how a message
//! reaches the recipient (SMS gateway, Viber API, SMTP, push service) is an
//! implementation detail behind the [`OtpSender`] trait.
//!
//! The default sender for local dev is `LogOtpSender`, which logs and returns `Ok(())`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

/// Out-of-band channel for code delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OtpChannel {
    Sms,
    Viber,
    Email,
    Push,
}

impl OtpChannel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Viber => "viber",
            Self::Email => "email",
            Self::Push => "push",
        }
    }

    /// Parse an API-supplied channel string.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sms" => Some(Self::Sms),
            "viber" => Some(Self::Viber),
            "email" => Some(Self::Email),
            "push" => Some(Self::Push),
            _ => None,
        }
    }
}

/// A rendered message ready for dispatch.
#[derive(Clone, Debug)]
pub struct OtpMessage {
    pub recipient: String,
    pub body: String,
    pub channel: OtpChannel,
}

/// Code delivery abstraction.
pub trait OtpSender: Send + Sync {
    /// Deliver a message or return an error to fail the send.
    fn send(&self, message: &OtpMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of dispatching it.
#[derive(Clone, Debug)]
pub struct LogOtpSender;

impl OtpSender for LogOtpSender {
    fn send(&self, message: &OtpMessage) -> Result<()> {
        info!(
            recipient = %message.recipient,
            channel = %message.channel.as_str(),
            body = %message.body,
            "otp send stub"
        );
        Ok(())
    }
}
