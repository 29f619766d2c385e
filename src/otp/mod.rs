//! One-time codes: RFC 6238 derivation, resend limiting, delivery seam.

pub mod channel;
pub mod service;
