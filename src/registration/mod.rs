//! Challenge-based device registration (init/complete).

pub mod service;

pub use service::{CompleteOutcome, InitiateOutcome, RegistrationService};
