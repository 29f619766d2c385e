//! OAuth2 token-endpoint grants.

pub mod validator;

pub use validator::{DeviceGrantValidator, GrantOutcome, PasswordGrantOutcome};
