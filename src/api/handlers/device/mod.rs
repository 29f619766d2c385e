//! Device registration, authorization, and token endpoints.

pub mod authorize;
pub mod manage;
pub mod password;
pub mod rate_limit;
pub mod register;
pub mod session;
pub mod state;
pub mod storage;
pub mod token;
pub mod types;
pub(crate) mod utils;

pub use rate_limit::NoopRateLimiter;
pub use state::{DeviceAuthConfig, DeviceAuthState};
