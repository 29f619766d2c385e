//! API handlers for the device authority.

pub mod device;
pub mod health;
pub mod root;
