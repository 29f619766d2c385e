//! Device records, persistence, and the trust lifecycle.

pub mod models;
pub mod proof;
pub mod repo;
pub mod trust;
