//! HTTP handlers for the credential service.

pub mod auth;
pub mod metrics;

pub use auth::*;
