//! Core types, traits, and error definitions for Warden.
//!
//! This crate provides the data model and collaborator interfaces shared by
//! the authority and the enforcement points.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result, Suspension};
pub use traits::*;
pub use types::*;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
