//! Core traits for Warden.
//!
//! Traits are organized by collaborator:
//! - `store`: persistence of policies and infractions
//! - `metric`: usage time-series and aggregation
//! - `authority`: the RPC surface enforcement points call

pub mod authority;
pub mod metric;
pub mod store;

pub use authority::*;
pub use metric::*;
pub use store::*;
