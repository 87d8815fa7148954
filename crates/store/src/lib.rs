//! Reference storage adapters for Warden.
//!
//! The authority depends on persistence and metric collaborators only
//! through the traits in `warden_core`. This crate provides DashMap-backed
//! implementations used by the authority binary and the test suites.

pub mod memory;
pub mod metric;

pub use memory::{InMemoryInfractionStore, InMemoryPolicyStore};
pub use metric::InMemoryMetricService;
