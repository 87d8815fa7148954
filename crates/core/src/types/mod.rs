//! Core type definitions for Warden.
//!
//! This module contains the data model shared by the authority and the
//! enforcement points: policies, suspension levels, infractions,
//! subscriptions and the events pushed between them.

pub mod infraction;
pub mod policy;
pub mod window;

pub use infraction::*;
pub use policy::*;
pub use window::*;
