//! Warden authority governance.
//!
//! This crate provides:
//! - Policy matching of request signatures
//! - The suspension escalation engine
//! - `WardenAuthority`, the check-and-record service
//! - The background trigger sweep and infraction purge
//! - Tracing and Prometheus setup

pub mod auditor;
pub mod authority;
pub mod context;
pub mod escalation;
pub mod matcher;
pub mod metrics;
pub mod tracing_layer;

pub use auditor::{AuditSchedule, BackgroundAuditor};
pub use authority::WardenAuthority;
pub use context::{AuthorityContext, AuthorityServices};
pub use escalation::{count_in_window, expiration_for, select_level, EscalationEngine, Usage};
pub use matcher::PolicyMatcher;
pub use metrics::{setup_metrics_recorder, track_request};
pub use tracing_layer::configure_tracing;
