//! Warden enforcement point.
//!
//! This crate provides:
//! - `HttpAuthorityClient`, the `Authority` implementation over HTTP
//! - `EnforcementClient`, the per-request contract with local suspension cache
//! - The push listener and the buffered usage flusher
//! - Policy source loading (JSON or YAML)
//! - The `enforce` axum middleware

pub mod authority_client;
pub mod cache;
pub mod enforcement;
pub mod flusher;
pub mod listener;
pub mod middleware;
pub mod policy_source;

pub use authority_client::HttpAuthorityClient;
pub use cache::{PendingUpdate, PendingUsage, SuspensionCache};
pub use enforcement::{Decision, EnforcementClient, EnforcementSettings};
pub use flusher::{FlushContext, FlushReport, UsageFlusher};
pub use listener::{EventListener, PolicyNames};
pub use middleware::{enforce, EnforcementState, Principal};
pub use policy_source::{load_policies, parse_policies, SourceFormat};
pub use warden_governance::Usage;
