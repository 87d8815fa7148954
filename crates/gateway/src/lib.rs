//! HTTP surface of the Warden authority.
//!
//! This crate exposes the `Authority` operations as a JSON API consumed by
//! enforcement points, plus health and Prometheus endpoints.

pub mod error;
pub mod server;

pub use error::{ApiError, ErrorResponse};
pub use server::{
    AppState, GatewayConfig, GatewayServer, HealthResponse, MetricRequest, RegisterRequest,
};
