//! Axum middleware running the per-request enforcement contract.

use axum::{
    extract::{Request, State},
    http::{HeaderName, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use warden_core::{config::EnforcementConfig, Error, Result};
use warden_governance::Usage;

use crate::enforcement::{Decision, EnforcementClient};

/// Authenticated principal, inserted as a request extension by whatever
/// authenticates the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

/// State of the [`enforce`] middleware.
#[derive(Clone)]
pub struct EnforcementState {
    pub client: Arc<EnforcementClient>,
    /// Header read when no [`Principal`] extension is present.
    pub principal_header: HeaderName,
    /// Usage reported per request.
    pub usage: Usage,
}

impl EnforcementState {
    /// Count one unit of usage per request, reading the principal from
    /// `x-warden-user` when no extension is set.
    pub fn new(client: Arc<EnforcementClient>) -> Self {
        Self {
            client,
            principal_header: HeaderName::from_static("x-warden-user"),
            usage: Usage::Delta(1.0),
        }
    }

    /// Read the principal from the configured `principal_header`.
    pub fn from_config(client: Arc<EnforcementClient>, config: &EnforcementConfig) -> Result<Self> {
        let header = HeaderName::from_bytes(config.principal_header.to_ascii_lowercase().as_bytes())
            .map_err(|e| Error::config(format!("invalid principal header {}: {}", config.principal_header, e)))?;
        Ok(Self::new(client).with_header(header))
    }

    pub fn with_header(mut self, header: HeaderName) -> Self {
        self.principal_header = header;
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }
}

/// Reject requests from suspended principals with `403 Forbidden`.
///
/// Requests without a principal pass through.
pub async fn enforce(State(state): State<EnforcementState>, req: Request, next: Next) -> Response {
    let principal = req
        .extensions()
        .get::<Principal>()
        .map(|p| p.0.clone())
        .or_else(|| {
            req.headers()
                .get(&state.principal_header)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        });

    let Some(user) = principal.filter(|u| !u.is_empty()) else {
        tracing::warn!(path = %req.uri().path(), "Request without principal, skipping enforcement");
        return next.run(req).await;
    };

    let path = req.uri().path().to_string();
    let verb = req.method().as_str().to_string();

    match state.client.check_request(&user, &path, &verb, state.usage).await {
        Decision::Allow => next.run(req).await,
        Decision::Reject(suspension) => {
            (StatusCode::FORBIDDEN, suspension.rejection_message()).into_response()
        }
    }
}
