//! Axum-based HTTP server for the authority.

use axum::{
    extract::{Json, MatchedPath, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use warden_core::{
    config::ServerConfig,
    types::{Infraction, Policy, PolicyId, Subscription, SubscriptionId},
    Authority, Error, Registration, Result,
};
use warden_governance::track_request;

use crate::error::ApiError;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Enable request tracing.
    pub enable_tracing: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_tracing: true,
        }
    }
}

impl From<&ServerConfig> for GatewayConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            ..Self::default()
        }
    }
}

/// Shared application state.
pub struct AppState {
    pub authority: Arc<dyn Authority>,
}

/// Gateway server.
pub struct GatewayServer {
    config: GatewayConfig,
    state: Arc<AppState>,
    metrics_handle: Option<PrometheusHandle>,
}

impl GatewayServer {
    /// Create a new gateway server.
    pub fn new(config: GatewayConfig, authority: Arc<dyn Authority>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { authority }),
            metrics_handle: None,
        }
    }

    /// Set metrics handle.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Build the Axum router.
    pub fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/v1/policies/:id", get(get_policy_handler))
            .route(
                "/v1/policies/:id/infractions/:user",
                get(get_infractions_handler),
            )
            .route("/v1/policies/:id/suspensions", get(get_suspensions_handler))
            .route("/v1/policies/:id/users/:user/metric", post(metric_handler))
            .route("/v1/register", post(register_handler))
            .route("/v1/subscriptions/:id", delete(unregister_handler))
            .route_layer(middleware::from_fn(track_metrics))
            .with_state(self.state.clone());

        if let Some(handle) = &self.metrics_handle {
            let handle = handle.clone();
            router = router.route("/metrics", get(move || async move { handle.render() }));
        }

        if self.config.enable_tracing {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::transport(format!("Failed to bind {}: {}", addr, e)))
    }

    /// Serve on `listener` until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener
            .local_addr()
            .map_err(|e| Error::transport(format!("Listener has no address: {}", e)))?;
        tracing::info!(addr = %addr, "Authority gateway starting");

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::transport(format!("Server error: {}", e)))?;

        tracing::info!("Authority gateway stopped");
        Ok(())
    }

    /// Bind and serve until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Usage change for one principal. Exactly one of `delta` or `value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

/// Registration of an enforcement point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub policies: Vec<Policy>,
    pub hostname: String,
    pub port: u16,
}

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status.
    pub status: String,
    /// Version.
    pub version: String,
}

// =============================================================================
// Handlers
// =============================================================================

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn get_policy_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<PolicyId>,
) -> ApiResult<Json<Policy>> {
    let policy = state
        .authority
        .get_policy(id)
        .await?
        .ok_or_else(|| Error::not_found(format!("policy {}", id)))?;
    Ok(Json(policy))
}

async fn get_infractions_handler(
    State(state): State<Arc<AppState>>,
    Path((id, user)): Path<(PolicyId, String)>,
) -> ApiResult<Json<Vec<Infraction>>> {
    Ok(Json(state.authority.get_infractions(id, &user).await?))
}

async fn get_suspensions_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<PolicyId>,
) -> ApiResult<Json<Vec<Infraction>>> {
    Ok(Json(state.authority.get_suspensions(id).await?))
}

async fn metric_handler(
    State(state): State<Arc<AppState>>,
    Path((id, user)): Path<(PolicyId, String)>,
    Json(payload): Json<MetricRequest>,
) -> ApiResult<StatusCode> {
    let policy = state
        .authority
        .get_policy(id)
        .await?
        .ok_or_else(|| Error::not_found(format!("policy {}", id)))?;

    match (payload.delta, payload.value) {
        (Some(delta), None) => state.authority.modify_metric(&policy, &user, delta).await?,
        (None, Some(value)) => state.authority.update_metric(&policy, &user, value).await?,
        _ => {
            return Err(Error::invalid_request("exactly one of delta or value is required").into());
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<Json<Registration>> {
    let callback = Subscription::new(payload.hostname, payload.port);
    let registration = state.authority.register(payload.policies, callback).await?;
    Ok(Json(registration))
}

async fn unregister_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SubscriptionId>,
) -> ApiResult<StatusCode> {
    let subscription = Subscription {
        id: Some(id),
        hostname: String::new(),
        port: 0,
    };
    state.authority.unregister(&subscription).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    track_request(&method, &path, response.status().as_u16(), start.elapsed().as_secs_f64());
    response
}
