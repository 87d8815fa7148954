//! Enforcement over HTTP against a running authority gateway.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware,
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use warden_client::{
    enforce, parse_policies, EnforcementClient, EnforcementSettings, EnforcementState,
    HttpAuthorityClient, Principal, SourceFormat,
};
use warden_core::{config::AppConfig, types::Subscription, Authority, Error};
use warden_gateway::{GatewayConfig, GatewayServer};
use warden_governance::AuthorityContext;
use warden_store::{InMemoryInfractionStore, InMemoryMetricService, InMemoryPolicyStore};

const POLICIES: &str = r#"[
    {
        "url": "/v1/alerts.*",
        "verb": "POST",
        "service": "argus",
        "name": "alert-writes",
        "users": ["hpotter"],
        "triggerType": "ABOVE",
        "aggregator": "SUM",
        "threshold": [2],
        "timeUnit": "10m",
        "levels": [{ "levelNumber": 1, "infractionCount": 1, "suspensionTime": 600000 }]
    }
]"#;

struct TestAuthority {
    url: String,
    stop: oneshot::Sender<()>,
    server: JoinHandle<()>,
}

impl TestAuthority {
    async fn start() -> Self {
        let (context, _events) = AuthorityContext::build(
            AppConfig::default(),
            Arc::new(InMemoryPolicyStore::new()),
            Arc::new(InMemoryInfractionStore::new()),
            Arc::new(InMemoryMetricService::new()),
        );
        let config = GatewayConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            enable_tracing: false,
        };
        let gateway = GatewayServer::new(config, context.authority);
        let listener = gateway.bind().await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            gateway
                .serve(listener, async move {
                    let _ = stopped.await;
                })
                .await
                .unwrap();
        });

        Self { url, stop, server }
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        self.server.await.unwrap();
    }
}

async fn enforcement(url: &str) -> Arc<EnforcementClient> {
    let authority = Arc::new(HttpAuthorityClient::new(url).unwrap());
    let configs = parse_policies(POLICIES, SourceFormat::Json).unwrap();
    let settings = EnforcementSettings {
        callback_port: 0,
        authority_timeout: Duration::from_secs(2),
        ..EnforcementSettings::default()
    };
    let client = Arc::new(EnforcementClient::new(authority, &configs, settings).unwrap());
    client.register().await.unwrap();
    client
}

fn app(client: Arc<EnforcementClient>) -> Router {
    Router::new()
        .route("/v1/alerts/:id", post(|| async { "stored" }))
        .route("/v1/metrics", get(|| async { "metrics" }))
        .route_layer(middleware::from_fn_with_state(EnforcementState::new(client), enforce))
}

async fn call(app: &Router, method: &str, uri: &str, user: Option<&str>) -> (StatusCode, String) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-warden-user", user);
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&body).to_string())
}

#[tokio::test]
async fn test_middleware_rejects_suspended_principal() {
    let authority = TestAuthority::start().await;
    let client = enforcement(&authority.url).await;
    let app = app(client.clone());

    let (status, body) = call(&app, "POST", "/v1/alerts/1", Some("hpotter")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "stored");

    let (status, body) = call(&app, "POST", "/v1/alerts/2", Some("hpotter")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.contains("hpotter"));
    assert!(body.contains("alert-writes"));

    // Unprotected route and anonymous callers pass.
    let (status, _) = call(&app, "GET", "/v1/metrics", Some("hpotter")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "POST", "/v1/alerts/3", None).await;
    assert_eq!(status, StatusCode::OK);

    client.unregister().await.unwrap();
    authority.stop().await;
}

#[tokio::test]
async fn test_principal_extension_takes_precedence() {
    let authority = TestAuthority::start().await;
    let client = enforcement(&authority.url).await;
    let app = app(client.clone()).layer(Extension(Principal("hpotter".to_string())));

    call(&app, "POST", "/v1/alerts/1", Some("someone-else")).await;
    let (status, _) = call(&app, "POST", "/v1/alerts/2", Some("someone-else")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    client.unregister().await.unwrap();
    authority.stop().await;
}

#[tokio::test]
async fn test_client_built_from_config() {
    let authority = TestAuthority::start().await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("policies.json");
    std::fs::write(&source, POLICIES).unwrap();

    let mut config = AppConfig::default().enforcement;
    config.authority_url = authority.url.clone();
    config.policy_source = Some(source.to_string_lossy().to_string());
    config.callback_port = 0;
    config.principal_header = "X-Caller".to_string();
    config.username = Some("argus".to_string());

    let client = Arc::new(EnforcementClient::from_config(&config).unwrap());
    client.register().await.unwrap();
    let state = EnforcementState::from_config(client.clone(), &config).unwrap();
    let app = Router::new()
        .route("/v1/alerts/:id", post(|| async { "stored" }))
        .route_layer(middleware::from_fn_with_state(state, enforce));

    let request = || {
        Request::builder()
            .method("POST")
            .uri("/v1/alerts/1")
            .header("x-caller", "hpotter")
            .body(Body::empty())
            .unwrap()
    };
    assert_eq!(app.clone().oneshot(request()).await.unwrap().status(), StatusCode::OK);
    assert_eq!(app.clone().oneshot(request()).await.unwrap().status(), StatusCode::FORBIDDEN);

    client.unregister().await.unwrap();
    authority.stop().await;
}

#[tokio::test]
async fn test_client_config_requires_policy_source() {
    let config = AppConfig::default().enforcement;
    assert!(matches!(EnforcementClient::from_config(&config), Err(Error::Config(_))));
}

#[tokio::test]
async fn test_http_client_maps_errors() {
    let authority = TestAuthority::start().await;
    let http = HttpAuthorityClient::new(&authority.url).unwrap();

    assert!(http.get_policy(999).await.unwrap().is_none());

    let configs = parse_policies(POLICIES, SourceFormat::Json).unwrap();
    let registration = http
        .register(vec![configs[0].policy.clone()], Subscription::new("127.0.0.1", 1))
        .await
        .unwrap();
    let policy = &registration.policies[0];

    http.modify_metric(policy, "hpotter", 3.0).await.unwrap_err();
    let err = http.modify_metric(policy, "hpotter", 1.0).await.unwrap_err();
    match err {
        Error::Suspended(suspension) => {
            assert_eq!(suspension.user_name, "hpotter");
            assert_eq!(suspension.policy_id, policy.id);
        }
        other => panic!("expected suspension, got {:?}", other),
    }

    let suspensions = http.get_suspensions(policy.id.unwrap()).await.unwrap();
    assert_eq!(suspensions.len(), 1);
    let infractions = http.get_infractions(policy.id.unwrap(), "hpotter").await.unwrap();
    assert_eq!(infractions.len(), 1);

    http.unregister(&registration.subscription).await.unwrap();
    authority.stop().await;
}

#[tokio::test]
async fn test_unreachable_authority_fails_open() {
    let authority = TestAuthority::start().await;
    let client = enforcement(&authority.url).await;
    authority.stop().await;

    let app = app(client.clone());
    let (status, _) = call(&app, "POST", "/v1/alerts/1", Some("hpotter")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(client.pending().len(), 1);

    // The authority is gone; unregister reports the failure but releases local state.
    assert!(client.unregister().await.is_err());
    assert!(client.callback_addr().await.is_none());
}
