//! End-to-end: an authority process, its HTTP gateway and two enforcement
//! points talking to it over HTTP and the push channel.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use warden_client::{
    parse_policies, EnforcementClient, EnforcementSettings, HttpAuthorityClient, SourceFormat, Usage,
};
use warden_core::{config::AppConfig, now_millis, types::PERMANENT};
use warden_gateway::{GatewayConfig, GatewayServer};
use warden_governance::{AuthorityContext, AuthorityServices};
use warden_store::{InMemoryInfractionStore, InMemoryMetricService, InMemoryPolicyStore};

const POLICIES: &str = r#"
policies:
  - url: "/v1/alerts.*"
    verb: "POST|PUT"
    service: argus
    name: alert-writes
    users: [hpotter, hgranger]
    triggerType: ABOVE
    aggregator: SUM
    threshold: [2]
    timeUnit: 10m
    levels:
      - levelNumber: 1
        infractionCount: 1
        suspensionTime: 50
      - levelNumber: 2
        infractionCount: 2
        suspensionTime: -1
"#;

struct Authority {
    url: String,
    services: AuthorityServices,
    stop: oneshot::Sender<()>,
    server: JoinHandle<()>,
}

impl Authority {
    async fn start() -> Self {
        let (context, events) = AuthorityContext::build(
            AppConfig::default(),
            Arc::new(InMemoryPolicyStore::new()),
            Arc::new(InMemoryInfractionStore::new()),
            Arc::new(InMemoryMetricService::new()),
        );
        let services = context.start(events);

        let config = GatewayConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            enable_tracing: false,
        };
        let gateway = GatewayServer::new(config, context.authority.clone());
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

        Self {
            url,
            services,
            stop,
            server,
        }
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        self.server.await.unwrap();
        self.services.shutdown().await;
    }
}

async fn enforcement_point(url: &str) -> EnforcementClient {
    let authority = Arc::new(HttpAuthorityClient::new(url).unwrap());
    let configs = parse_policies(POLICIES, SourceFormat::Yaml).unwrap();
    let settings = EnforcementSettings {
        callback_port: 0,
        ..EnforcementSettings::default()
    };
    let client = EnforcementClient::new(authority, &configs, settings).unwrap();
    client.register().await.unwrap();
    client
}

async fn post(client: &EnforcementClient, user: &str) -> bool {
    client
        .check_request(user, "/v1/alerts/7", "POST", Usage::Delta(1.0))
        .await
        .is_allowed()
}

#[tokio::test]
async fn test_escalation_across_enforcement_points() {
    let authority = Authority::start().await;
    let east = enforcement_point(&authority.url).await;
    let west = enforcement_point(&authority.url).await;

    let policy_id = east.policies().await[0].id.unwrap();
    assert_eq!(west.policies().await[0].id, Some(policy_id));

    // First level: a short suspension.
    assert!(post(&east, "hpotter").await);
    assert!(!post(&east, "hpotter").await);
    assert!(post(&east, "hgranger").await);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(east.cache().active(policy_id, "hpotter", now_millis()).is_none());

    // Second infraction in the window escalates to a permanent suspension.
    assert!(!post(&east, "hpotter").await);
    let suspension = east.cache().active(policy_id, "hpotter", now_millis()).unwrap();
    assert_eq!(suspension.expires, PERMANENT);

    // The other enforcement point learns it through the push channel.
    let mut pushed = None;
    for _ in 0..100 {
        pushed = west
            .cache()
            .active(policy_id, "hpotter", now_millis())
            .filter(|s| s.expires == PERMANENT);
        if pushed.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(pushed.is_some());
    assert!(!post(&west, "hpotter").await);

    east.unregister().await.unwrap();
    west.unregister().await.unwrap();
    authority.stop().await;
}

#[tokio::test]
async fn test_rest_surface_reports_infractions() {
    let authority = Authority::start().await;
    let east = enforcement_point(&authority.url).await;
    let policy_id = east.policies().await[0].id.unwrap();

    post(&east, "hpotter").await;
    assert!(!post(&east, "hpotter").await);

    let http = reqwest::Client::new();

    let health = http
        .get(format!("{}/health", authority.url))
        .send()
        .await
        .unwrap();
    assert!(health.status().is_success());

    let infractions: serde_json::Value = http
        .get(format!("{}/v1/policies/{}/infractions/hpotter", authority.url, policy_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let infractions = infractions.as_array().unwrap();
    assert_eq!(infractions.len(), 1);
    assert_eq!(infractions[0]["userName"], "hpotter");
    assert!(infractions[0]["expirationTimestamp"].as_i64().unwrap() > 0);

    let rejected = http
        .post(format!("{}/v1/policies/{}/users/hpotter/metric", authority.url, policy_id))
        .json(&serde_json::json!({ "delta": 1.0 }))
        .send()
        .await
        .unwrap();
    // Still inside the 50 ms suspension, or a second infraction: rejected either way.
    assert_eq!(rejected.status(), reqwest::StatusCode::FORBIDDEN);
    let body: serde_json::Value = rejected.json().await.unwrap();
    assert_eq!(body["code"], "SUSPENDED");
    assert_eq!(body["suspension"]["userName"], "hpotter");

    east.unregister().await.unwrap();
    authority.stop().await;
}
