//! WardenAuthority registration, metric and purge behavior.

use std::sync::Arc;

use warden_core::{
    config::AppConfig,
    now_millis,
    types::{Aggregator, Infraction, Policy, Subscription, SuspensionLevel, TimeWindow, TriggerType, PERMANENT},
    Authority, Error, InfractionStore,
};
use warden_governance::AuthorityContext;
use warden_store::{InMemoryInfractionStore, InMemoryMetricService, InMemoryPolicyStore};

fn policy(name: &str, threshold: f64) -> Policy {
    Policy {
        id: None,
        service: "argus".to_string(),
        name: name.to_string(),
        owners: vec![],
        users: vec!["hpotter".to_string()],
        sub_system: "ws".to_string(),
        trigger_type: TriggerType::Above,
        aggregator: Aggregator::Sum,
        threshold: vec![threshold],
        time_unit: "1h".parse::<TimeWindow>().unwrap(),
        default_value: 0.0,
        cron_entry: "0 * * * *".to_string(),
        levels: vec![SuspensionLevel::new(1, 1, 60_000), SuspensionLevel::new(2, 2, PERMANENT)],
    }
}

struct Fixture {
    context: AuthorityContext,
    infractions: Arc<InMemoryInfractionStore>,
}

fn fixture() -> Fixture {
    let infractions = Arc::new(InMemoryInfractionStore::new());
    let (context, _events) = AuthorityContext::build(
        AppConfig::default(),
        Arc::new(InMemoryPolicyStore::new()),
        infractions.clone(),
        Arc::new(InMemoryMetricService::new()),
    );
    Fixture { context, infractions }
}

#[tokio::test]
async fn test_register_creates_policies_and_subscription() {
    let f = fixture();
    let authority = &f.context.authority;

    let registration = authority
        .register(vec![policy("writes", 10.0)], Subscription::new("10.0.0.5", 9080))
        .await
        .unwrap();

    assert_eq!(registration.policies.len(), 1);
    let id = registration.policies[0].id.unwrap();
    assert!(registration.subscription.id.is_some());
    assert_eq!(authority.get_policy(id).await.unwrap().unwrap().name, "writes");
    assert_eq!(f.context.subscriptions.len(), 1);
}

#[tokio::test]
async fn test_register_is_idempotent() {
    let f = fixture();
    let authority = &f.context.authority;
    let callback = Subscription::new("10.0.0.5", 9080);

    let first = authority
        .register(vec![policy("writes", 10.0)], callback.clone())
        .await
        .unwrap();
    let second = authority
        .register(vec![policy("writes", 10.0)], callback)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(f.context.subscriptions.len(), 1);
}

#[tokio::test]
async fn test_register_updates_changed_definition_in_place() {
    let f = fixture();
    let authority = &f.context.authority;
    let callback = Subscription::new("10.0.0.5", 9080);

    let first = authority
        .register(vec![policy("writes", 10.0)], callback.clone())
        .await
        .unwrap();
    let second = authority
        .register(vec![policy("writes", 50.0)], callback)
        .await
        .unwrap();

    assert_eq!(first.policies[0].id, second.policies[0].id);
    let stored = authority.get_policy(second.policies[0].id.unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.threshold, vec![50.0]);
}

#[tokio::test]
async fn test_register_rejects_invalid_policy() {
    let f = fixture();
    let mut invalid = policy("between", 1.0);
    invalid.trigger_type = TriggerType::Between;

    let err = f
        .context
        .authority
        .register(vec![invalid], Subscription::new("localhost", 9080))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn test_unregister_is_idempotent() {
    let f = fixture();
    let authority = &f.context.authority;

    let registration = authority
        .register(vec![], Subscription::new("localhost", 9080))
        .await
        .unwrap();
    authority.unregister(&registration.subscription).await.unwrap();
    authority.unregister(&registration.subscription).await.unwrap();

    assert!(f.context.subscriptions.is_empty());
}

#[tokio::test]
async fn test_metric_update_escalates_to_suspension() {
    let f = fixture();
    let authority = &f.context.authority;

    let registration = authority
        .register(vec![policy("writes", 10.0)], Subscription::new("localhost", 9080))
        .await
        .unwrap();
    let stored = &registration.policies[0];

    authority.modify_metric(stored, "hpotter", 5.0).await.unwrap();
    let err = authority.modify_metric(stored, "hpotter", 6.0).await.unwrap_err();
    assert!(err.is_suspended());

    let suspensions = authority.get_suspensions(stored.id.unwrap()).await.unwrap();
    assert_eq!(suspensions.len(), 1);
    assert_eq!(suspensions[0].user_name, "hpotter");

    // Other principals are unaffected.
    authority.modify_metric(stored, "hgranger", 1.0).await.unwrap();
}

#[tokio::test]
async fn test_metric_update_uses_stored_definition() {
    let f = fixture();
    let authority = &f.context.authority;

    let registration = authority
        .register(vec![policy("writes", 10.0)], Subscription::new("localhost", 9080))
        .await
        .unwrap();

    // A stale copy with a lax threshold does not bypass the stored one.
    let mut stale = registration.policies[0].clone();
    stale.threshold = vec![1000.0];

    let err = authority.update_metric(&stale, "hpotter", 20.0).await.unwrap_err();
    assert!(err.is_suspended());
}

#[tokio::test]
async fn test_metric_update_for_unknown_policy() {
    let f = fixture();
    let unknown = policy("ghost", 1.0).with_id(999);

    let err = f
        .context
        .authority
        .modify_metric(&unknown, "hpotter", 1.0)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_purge_keeps_active_suspensions() {
    let f = fixture();
    let now = now_millis();
    let old = now - 40 * 24 * 60 * 60 * 1000;

    f.infractions
        .update_infraction(Infraction::new(1, "a", old))
        .await
        .unwrap();
    f.infractions
        .update_infraction(Infraction::new(1, "b", old).with_expiration(Some(PERMANENT)))
        .await
        .unwrap();
    f.infractions
        .update_infraction(Infraction::new(1, "c", old).with_expiration(Some(now + 60_000)))
        .await
        .unwrap();
    f.infractions
        .update_infraction(Infraction::new(1, "d", now))
        .await
        .unwrap();

    let cutoff = now - 30 * 24 * 60 * 60 * 1000;
    assert_eq!(f.context.authority.purge(cutoff).await.unwrap(), 1);

    let remaining: Vec<String> = f
        .infractions
        .infractions_for_policy(1)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.user_name)
        .collect();
    assert_eq!(remaining.len(), 3);
    assert!(!remaining.contains(&"a".to_string()));
}

#[tokio::test]
async fn test_services_start_and_stop() {
    let infractions = Arc::new(InMemoryInfractionStore::new());
    let (context, events) = AuthorityContext::build(
        AppConfig::default(),
        Arc::new(InMemoryPolicyStore::new()),
        infractions,
        Arc::new(InMemoryMetricService::new()),
    );

    let services = context.start(events);
    services.shutdown().await;
}
