//! Authority application context.
//!
//! Everything the authority process shares is built once here and handed to
//! the components that need it. Background services are started and stopped
//! in an explicit order.

use std::sync::Arc;
use std::time::Duration;

use warden_core::{config::AppConfig, InfractionStore, MetricService, PolicyStore};
use warden_notifier::{
    event_channel, EventReceiver, NotificationDispatcher, NotificationTransport, SubscriptionRegistry,
};

use crate::auditor::{AuditSchedule, BackgroundAuditor};
use crate::authority::WardenAuthority;
use crate::escalation::EscalationEngine;

/// Shared state of a running authority.
pub struct AuthorityContext {
    pub config: AppConfig,
    pub authority: Arc<WardenAuthority>,
    pub subscriptions: Arc<SubscriptionRegistry>,
}

impl AuthorityContext {
    /// Wire the engine, authority and subscription registry on top of the
    /// given collaborators. The returned receiver feeds the dispatcher.
    pub fn build(
        config: AppConfig,
        policies: Arc<dyn PolicyStore>,
        infractions: Arc<dyn InfractionStore>,
        metrics: Arc<dyn MetricService>,
    ) -> (Self, EventReceiver) {
        let (events, receiver) = event_channel(config.notifier.queue_capacity);

        let engine = EscalationEngine::new(
            infractions.clone(),
            metrics,
            config.authority.admin_user.clone(),
        )
        .with_events(events);

        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let authority = Arc::new(WardenAuthority::new(
            policies,
            infractions,
            Arc::new(engine),
            subscriptions.clone(),
        ));

        let context = Self {
            config,
            authority,
            subscriptions,
        };
        (context, receiver)
    }

    /// Start the dispatcher and the auditor.
    pub fn start(&self, events: EventReceiver) -> AuthorityServices {
        let transport =
            NotificationTransport::new(Duration::from_millis(self.config.notifier.connect_timeout_ms));
        let dispatcher = NotificationDispatcher::spawn(events, self.subscriptions.clone(), transport);

        let schedule = AuditSchedule::from(&self.config.authority);
        let auditor = BackgroundAuditor::spawn(self.authority.clone(), schedule);

        tracing::info!(
            sweep_secs = schedule.sweep_interval.as_secs(),
            purge_secs = schedule.purge_interval.as_secs(),
            "Authority background services started"
        );

        AuthorityServices { dispatcher, auditor }
    }
}

/// Background tasks owned by the authority.
pub struct AuthorityServices {
    dispatcher: NotificationDispatcher,
    auditor: BackgroundAuditor,
}

impl AuthorityServices {
    /// Stop the auditor first so no new escalations are queued, then drain
    /// the dispatcher.
    pub async fn shutdown(self) {
        self.auditor.shutdown().await;
        self.dispatcher.shutdown().await;
        tracing::info!("Authority background services stopped");
    }
}
