//! Background task draining the suspension event queue into the transport.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use warden_core::types::SuspensionEvent;

use crate::frame::encode_event;
use crate::registry::SubscriptionRegistry;
use crate::transport::NotificationTransport;

/// Producer side of the event queue, held by the escalation engine.
pub type EventSender = mpsc::Sender<SuspensionEvent>;

/// Consumer side of the event queue.
pub type EventReceiver = mpsc::Receiver<SuspensionEvent>;

/// Create a bounded event queue.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Handle to a running dispatcher.
pub struct NotificationDispatcher {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl NotificationDispatcher {
    /// Start consuming `events`, pushing each one to the current subscribers.
    pub fn spawn(
        mut events: EventReceiver,
        registry: Arc<SubscriptionRegistry>,
        transport: NotificationTransport,
    ) -> Self {
        let (shutdown, mut stop) = watch::channel(false);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => dispatch(&registry, &transport, event).await,
                        None => break,
                    },
                    _ = stop.changed() => {
                        // Deliver whatever was already queued before stopping.
                        while let Ok(event) = events.try_recv() {
                            dispatch(&registry, &transport, event).await;
                        }
                        break;
                    }
                }
            }
            tracing::debug!("Notification dispatcher stopped");
        });

        Self { shutdown, task }
    }

    /// Stop the dispatcher after draining queued events.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Notification dispatcher task failed");
        }
    }
}

async fn dispatch(registry: &SubscriptionRegistry, transport: &NotificationTransport, event: SuspensionEvent) {
    let subscribers = registry.snapshot();
    if subscribers.is_empty() {
        tracing::debug!(policy_id = event.policy_id, user = %event.user_name, "No subscribers for suspension event");
        return;
    }

    let payload = match encode_event(&event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode suspension event");
            return;
        }
    };

    let report = transport.push(&subscribers, payload).await;
    tracing::info!(
        policy_id = event.policy_id,
        user = %event.user_name,
        delivered = report.delivered,
        failed = report.failed,
        "Suspension event pushed"
    );
}
