//! Fan-out of suspension events to subscribed enforcement points.

use bytes::Bytes;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinSet;

use warden_core::{types::Subscription, Error, Result};

use crate::frame::encode_frame;

/// Outcome of a single [`NotificationTransport::push`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    pub delivered: usize,
    pub failed: usize,
}

/// At-most-once delivery of a payload to every subscriber.
///
/// Each subscriber gets its own connection and task. A push returns only
/// after every task has finished, and connections are closed by the task
/// that opened them.
#[derive(Debug, Clone)]
pub struct NotificationTransport {
    connect_timeout: Duration,
}

impl NotificationTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Deliver `payload` once to each subscriber. Failures are logged and
    /// counted, never returned.
    pub async fn push(&self, subscribers: &[Subscription], payload: Bytes) -> PushReport {
        let mut report = PushReport::default();
        if subscribers.is_empty() {
            return report;
        }

        let frame = match encode_frame(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping push with unencodable payload");
                report.failed = subscribers.len();
                return report;
            }
        };

        let mut tasks = JoinSet::new();
        for subscriber in subscribers {
            let address = subscriber.address();
            let frame = frame.clone();
            let timeout = self.connect_timeout;

            tasks.spawn(async move {
                let outcome = tokio::time::timeout(timeout, deliver(&address, &frame))
                    .await
                    .unwrap_or_else(|_| Err(Error::timeout(format!("push to {}", address))));
                (address, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((address, Ok(()))) => {
                    tracing::debug!(subscriber = %address, "Pushed suspension event");
                    metrics::counter!("warden_push_deliveries_total", "outcome" => "delivered").increment(1);
                    report.delivered += 1;
                }
                Ok((address, Err(e))) => {
                    tracing::warn!(subscriber = %address, error = %e, "Failed to push suspension event");
                    metrics::counter!("warden_push_deliveries_total", "outcome" => "failed").increment(1);
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Push task aborted");
                    metrics::counter!("warden_push_deliveries_total", "outcome" => "failed").increment(1);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

impl Default for NotificationTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

async fn deliver(address: &str, frame: &Bytes) -> Result<()> {
    let mut stream = TcpStream::connect(address)
        .await
        .map_err(|e| Error::transport(format!("connect to {}: {}", address, e)))?;
    stream.set_nodelay(true).ok();

    stream
        .write_all(frame)
        .await
        .map_err(|e| Error::transport(format!("write to {}: {}", address, e)))?;
    stream
        .shutdown()
        .await
        .map_err(|e| Error::transport(format!("close {}: {}", address, e)))?;

    Ok(())
}
