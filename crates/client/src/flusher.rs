//! Periodic retry of buffered usage updates.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use warden_core::{Authority, Error, Result};
use warden_governance::Usage;

use crate::cache::{PendingUpdate, PendingUsage, SuspensionCache};

/// Outcome of one flush.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    /// Updates put back for the next flush.
    pub retained: usize,
    /// Updates dropped because the principal is suspended.
    pub suspended: usize,
    /// Updates the authority refused for good, such as an unknown policy.
    pub dropped: usize,
}

/// Everything a flush needs, shared with the enforcement client.
#[derive(Clone)]
pub struct FlushContext {
    pub authority: Arc<dyn Authority>,
    pub pending: Arc<PendingUsage>,
    pub cache: Arc<SuspensionCache>,
    pub timeout: Duration,
}

impl FlushContext {
    /// Send every buffered update once.
    pub async fn flush(&self) -> FlushReport {
        let mut report = FlushReport::default();

        for update in self.pending.drain() {
            match self.deliver(&update).await {
                Ok(()) => report.sent += 1,
                Err(Error::Suspended(suspension)) => {
                    self.cache.insert(*suspension);
                    report.suspended += 1;
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(policy = %update.policy.name, user = %update.user, error = %e, "Buffered usage retained");
                    self.pending.restore(update);
                    report.retained += 1;
                }
                Err(e) => {
                    tracing::warn!(policy = %update.policy.name, user = %update.user, error = %e, "Buffered usage refused, dropping it");
                    report.dropped += 1;
                }
            }
        }

        if report != FlushReport::default() {
            tracing::info!(
                sent = report.sent,
                retained = report.retained,
                suspended = report.suspended,
                dropped = report.dropped,
                "Buffered usage flushed"
            );
        }
        report
    }

    async fn deliver(&self, update: &PendingUpdate) -> Result<()> {
        let call = async {
            match update.usage {
                Usage::Delta(delta) => self.authority.modify_metric(&update.policy, &update.user, delta).await,
                Usage::Absolute(value) => self.authority.update_metric(&update.policy, &update.user, value).await,
            }
        };
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| Error::timeout(format!("authority call exceeded {:?}", self.timeout)))?
    }
}

/// Background task running [`FlushContext::flush`] on a fixed period.
pub struct UsageFlusher {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl UsageFlusher {
    pub fn spawn(context: FlushContext, period: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !context.pending.is_empty() {
                            context.flush().await;
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
            tracing::debug!("Usage flusher stopped");
        });

        Self { shutdown, task }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Usage flusher task failed");
        }
    }
}
