//! Periodic trigger sweep and infraction purge.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use warden_core::{config::AuthorityConfig, now_millis};

use crate::authority::WardenAuthority;

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Schedule of the background jobs.
#[derive(Debug, Clone, Copy)]
pub struct AuditSchedule {
    /// Trigger sweep period; also how long an idle key stays tracked.
    pub sweep_interval: Duration,
    pub purge_interval: Duration,
    /// Infractions older than this are purged unless still in force.
    pub retention: Duration,
}

impl From<&AuthorityConfig> for AuditSchedule {
    fn from(config: &AuthorityConfig) -> Self {
        Self {
            sweep_interval: Duration::from_secs(config.alert_update_interval_secs.max(1)),
            purge_interval: Duration::from_secs(config.purge_interval_secs.max(1)),
            retention: Duration::from_millis(
                config.infraction_retention_days.saturating_mul(DAY_MILLIS as u64),
            ),
        }
    }
}

/// Handle to the running auditor.
pub struct BackgroundAuditor {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BackgroundAuditor {
    pub fn spawn(authority: Arc<WardenAuthority>, schedule: AuditSchedule) -> Self {
        let (shutdown, mut stop) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut sweep = tokio::time::interval(schedule.sweep_interval);
            let mut purge = tokio::time::interval(schedule.purge_interval);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
            purge.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // Both intervals tick immediately; skip the startup tick.
            sweep.tick().await;
            purge.tick().await;

            loop {
                tokio::select! {
                    _ = sweep.tick() => run_sweep(&authority, schedule).await,
                    _ = purge.tick() => run_purge(&authority, schedule).await,
                    _ = stop.changed() => break,
                }
            }
            tracing::debug!("Background auditor stopped");
        });

        Self { shutdown, task }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Background auditor task failed");
        }
    }
}

/// One trigger sweep over recently updated keys.
pub async fn run_sweep(authority: &WardenAuthority, schedule: AuditSchedule) {
    let max_age = millis(schedule.sweep_interval);
    let recorded = authority
        .engine()
        .sweep(authority.policy_store().as_ref(), now_millis(), max_age)
        .await;
    tracing::debug!(recorded, tracked = authority.engine().tracked(), "Trigger sweep complete");
}

/// One purge of infractions past retention.
pub async fn run_purge(authority: &WardenAuthority, schedule: AuditSchedule) {
    let cutoff = now_millis().saturating_sub(millis(schedule.retention));
    if let Err(e) = authority.purge(cutoff).await {
        tracing::warn!(error = %e, "Infraction purge failed");
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
