//! The enforcement point.
//!
//! An [`EnforcementClient`] sits in front of protected operations. For each
//! request it resolves the governing policies, consults its local
//! suspension view, reports usage to the authority and turns `Suspended`
//! answers into rejections. Any other failure lets the request through.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use warden_core::{
    config::EnforcementConfig,
    now_millis,
    types::{Policy, PolicyConfig, Subscription},
    Authority, Error, Registration, Result, Suspension,
};
use warden_governance::{PolicyMatcher, Usage};

use crate::authority_client::HttpAuthorityClient;
use crate::cache::{lasts_longer, PendingUsage, SuspensionCache};
use crate::flusher::{FlushContext, FlushReport, UsageFlusher};
use crate::listener::{EventListener, PolicyNames};
use crate::policy_source::load_policies;

const MIN_FLUSH_PERIOD: Duration = Duration::from_millis(10);

/// Runtime settings of an enforcement point.
#[derive(Debug, Clone)]
pub struct EnforcementSettings {
    /// Address the authority pushes suspensions to.
    pub callback_host: String,
    /// Push listener port; 0 picks an ephemeral port.
    pub callback_port: u16,
    /// Bound on every authority call.
    pub authority_timeout: Duration,
    pub flush_interval: Duration,
}

impl Default for EnforcementSettings {
    fn default() -> Self {
        Self {
            callback_host: "127.0.0.1".to_string(),
            callback_port: 9080,
            authority_timeout: Duration::from_secs(2),
            flush_interval: Duration::from_secs(60),
        }
    }
}

impl From<&EnforcementConfig> for EnforcementSettings {
    fn from(config: &EnforcementConfig) -> Self {
        Self {
            callback_host: config.callback_host.clone(),
            callback_port: config.callback_port,
            authority_timeout: Duration::from_millis(config.authority_timeout_ms),
            flush_interval: Duration::from_secs(config.flush_interval_secs),
        }
    }
}

/// Outcome of [`EnforcementClient::check_request`].
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow,
    Reject(Suspension),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Human-readable rejection, if any.
    pub fn rejection_message(&self) -> Option<String> {
        match self {
            Decision::Allow => None,
            Decision::Reject(suspension) => Some(suspension.rejection_message()),
        }
    }
}

struct ActiveRegistration {
    registration: Registration,
    listener: EventListener,
    flusher: UsageFlusher,
}

/// Per-request enforcement against a central authority.
pub struct EnforcementClient {
    authority: Arc<dyn Authority>,
    settings: EnforcementSettings,
    matcher: RwLock<Arc<PolicyMatcher>>,
    cache: Arc<SuspensionCache>,
    pending: Arc<PendingUsage>,
    epoch: AtomicU64,
    active: Mutex<Option<ActiveRegistration>>,
}

impl EnforcementClient {
    /// Build a client for `configs`. Fails on malformed url/verb patterns.
    pub fn new(
        authority: Arc<dyn Authority>,
        configs: &[PolicyConfig],
        settings: EnforcementSettings,
    ) -> Result<Self> {
        let matcher = PolicyMatcher::build(configs)?;
        tracing::info!(routes = matcher.len(), "Enforcement client created");

        Ok(Self {
            authority,
            settings,
            matcher: RwLock::new(Arc::new(matcher)),
            cache: Arc::new(SuspensionCache::new()),
            pending: Arc::new(PendingUsage::new()),
            epoch: AtomicU64::new(0),
            active: Mutex::new(None),
        })
    }

    /// Load policies from `policy_source` and talk to `authority_url` over HTTP.
    pub fn from_config(config: &EnforcementConfig) -> Result<Self> {
        let source = config
            .policy_source
            .as_deref()
            .ok_or_else(|| Error::config("enforcement.policy_source is not set"))?;
        let configs = load_policies(source)?;
        let authority = Arc::new(HttpAuthorityClient::from_config(config)?);
        Self::new(authority, &configs, EnforcementSettings::from(config))
    }

    pub fn cache(&self) -> &Arc<SuspensionCache> {
        &self.cache
    }

    pub fn pending(&self) -> &Arc<PendingUsage> {
        &self.pending
    }

    /// Current view of the governed policies.
    pub async fn policies(&self) -> Vec<Arc<Policy>> {
        self.matcher.read().await.policies()
    }

    /// Address of the push listener while registered.
    pub async fn callback_addr(&self) -> Option<std::net::SocketAddr> {
        self.active.lock().await.as_ref().map(|a| a.listener.local_addr())
    }

    // ========================================================================
    // Per-request contract
    // ========================================================================

    /// Report `usage` for `user` against every policy governing
    /// `path`/`verb`, rejecting if any of them has the user suspended.
    ///
    /// Every governing policy is consulted whatever the match order; when
    /// several reject, the longest-lasting suspension is reported.
    pub async fn check_request(&self, user: &str, path: &str, verb: &str, usage: Usage) -> Decision {
        let matcher = self.matcher.read().await.clone();

        let mut rejection: Option<Suspension> = None;
        for policy in matcher.matches(path, verb) {
            if !policy.governs(user) {
                continue;
            }
            if let Decision::Reject(suspension) = self.check_policy(&policy, user, usage).await {
                metrics::counter!(
                    "warden_enforcement_rejections_total",
                    "policy" => policy.name.clone()
                )
                .increment(1);
                rejection = Some(match rejection {
                    Some(current) => longest(current, suspension),
                    None => suspension,
                });
            }
        }

        match rejection {
            Some(suspension) => {
                tracing::info!(
                    user,
                    policy = %suspension.policy_name,
                    expires = suspension.expires,
                    "Request rejected"
                );
                Decision::Reject(suspension)
            }
            None => Decision::Allow,
        }
    }

    async fn check_policy(&self, policy: &Arc<Policy>, user: &str, usage: Usage) -> Decision {
        let Some(policy_id) = policy.id else {
            tracing::debug!(policy = %policy.name, "Policy not registered with the authority, skipping");
            return Decision::Allow;
        };

        if let Some(suspension) = self.cache.active(policy_id, user, now_millis()) {
            return Decision::Reject(suspension);
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let result = self.call_authority(policy, user, usage).await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            tracing::debug!(policy = %policy.name, user, "Discarding result from a previous registration");
            return Decision::Allow;
        }

        match result {
            Ok(()) => Decision::Allow,
            Err(Error::Suspended(suspension)) => {
                self.cache.insert((*suspension).clone());
                Decision::Reject(*suspension)
            }
            // A timed-out call may already have been applied, so relative
            // updates replayed from the buffer are delivered at least once.
            Err(e) if e.is_transient() => {
                metrics::counter!("warden_authority_call_failures_total").increment(1);
                tracing::warn!(policy = %policy.name, user, error = %e, "Authority call failed, allowing request");
                self.pending.add(policy.clone(), user, usage);
                Decision::Allow
            }
            Err(e) => {
                metrics::counter!("warden_authority_call_failures_total").increment(1);
                tracing::warn!(policy = %policy.name, user, error = %e, "Authority refused usage update, dropping it");
                Decision::Allow
            }
        }
    }

    async fn call_authority(&self, policy: &Policy, user: &str, usage: Usage) -> Result<()> {
        match usage {
            Usage::Delta(delta) => self.with_timeout(self.authority.modify_metric(policy, user, delta)).await,
            Usage::Absolute(value) => self.with_timeout(self.authority.update_metric(policy, user, value)).await,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Reconcile the local policy set with the authority, seed the
    /// suspension cache and start receiving pushes. Calling it again while
    /// registered returns the existing registration.
    pub async fn register(&self) -> Result<Registration> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            return Ok(current.registration.clone());
        }

        let local = self.matcher.read().await.clone();
        let policies: Vec<Policy> = local.policies().iter().map(|p| p.as_ref().clone()).collect();

        let names = Arc::new(PolicyNames::new());
        let listener = EventListener::bind(
            &self.settings.callback_host,
            self.settings.callback_port,
            self.cache.clone(),
            names.clone(),
        )
        .await?;

        let callback = Subscription::new(self.settings.callback_host.clone(), listener.local_addr().port());
        let registration = match self.with_timeout(self.authority.register(policies, callback)).await {
            Ok(registration) => registration,
            Err(e) => {
                listener.shutdown().await;
                return Err(e);
            }
        };

        for policy in &registration.policies {
            if let Some(id) = policy.id {
                names.insert(id, policy.name.clone());
            }
        }
        *self.matcher.write().await = Arc::new(local.resolve(&registration.policies));
        self.seed_suspensions(&registration.policies).await;

        let flusher = UsageFlusher::spawn(self.flush_context(), self.settings.flush_interval.max(MIN_FLUSH_PERIOD));

        tracing::info!(
            subscription_id = ?registration.subscription.id,
            callback = %listener.local_addr(),
            policies = registration.policies.len(),
            "Registered with authority"
        );

        *active = Some(ActiveRegistration {
            registration: registration.clone(),
            listener,
            flusher,
        });
        Ok(registration)
    }

    /// Flush buffered usage, stop receiving pushes and remove the
    /// subscription. Results of calls still in flight are discarded.
    /// Calling it while not registered does nothing.
    pub async fn unregister(&self) -> Result<()> {
        let Some(active) = self.active.lock().await.take() else {
            return Ok(());
        };

        self.epoch.fetch_add(1, Ordering::SeqCst);
        active.listener.shutdown().await;
        active.flusher.shutdown().await;

        let report = self.flush().await;
        if report.retained > 0 {
            tracing::warn!(retained = report.retained, "Buffered usage could not be flushed before unregister");
        }

        let result = self
            .with_timeout(self.authority.unregister(&active.registration.subscription))
            .await;
        tracing::info!(subscription_id = ?active.registration.subscription.id, "Unregistered from authority");
        result
    }

    /// Send buffered usage now.
    pub async fn flush(&self) -> FlushReport {
        self.flush_context().flush().await
    }

    fn flush_context(&self) -> FlushContext {
        FlushContext {
            authority: self.authority.clone(),
            pending: self.pending.clone(),
            cache: self.cache.clone(),
            timeout: self.settings.authority_timeout,
        }
    }

    async fn seed_suspensions(&self, policies: &[Policy]) {
        let now = now_millis();
        for policy in policies {
            let Some(id) = policy.id else { continue };
            match self.with_timeout(self.authority.get_suspensions(id)).await {
                Ok(suspensions) => {
                    for infraction in &suspensions {
                        self.cache.apply(infraction, &policy.name, now);
                    }
                }
                Err(e) => tracing::warn!(policy = %policy.name, error = %e, "Could not load suspensions"),
            }
        }
    }

    async fn with_timeout<T>(&self, call: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.settings.authority_timeout, call)
            .await
            .map_err(|_| Error::timeout(format!("authority call exceeded {:?}", self.settings.authority_timeout)))?
    }
}

/// The suspension lifting last. Ties go to the policy name so the choice
/// does not depend on match order.
fn longest(a: Suspension, b: Suspension) -> Suspension {
    let tie = !lasts_longer(&a, &b) && b.policy_name > a.policy_name;
    if lasts_longer(&b, &a) || tie {
        b
    } else {
        a
    }
}
