//! Resolution of request signatures to governing policies.

use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

use warden_core::{
    types::{Policy, PolicyConfig},
    Error, Result,
};

/// One `pattern:verb` routing key with the policies it guards.
#[derive(Debug)]
struct RouteKey {
    key: String,
    url: Regex,
    verb: Regex,
    policies: Vec<Arc<Policy>>,
}

/// Index from `url:verb` patterns to policies.
///
/// Patterns are regular expressions matched against the whole path and the
/// whole verb. Construction compiles every pattern, so a malformed entry
/// fails at load time.
#[derive(Debug, Default)]
pub struct PolicyMatcher {
    routes: Vec<RouteKey>,
}

impl PolicyMatcher {
    /// Build the index from enforcement-side policy configs.
    pub fn build<'a, I>(configs: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a PolicyConfig>,
    {
        let mut matcher = Self::default();
        for config in configs {
            matcher.insert(&config.url, &config.verb, Arc::new(config.policy.clone()))?;
        }
        Ok(matcher)
    }

    /// Add `policy` under the `url:verb` key.
    pub fn insert(&mut self, url: &str, verb: &str, policy: Arc<Policy>) -> Result<()> {
        let key = format!("{}:{}", url, verb);

        if let Some(route) = self.routes.iter_mut().find(|r| r.key == key) {
            route.policies.push(policy);
            return Ok(());
        }

        self.routes.push(RouteKey {
            url: anchored(url)?,
            verb: anchored(verb)?,
            key,
            policies: vec![policy],
        });
        Ok(())
    }

    /// Policies governing `path` and `verb`, de-duplicated by identity.
    /// No ordering is guaranteed.
    pub fn matches(&self, path: &str, verb: &str) -> Vec<Arc<Policy>> {
        let mut seen = HashSet::new();
        self.routes
            .iter()
            .filter(|r| r.url.is_match(path) && r.verb.is_match(verb))
            .flat_map(|r| r.policies.iter())
            .filter(|p| seen.insert((p.service.clone(), p.name.clone())))
            .cloned()
            .collect()
    }

    /// Every distinct policy in the index.
    pub fn policies(&self) -> Vec<Arc<Policy>> {
        let mut seen = HashSet::new();
        self.routes
            .iter()
            .flat_map(|r| r.policies.iter())
            .filter(|p| seen.insert((p.service.clone(), p.name.clone())))
            .cloned()
            .collect()
    }

    /// Replace each indexed policy with the entry of the same identity in
    /// `resolved`, keeping the routing keys.
    pub fn resolve(&self, resolved: &[Policy]) -> Self {
        let routes = self
            .routes
            .iter()
            .map(|r| RouteKey {
                key: r.key.clone(),
                url: r.url.clone(),
                verb: r.verb.clone(),
                policies: r
                    .policies
                    .iter()
                    .map(|p| {
                        resolved
                            .iter()
                            .find(|s| s.identity() == p.identity())
                            .map(|s| Arc::new(s.clone()))
                            .unwrap_or_else(|| p.clone())
                    })
                    .collect(),
            })
            .collect();
        Self { routes }
    }

    /// Number of routing keys.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn anchored(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| Error::InvalidPattern(format!("'{}': {}", pattern, e)))
}
