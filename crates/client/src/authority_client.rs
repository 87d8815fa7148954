//! HTTP client for the authority API.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

use warden_core::{
    config::EnforcementConfig,
    types::{Infraction, Policy, PolicyId, Subscription},
    Authority, Error, Registration, Result, Suspension,
};

/// Error body sent by the authority.
#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    suspension: Option<Suspension>,
}

#[derive(Debug, Serialize)]
struct MetricBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
}

#[derive(Debug, Serialize)]
struct RegisterBody<'a> {
    policies: &'a [Policy],
    hostname: &'a str,
    port: u16,
}

/// [`Authority`] implementation calling a remote authority over HTTP.
#[derive(Clone)]
pub struct HttpAuthorityClient {
    client: reqwest::Client,
    base: Url,
    username: Option<String>,
    password: Option<Secret<String>>,
}

impl HttpAuthorityClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::config(format!("invalid authority url {}: {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(Error::config(format!("authority url {} cannot be a base", base_url)));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base,
            username: None,
            password: None,
        })
    }

    /// Client for `authority_url`, with credentials when a username is set.
    pub fn from_config(config: &EnforcementConfig) -> Result<Self> {
        let client = Self::new(&config.authority_url)?;
        Ok(match &config.username {
            Some(username) => client.with_credentials(username.clone(), config.password.clone()),
            None => client,
        })
    }

    /// Send HTTP basic credentials with every call.
    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<Secret<String>>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::config(format!("authority url {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        let builder = self.client.request(method, self.endpoint(segments)?);
        Ok(match &self.username {
            Some(user) => builder.basic_auth(
                user,
                self.password.as_ref().map(|p| p.expose_secret().to_string()),
            ),
            None => builder,
        })
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    Error::transport(format!("authority unreachable: {}", e))
                } else if e.is_timeout() {
                    Error::timeout(format!("authority request timed out: {}", e))
                } else {
                    Error::authority(format!("request failed: {}", e))
                }
            })?;

        if response.status().is_success() {
            return Ok(response);
        }
        Err(error_from(response).await)
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        self.send(builder)
            .await?
            .json::<T>()
            .await
            .map_err(|e| Error::authority(format!("invalid response body: {}", e)))
    }

    async fn post_metric(&self, policy: &Policy, user_name: &str, body: MetricBody) -> Result<()> {
        let id = policy
            .id
            .ok_or_else(|| Error::invalid_request(format!("policy {} is not registered", policy.name)))?
            .to_string();
        let builder = self
            .request(Method::POST, &["v1", "policies", id.as_str(), "users", user_name, "metric"])?
            .json(&body);
        self.send(builder).await.map(|_| ())
    }
}

/// Map a non-success response back onto [`Error`].
async fn error_from(response: Response) -> Error {
    let status = response.status();
    let wire = response.json::<WireError>().await.ok();

    if let Some(suspension) = wire.as_ref().and_then(|w| w.suspension.clone()) {
        return Error::suspended(suspension);
    }

    let message = wire
        .map(|w| format!("{} {}", w.code, w.message))
        .unwrap_or_else(|| status.to_string());

    match status {
        StatusCode::NOT_FOUND => Error::not_found(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Error::invalid_request(message),
        _ => Error::authority(format!("authority returned {}: {}", status, message)),
    }
}

#[async_trait]
impl Authority for HttpAuthorityClient {
    async fn get_policy(&self, id: PolicyId) -> Result<Option<Policy>> {
        let builder = self.request(Method::GET, &["v1", "policies", id.to_string().as_str()])?;
        match self.json(builder).await {
            Ok(policy) => Ok(Some(policy)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_infractions(&self, policy_id: PolicyId, user_name: &str) -> Result<Vec<Infraction>> {
        let id = policy_id.to_string();
        let builder = self.request(Method::GET, &["v1", "policies", id.as_str(), "infractions", user_name])?;
        self.json(builder).await
    }

    async fn get_suspensions(&self, policy_id: PolicyId) -> Result<Vec<Infraction>> {
        let id = policy_id.to_string();
        let builder = self.request(Method::GET, &["v1", "policies", id.as_str(), "suspensions"])?;
        self.json(builder).await
    }

    async fn modify_metric(&self, policy: &Policy, user_name: &str, delta: f64) -> Result<()> {
        self.post_metric(policy, user_name, MetricBody { delta: Some(delta), value: None })
            .await
    }

    async fn update_metric(&self, policy: &Policy, user_name: &str, value: f64) -> Result<()> {
        self.post_metric(policy, user_name, MetricBody { delta: None, value: Some(value) })
            .await
    }

    async fn register(&self, policies: Vec<Policy>, callback: Subscription) -> Result<Registration> {
        let body = RegisterBody {
            policies: &policies,
            hostname: &callback.hostname,
            port: callback.port,
        };
        let builder = self.request(Method::POST, &["v1", "register"])?.json(&body);
        self.json(builder).await
    }

    async fn unregister(&self, subscription: &Subscription) -> Result<()> {
        let Some(id) = subscription.id else {
            return Ok(());
        };
        let builder = self.request(Method::DELETE, &["v1", "subscriptions", id.to_string().as_str()])?;
        self.send(builder).await.map(|_| ())
    }
}
