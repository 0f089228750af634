use crate::config::RouterConfig;
use crate::domain::TriggerConfig;
use crate::error::Result;
use crate::retry::Retryable;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

const TARGET: &str = "amqp_feed::endpoint";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FireError {
    #[error("trigger endpoint request failed: {0}")]
    Transport(String),
    #[error("trigger endpoint responded with status {status}")]
    Status { status: u16 },
}

impl FireError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FireError::Status { status } => Some(*status),
            FireError::Transport(_) => None,
        }
    }

    /// 4xx answers other than 408 and 429 mean the trigger itself is unusable.
    pub fn should_disable(&self) -> bool {
        matches!(
            self.status(),
            Some(status) if (400..500).contains(&status) && status != 408 && status != 429
        )
    }
}

impl Retryable for FireError {
    fn is_retryable(&self) -> bool {
        !self.should_disable()
    }
}

/// Trigger-invocation API.
#[async_trait]
pub trait TriggerEndpoint: Send + Sync + 'static {
    async fn fire(&self, trigger: &TriggerConfig, body: &JsonValue) -> Result<(), FireError>;
}

/// `{base}/api/v1/namespaces/{namespace}/triggers/{name}` with each segment escaped.
pub fn trigger_url(base: &Url, namespace: &str, name: &str) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .extend(["api", "v1", "namespaces", namespace, "triggers", name]);
    }
    url
}

pub fn router_client(router: &RouterConfig, timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .danger_accept_invalid_certs(router.accept_invalid_certs)
        .timeout(timeout)
        .build()?)
}

/// Fires triggers with a basic-auth `POST` against the router.
#[derive(Clone, Debug)]
pub struct HttpTriggerEndpoint {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTriggerEndpoint {
    pub fn new(router: &RouterConfig, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(&router.base_url())?;
        Ok(Self {
            client: router_client(router, timeout)?,
            base_url,
        })
    }

    pub fn with_client(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl TriggerEndpoint for HttpTriggerEndpoint {
    async fn fire(&self, trigger: &TriggerConfig, body: &JsonValue) -> Result<(), FireError> {
        let url = trigger_url(&self.base_url, &trigger.namespace, &trigger.name);
        let (user, password) = trigger.credentials();
        let started = Instant::now();

        let response = self
            .client
            .post(url)
            .basic_auth(user, Some(password))
            .json(body)
            .send()
            .await
            .map_err(|err| FireError::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        tracing::debug!(
            target: TARGET,
            event = "trigger_post",
            trigger = %trigger.id(),
            status,
            duration_ms = started.elapsed().as_millis() as u64
        );
        if response.status().is_client_error() || response.status().is_server_error() {
            return Err(FireError::Status { status });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        let status = |status| FireError::Status { status };
        assert!(status(410).should_disable());
        assert!(status(404).should_disable());
        assert!(!status(408).should_disable());
        assert!(!status(429).should_disable());
        assert!(!status(503).should_disable());
        assert!(!FireError::Transport("reset".to_string()).should_disable());
        assert!(status(502).is_retryable());
    }

    #[test]
    fn escapes_trigger_path_segments() {
        let base = Url::parse("https://router.local:443").unwrap();
        assert_eq!(
            trigger_url(&base, "guest", "orders feed").as_str(),
            "https://router.local/api/v1/namespaces/guest/triggers/orders%20feed"
        );
    }
}
