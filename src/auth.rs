//! Verifies that an apikey may administer a trigger.

use crate::config::RouterConfig;
use crate::delivery::endpoint::{router_client, trigger_url};
use crate::domain::apikey_credentials;
use crate::error::Result;
use crate::store::TriggerError;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const TARGET: &str = "amqp_feed::auth";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("authorization request failed: {0}")]
    Transport(String),
    #[error("not authorized for trigger (status {status})")]
    Rejected { status: u16 },
}

impl From<AuthError> for TriggerError {
    fn from(err: AuthError) -> Self {
        let status = match &err {
            AuthError::Rejected { status } => *status,
            AuthError::Transport(_) => 401,
        };
        TriggerError::Unauthorized {
            status,
            message: err.to_string(),
        }
    }
}

#[async_trait]
pub trait TriggerAuth: Send + Sync + 'static {
    /// `deleting` tolerates a trigger that no longer exists upstream.
    async fn verify(
        &self,
        namespace: &str,
        name: &str,
        apikey: &str,
        deleting: bool,
    ) -> Result<(), AuthError>;
}

/// Reads the trigger from the router with the caller's apikey.
#[derive(Clone, Debug)]
pub struct HttpTriggerAuth {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTriggerAuth {
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
impl TriggerAuth for HttpTriggerAuth {
    async fn verify(
        &self,
        namespace: &str,
        name: &str,
        apikey: &str,
        deleting: bool,
    ) -> Result<(), AuthError> {
        let (user, password) = apikey_credentials(apikey);
        let response = self
            .client
            .get(trigger_url(&self.base_url, namespace, name))
            .basic_auth(user, Some(password))
            .send()
            .await
            .map_err(|err| AuthError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() || (deleting && status == StatusCode::NOT_FOUND) {
            return Ok(());
        }
        tracing::warn!(
            target: TARGET,
            event = "auth_rejected",
            namespace,
            name,
            user,
            status = status.as_u16()
        );
        Err(AuthError::Rejected {
            status: status.as_u16(),
        })
    }
}
