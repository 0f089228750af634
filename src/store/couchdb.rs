use crate::error::Result;
use crate::store::{DocumentStore, StoreError, TriggerDocument};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use url::Url;

const TARGET: &str = "amqp_feed::store";
const WORKER_VIEW: [&str; 4] = ["_design", "triggerViews", "_view", "triggers_by_worker"];

/// CouchDB database accessed over its HTTP API.
#[derive(Clone, Debug)]
pub struct CouchDocumentStore {
    client: reqwest::Client,
    base_url: Url,
    database: String,
    credentials: Option<(String, String)>,
}

#[derive(Deserialize)]
struct WriteResponse {
    rev: String,
}

#[derive(Deserialize)]
struct ViewResponse {
    #[serde(default)]
    rows: Vec<ViewRow>,
}

#[derive(Deserialize)]
struct ViewRow {
    key: Option<String>,
    value: u64,
}

impl CouchDocumentStore {
    /// `url` may carry `user:password@` credentials; they are sent as basic auth.
    pub fn new(url: &str, database: impl Into<String>) -> Result<Self> {
        Self::with_client(reqwest::Client::new(), url, database)
    }

    pub fn with_client(
        client: reqwest::Client,
        url: &str,
        database: impl Into<String>,
    ) -> Result<Self> {
        let mut base_url = Url::parse(url)?;
        let credentials = if base_url.username().is_empty() {
            None
        } else {
            Some((
                base_url.username().to_string(),
                base_url.password().unwrap_or_default().to_string(),
            ))
        };
        let _ = base_url.set_username("");
        let _ = base_url.set_password(None);
        Ok(Self {
            client,
            base_url,
            database: database.into(),
            credentials,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(&self.database).extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }
}

fn backend(err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

async fn unexpected(response: reqwest::Response) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    StoreError::Backend(format!("unexpected status {status}: {body}"))
}

#[async_trait]
impl DocumentStore for CouchDocumentStore {
    async fn get(&self, id: &str) -> Result<Option<TriggerDocument>, StoreError> {
        let response = self
            .request(Method::GET, self.url(&[id]))
            .send()
            .await
            .map_err(backend)?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<TriggerDocument>()
                .await
                .map(Some)
                .map_err(backend),
            _ => Err(unexpected(response).await),
        }
    }

    async fn insert(&self, document: &TriggerDocument) -> Result<String, StoreError> {
        let response = self
            .request(Method::PUT, self.url(&[document.id.as_str()]))
            .json(document)
            .send()
            .await
            .map_err(backend)?;
        match response.status() {
            StatusCode::CONFLICT => {
                tracing::debug!(target: TARGET, event = "write_conflict", rev = ?document.rev);
                Err(StoreError::Conflict {
                    id: document.id.clone(),
                })
            }
            status if status.is_success() => response
                .json::<WriteResponse>()
                .await
                .map(|written| written.rev)
                .map_err(backend),
            _ => Err(unexpected(response).await),
        }
    }

    async fn destroy(&self, id: &str, rev: &str) -> Result<(), StoreError> {
        let mut url = self.url(&[id]);
        url.query_pairs_mut().append_pair("rev", rev);
        let response = self
            .request(Method::DELETE, url)
            .send()
            .await
            .map_err(backend)?;
        match response.status() {
            StatusCode::CONFLICT => Err(StoreError::Conflict { id: id.to_string() }),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound { id: id.to_string() }),
            status if status.is_success() => Ok(()),
            _ => Err(unexpected(response).await),
        }
    }

    async fn triggers_by_worker(&self) -> Result<HashMap<String, u64>, StoreError> {
        let mut url = self.url(&WORKER_VIEW);
        url.query_pairs_mut()
            .append_pair("reduce", "true")
            .append_pair("group", "true");
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(backend)?;
        if !response.status().is_success() {
            return Err(unexpected(response).await);
        }
        let view: ViewResponse = response.json().await.map_err(backend)?;
        Ok(view
            .rows
            .into_iter()
            .filter_map(|row| row.key.map(|key| (key, row.value)))
            .collect())
    }
}
