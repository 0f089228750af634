//! Trigger metadata persistence with optimistic concurrency.

use crate::retry::Retryable;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub mod couchdb;
pub mod document;
pub mod memory;
pub mod trigger_store;

pub use couchdb::CouchDocumentStore;
pub use document::{ReasonKind, StatusReason, TriggerDocument, TriggerStatus, TriggerView};
pub use memory::MemoryDocumentStore;
pub use trigger_store::{DisableOutcome, NewTrigger, TriggerStore, TriggerUpdate};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("document `{id}` not found")]
    NotFound { id: String },
    #[error("document `{id}` update conflict")]
    Conflict { id: String },
    #[error("document store request failed: {0}")]
    Backend(String),
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Document database holding one [`TriggerDocument`] per trigger id.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn get(&self, id: &str) -> Result<Option<TriggerDocument>, StoreError>;

    /// Writes `document`. A `None` revision creates it; otherwise the revision must be the
    /// stored one. Returns the new revision, or `Conflict` when the revision is stale or
    /// the document already exists.
    async fn insert(&self, document: &TriggerDocument) -> Result<String, StoreError>;

    async fn destroy(&self, id: &str, rev: &str) -> Result<(), StoreError>;

    /// Number of triggers assigned to each worker.
    async fn triggers_by_worker(&self) -> Result<HashMap<String, u64>, StoreError>;
}

/// Errors surfaced to trigger administration callers.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{message}")]
    Unauthorized { status: u16, message: String },
    #[error("could not find trigger {name} in the database")]
    NotFound { name: String },
    #[error("trigger {name} already exists")]
    AlreadyExists { name: String },
    #[error("{context}: gave up after {attempts} conflicting writes")]
    Unavailable { context: String, attempts: u32 },
    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },
}

impl TriggerError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        TriggerError::BadRequest(message.into())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            TriggerError::BadRequest(_) => 400,
            TriggerError::Unauthorized { status, .. } => *status,
            TriggerError::NotFound { .. } => 404,
            TriggerError::AlreadyExists { .. } => 409,
            TriggerError::Unavailable { .. } => 503,
            TriggerError::Store { .. } => 500,
        }
    }
}
