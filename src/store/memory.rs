use crate::store::{DocumentStore, StoreError, TriggerDocument};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-process document store with CouchDB-style revisions.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<String, TriggerDocument>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

fn next_revision(current: Option<&str>) -> String {
    let generation = current
        .and_then(|rev| rev.split_once('-'))
        .and_then(|(generation, _)| generation.parse::<u64>().ok())
        .unwrap_or(0);
    format!("{}-{}", generation + 1, Uuid::new_v4().simple())
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, id: &str) -> Result<Option<TriggerDocument>, StoreError> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn insert(&self, document: &TriggerDocument) -> Result<String, StoreError> {
        let mut documents = self.documents.write().await;
        let stored_rev = documents.get(&document.id).and_then(|stored| stored.rev.clone());
        let exists = documents.contains_key(&document.id);

        if exists != document.rev.is_some() || stored_rev != document.rev {
            return Err(StoreError::Conflict {
                id: document.id.clone(),
            });
        }

        let rev = next_revision(stored_rev.as_deref());
        let mut stored = document.clone();
        stored.rev = Some(rev.clone());
        documents.insert(stored.id.clone(), stored);
        Ok(rev)
    }

    async fn destroy(&self, id: &str, rev: &str) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        let Some(stored) = documents.get(id) else {
            return Err(StoreError::NotFound { id: id.to_string() });
        };
        if stored.rev.as_deref() != Some(rev) {
            return Err(StoreError::Conflict { id: id.to_string() });
        }
        documents.remove(id);
        Ok(())
    }

    async fn triggers_by_worker(&self) -> Result<HashMap<String, u64>, StoreError> {
        let documents = self.documents.read().await;
        let mut counts = HashMap::new();
        for worker in documents.values().filter_map(|doc| doc.worker.as_ref()) {
            *counts.entry(worker.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
