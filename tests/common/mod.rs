#![allow(dead_code)]

pub mod mocks;

use amqp_feed::domain::{ConnectionOptions, TriggerConfig, TriggerId};
use amqp_feed::store::{
    MemoryDocumentStore, NewTrigger, ReasonKind, StatusReason, TriggerDocument, TriggerStatus,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const APIKEY: &str = "alice:s3cret";

pub fn trigger_config(name: &str, host: &str) -> TriggerConfig {
    TriggerConfig::new(
        APIKEY,
        "guest",
        name,
        format!("{name}-queue"),
        ConnectionOptions::for_host(host),
    )
}

pub fn shared_config(name: &str, host: &str) -> Arc<TriggerConfig> {
    Arc::new(trigger_config(name, host))
}

pub fn trigger_id(name: &str) -> TriggerId {
    TriggerId::new(APIKEY, "guest", name)
}

pub fn new_trigger(name: &str) -> NewTrigger {
    NewTrigger {
        apikey: APIKEY.to_string(),
        namespace: "guest".to_string(),
        name: name.to_string(),
        address: Some(format!("{name}-queue")),
        connection: Some(ConnectionOptions::for_host("broker")),
        ..NewTrigger::default()
    }
}

/// A stored document for `name`, active and assigned to `worker`.
pub fn stored_document(name: &str, worker: &str) -> TriggerDocument {
    TriggerDocument {
        id: trigger_id(name).as_str().to_string(),
        rev: None,
        apikey: APIKEY.to_string(),
        name: name.to_string(),
        namespace: "guest".to_string(),
        feed_tag: None,
        payload: json!({}),
        address: format!("{name}-queue"),
        connection: ConnectionOptions::for_host("broker"),
        credit: 10,
        max_triggers: -1,
        worker: Some(worker.to_string()),
        status: TriggerStatus::active_now(),
    }
}

pub fn admin_locked(mut document: TriggerDocument) -> TriggerDocument {
    document.status = TriggerStatus {
        active: false,
        date_changed: 1_500_000_000_000,
        reason: Some(StatusReason {
            kind: ReasonKind::Admin,
            status_code: None,
            message: "disabled by operator".to_string(),
        }),
    };
    document
}

pub async fn seeded_store(documents: Vec<TriggerDocument>) -> Arc<MemoryDocumentStore> {
    use amqp_feed::store::DocumentStore;

    let store = Arc::new(MemoryDocumentStore::new());
    for document in documents {
        store.insert(&document).await.expect("seed document");
    }
    store
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_for_condition<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
