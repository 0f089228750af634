//! Trigger administration guarded by apikey verification.

use crate::auth::TriggerAuth;
use crate::domain::{ConnectionOptions, QualifiedName, TriggerId};
use crate::store::{NewTrigger, TriggerDocument, TriggerError, TriggerStore, TriggerUpdate, TriggerView};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

const TARGET: &str = "amqp_feed::admin";

/// Body of a create call.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateTriggerRequest {
    pub trigger_name: String,
    pub auth_key: String,
    pub address: Option<String>,
    pub connection: Option<ConnectionOptions>,
    pub credit: Option<u32>,
    pub payload: Option<JsonValue>,
    pub max_triggers: Option<i64>,
    pub feed_tag: Option<String>,
}

pub struct TriggerAdmin {
    auth: Arc<dyn TriggerAuth>,
    store: Arc<TriggerStore>,
    workers: Vec<String>,
}

impl TriggerAdmin {
    pub fn new(auth: Arc<dyn TriggerAuth>, store: Arc<TriggerStore>, workers: Vec<String>) -> Self {
        Self {
            auth,
            store,
            workers,
        }
    }

    pub fn store(&self) -> &Arc<TriggerStore> {
        &self.store
    }

    pub async fn create_trigger(
        &self,
        request: CreateTriggerRequest,
    ) -> Result<TriggerDocument, TriggerError> {
        let qualified = self
            .authorize(&request.trigger_name, &request.auth_key, false)
            .await?;
        let document = self
            .store
            .create(
                NewTrigger {
                    apikey: request.auth_key,
                    namespace: qualified.namespace,
                    name: qualified.name,
                    feed_tag: request.feed_tag,
                    address: request.address,
                    connection: request.connection,
                    credit: request.credit,
                    payload: request.payload,
                    max_triggers: request.max_triggers,
                },
                &self.workers,
            )
            .await?;
        tracing::info!(
            target: TARGET,
            event = "create_trigger",
            trigger = %document.trigger_id()
        );
        Ok(document)
    }

    pub async fn get_trigger(
        &self,
        trigger_name: &str,
        auth_key: &str,
    ) -> Result<TriggerView, TriggerError> {
        let id = self.trigger_id(trigger_name, auth_key, false).await?;
        Ok(self.store.get(&id).await?.view())
    }

    pub async fn update_trigger(
        &self,
        trigger_name: &str,
        auth_key: &str,
        update: TriggerUpdate,
    ) -> Result<TriggerDocument, TriggerError> {
        let id = self.trigger_id(trigger_name, auth_key, false).await?;
        self.store.update(&id, update).await
    }

    pub async fn delete_trigger(&self, trigger_name: &str, auth_key: &str) -> Result<(), TriggerError> {
        let id = self.trigger_id(trigger_name, auth_key, true).await?;
        self.store.delete(&id).await?;
        tracing::info!(target: TARGET, event = "delete_trigger", trigger = %id);
        Ok(())
    }

    async fn trigger_id(
        &self,
        trigger_name: &str,
        auth_key: &str,
        deleting: bool,
    ) -> Result<TriggerId, TriggerError> {
        let qualified = self.authorize(trigger_name, auth_key, deleting).await?;
        Ok(TriggerId::new(auth_key, &qualified.namespace, &qualified.name))
    }

    async fn authorize(
        &self,
        trigger_name: &str,
        auth_key: &str,
        deleting: bool,
    ) -> Result<QualifiedName, TriggerError> {
        if auth_key.is_empty() {
            return Err(TriggerError::bad_request("no authKey parameter was provided"));
        }
        if trigger_name.is_empty() {
            return Err(TriggerError::bad_request("no trigger name parameter was provided"));
        }
        let qualified = QualifiedName::parse(trigger_name);
        self.auth
            .verify(&qualified.namespace, &qualified.name, auth_key, deleting)
            .await?;
        Ok(qualified)
    }
}
