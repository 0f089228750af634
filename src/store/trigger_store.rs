use crate::config::DEFAULT_WORKER;
use crate::domain::{ConnectionOptions, TriggerId};
use crate::feed::TriggerDisabler;
use crate::feed_event;
use crate::retry::{RetryError, RetryPolicy};
use crate::store::{
    DocumentStore, ReasonKind, StoreError, TriggerDocument, TriggerError, TriggerStatus,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

const TARGET: &str = "amqp_feed::store";
const DEFAULT_CREDIT: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisableOutcome {
    Disabled,
    AlreadyInactive,
    AdminLocked,
}

/// Parameters of a trigger creation.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct NewTrigger {
    pub apikey: String,
    pub namespace: String,
    pub name: String,
    pub feed_tag: Option<String>,
    pub address: Option<String>,
    pub connection: Option<ConnectionOptions>,
    pub credit: Option<u32>,
    pub payload: Option<JsonValue>,
    #[serde(rename = "maxTriggers")]
    pub max_triggers: Option<i64>,
}

/// Fields supplied on update. Only `credit` may change; address and connection are
/// accepted here so their presence can be refused.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TriggerUpdate {
    pub address: Option<String>,
    pub connection: Option<ConnectionOptions>,
    pub credit: Option<u32>,
}

/// CRUD over trigger documents. Every write goes through the retry policy and is
/// retried from a fresh read when the store reports a revision conflict.
pub struct TriggerStore {
    documents: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    default_credit: u32,
}

impl TriggerStore {
    pub fn new(documents: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self {
            documents,
            retry,
            default_credit: DEFAULT_CREDIT,
        }
    }

    pub fn with_default_credit(mut self, credit: u32) -> Self {
        self.default_credit = credit;
        self
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    /// Picks the worker with the fewest triggers. A single candidate is returned without
    /// querying the store; ties go to the earlier worker.
    pub async fn assign_worker(&self, workers: &[String]) -> Result<String, TriggerError> {
        let Some((first, rest)) = workers.split_first() else {
            return Ok(DEFAULT_WORKER.to_string());
        };
        if rest.is_empty() {
            return Ok(first.clone());
        }

        let loads = self
            .documents
            .triggers_by_worker()
            .await
            .map_err(|source| TriggerError::Store {
                context: "could not query trigger counts per worker".to_string(),
                source,
            })?;
        let load = |worker: &String| loads.get(worker).copied().unwrap_or(0);

        let mut best = first;
        let mut best_load = load(first);
        for worker in rest {
            let worker_load = load(worker);
            if worker_load < best_load {
                best = worker;
                best_load = worker_load;
            }
        }
        Ok(best.clone())
    }

    pub async fn create(
        &self,
        request: NewTrigger,
        workers: &[String],
    ) -> Result<TriggerDocument, TriggerError> {
        let address = request
            .address
            .filter(|address| !address.is_empty())
            .ok_or_else(|| TriggerError::bad_request("AMQP address parameter missing"))?;
        let connection = request
            .connection
            .ok_or_else(|| TriggerError::bad_request("AMQP connection parameter missing"))?;

        let worker = self.assign_worker(workers).await?;
        // The feed tag only separates live receivers; the stored id stays untagged.
        let id = TriggerId::new(&request.apikey, &request.namespace, &request.name);

        let mut document = TriggerDocument {
            id: id.as_str().to_string(),
            rev: None,
            apikey: request.apikey,
            name: request.name,
            namespace: request.namespace,
            feed_tag: request.feed_tag,
            payload: request.payload.unwrap_or_else(|| json!({})),
            address,
            connection,
            credit: request.credit.unwrap_or(self.default_credit),
            max_triggers: request.max_triggers.unwrap_or(-1),
            worker: Some(worker),
            status: TriggerStatus::active_now(),
        };

        match self.documents.insert(&document).await {
            Ok(rev) => {
                document.rev = Some(rev);
                feed_event!(
                    info,
                    TARGET,
                    "trigger_created",
                    trigger = id,
                    worker = document.worker.as_deref().unwrap_or_default()
                );
                Ok(document)
            }
            Err(StoreError::Conflict { .. }) => Err(TriggerError::AlreadyExists {
                name: document.qualified_name(),
            }),
            Err(source) => Err(TriggerError::Store {
                context: "error creating AMQP trigger".to_string(),
                source,
            }),
        }
    }

    /// Reads a trigger, falling back to its default-namespace id.
    pub async fn get(&self, id: &TriggerId) -> Result<TriggerDocument, TriggerError> {
        let read = |source: StoreError| TriggerError::Store {
            context: "could not read the trigger from the database".to_string(),
            source,
        };

        if let Some(document) = self.documents.get(id.as_str()).await.map_err(read)? {
            return Ok(document);
        }
        if let Some(fallback) = id.default_namespace_variant() {
            if let Some(document) = self.documents.get(fallback.as_str()).await.map_err(read)? {
                return Ok(document);
            }
        }
        Err(TriggerError::NotFound {
            name: id.to_string(),
        })
    }

    pub async fn disable(
        &self,
        id: &TriggerId,
        kind: ReasonKind,
        message: &str,
    ) -> Result<DisableOutcome, TriggerError> {
        let document = self.get(id).await?;
        self.disable_document(&document, kind, message, false).await
    }

    /// Marks `document` inactive. Already inactive documents are left untouched, and
    /// automatic disables never override an admin lock unless `force` is set.
    pub async fn disable_document(
        &self,
        document: &TriggerDocument,
        kind: ReasonKind,
        message: &str,
        force: bool,
    ) -> Result<DisableOutcome, TriggerError> {
        let trigger = document.trigger_id();
        if let Some(outcome) = disable_precheck(document, kind, force) {
            feed_event!(
                info,
                TARGET,
                "trigger_disable_skipped",
                trigger = trigger,
                outcome = format!("{outcome:?}")
            );
            return Ok(outcome);
        }

        let status = TriggerStatus::disabled_now(kind, message);
        let result = self
            .retry
            .run(|attempt| {
                let status = status.clone();
                async move {
                    let mut candidate = if attempt == 1 {
                        document.clone()
                    } else {
                        let latest = self.documents.get(&document.id).await?;
                        let latest = latest.ok_or_else(|| StoreError::NotFound {
                            id: document.id.clone(),
                        })?;
                        if let Some(outcome) = disable_precheck(&latest, kind, force) {
                            return Ok(outcome);
                        }
                        latest
                    };
                    candidate.status = status;
                    self.documents.insert(&candidate).await?;
                    Ok::<_, StoreError>(DisableOutcome::Disabled)
                }
            })
            .await;

        match result {
            Ok(outcome) => {
                feed_event!(
                    info,
                    TARGET,
                    "trigger_disabled",
                    trigger = trigger,
                    kind = format!("{kind:?}"),
                    reason = message
                );
                Ok(outcome)
            }
            Err(err) => Err(write_failure(
                "there was an error while disabling the trigger in the database",
                &document.qualified_name(),
                err,
            )),
        }
    }

    /// Changes updatable fields through a disable, re-read, re-enable sequence.
    pub async fn update(
        &self,
        id: &TriggerId,
        update: TriggerUpdate,
    ) -> Result<TriggerDocument, TriggerError> {
        let document = self.get(id).await?;
        let name = document.qualified_name();

        if document.is_admin_locked() {
            return Err(TriggerError::bad_request(format!(
                "{name} cannot be updated because it was disabled by an admin.  \
                 Please contact support for further assistance"
            )));
        }
        if update.address.is_some() {
            return Err(TriggerError::bad_request(
                "AMQP address cannot be changed on update.",
            ));
        }
        if update.connection.is_some() {
            return Err(TriggerError::bad_request(
                "AMQP connection parameters cannot be changed on update.",
            ));
        }
        let Some(credit) = update.credit else {
            return Err(TriggerError::bad_request(
                "no updatable parameters were specified",
            ));
        };

        self.disable_document(
            &document,
            ReasonKind::Auto,
            "Automatically disabled trigger while updating",
            false,
        )
        .await?;

        let doc_id = document.id.as_str();
        let updated = self
            .retry
            .run(|_| async move {
                let latest = self.documents.get(doc_id).await?;
                let mut latest = latest.ok_or_else(|| StoreError::NotFound {
                    id: doc_id.to_string(),
                })?;
                latest.credit = credit;
                latest.status = TriggerStatus::active_now();
                let rev = self.documents.insert(&latest).await?;
                latest.rev = Some(rev);
                Ok::<_, StoreError>(latest)
            })
            .await
            .map_err(|err| {
                write_failure(
                    "there was an error while updating the trigger in the database",
                    &name,
                    err,
                )
            })?;

        feed_event!(
            info,
            TARGET,
            "trigger_updated",
            trigger = updated.trigger_id(),
            credit = credit
        );
        Ok(updated)
    }

    /// Force-disables and then removes the trigger document.
    pub async fn delete(&self, id: &TriggerId) -> Result<(), TriggerError> {
        let document = self.get(id).await?;
        let name = document.qualified_name();

        self.disable_document(
            &document,
            ReasonKind::Auto,
            "Automatically disabled trigger while deleting",
            true,
        )
        .await?;

        let doc_id = document.id.as_str();
        self.retry
            .run(|_| async move {
                let latest = self.documents.get(doc_id).await?;
                let latest = latest.ok_or_else(|| StoreError::NotFound {
                    id: doc_id.to_string(),
                })?;
                let rev = latest.rev.unwrap_or_default();
                self.documents.destroy(doc_id, &rev).await?;
                Ok::<_, StoreError>(())
            })
            .await
            .map_err(|err| {
                write_failure(
                    "there was an error while deleting the trigger from the database",
                    &name,
                    err,
                )
            })?;

        feed_event!(info, TARGET, "trigger_deleted", trigger = document.trigger_id());
        Ok(())
    }
}

#[async_trait]
impl TriggerDisabler for TriggerStore {
    async fn disable_trigger(&self, trigger: &TriggerId, message: &str) -> crate::error::Result<()> {
        self.disable(trigger, ReasonKind::Auto, message).await?;
        Ok(())
    }
}

fn disable_precheck(
    document: &TriggerDocument,
    kind: ReasonKind,
    force: bool,
) -> Option<DisableOutcome> {
    if !force && kind == ReasonKind::Auto && document.is_admin_locked() {
        return Some(DisableOutcome::AdminLocked);
    }
    if !document.is_active() {
        return Some(DisableOutcome::AlreadyInactive);
    }
    None
}

fn write_failure(context: &str, name: &str, err: RetryError<StoreError>) -> TriggerError {
    match err {
        RetryError::Exhausted { attempts, .. } => TriggerError::Unavailable {
            context: context.to_string(),
            attempts,
        },
        RetryError::Aborted {
            error: StoreError::NotFound { .. },
            ..
        } => TriggerError::NotFound {
            name: name.to_string(),
        },
        RetryError::Aborted { error, .. } => TriggerError::Store {
            context: context.to_string(),
            source: error,
        },
    }
}
