use crate::delivery::endpoint::{FireError, TriggerEndpoint};
use crate::delivery::payload::fire_body;
use crate::delivery::DeliveryError;
use crate::domain::{TriggerConfig, TriggerId};
use crate::feed::{FeedPayload, TriggerCallback};
use crate::feed_event;
use crate::retry::{RetryError, RetryPolicy};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;

const TARGET: &str = "amqp_feed::delivery";

/// Fires a trigger once per inbound message, retrying transient endpoint failures.
pub struct DeliveryPipeline {
    endpoint: Arc<dyn TriggerEndpoint>,
    retry: RetryPolicy,
}

impl DeliveryPipeline {
    pub fn new(endpoint: Arc<dyn TriggerEndpoint>, retry: RetryPolicy) -> Self {
        Self { endpoint, retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Resolves with the trigger id once the endpoint accepted the fire.
    ///
    /// One fire is taken from the trigger's budget before the first attempt and handed
    /// back if the delivery ultimately fails; retries never touch the budget.
    pub async fn deliver(
        &self,
        trigger: &TriggerConfig,
        payload: &FeedPayload,
    ) -> Result<TriggerId, DeliveryError> {
        let id = trigger.id();
        if !trigger.budget.try_acquire() {
            feed_event!(warn, TARGET, "fire_budget_exhausted", trigger = id);
            return Err(DeliveryError::BudgetExhausted {
                trigger: id.to_string(),
            });
        }

        let body = fire_body(payload);
        let result = self
            .retry
            .run(|attempt| self.fire_once(trigger, &id, &body, attempt))
            .await;

        match result {
            Ok(()) => {
                feed_event!(info, TARGET, "trigger_fired", trigger = id);
                Ok(id)
            }
            Err(err) => {
                trigger.budget.release();
                let attempts = err.attempts();
                Err(match err {
                    RetryError::Aborted { error, .. } => DeliveryError::Disabled {
                        trigger: id.to_string(),
                        status: error.status().unwrap_or_default(),
                    },
                    RetryError::Exhausted { last, .. } => DeliveryError::Exhausted {
                        trigger: id.to_string(),
                        attempts,
                        reason: last.to_string(),
                    },
                })
            }
        }
    }

    async fn fire_once(
        &self,
        trigger: &TriggerConfig,
        id: &TriggerId,
        body: &JsonValue,
        attempt: u32,
    ) -> Result<(), FireError> {
        let result = self.endpoint.fire(trigger, body).await;
        if let Err(err) = &result {
            let retrying = !err.should_disable() && attempt < self.retry.max_attempts();
            feed_event!(
                warn,
                TARGET,
                "trigger_fire_failed",
                trigger = id,
                attempt = attempt,
                error = err,
                retrying = retrying
            );
        }
        result
    }
}

#[async_trait]
impl TriggerCallback for DeliveryPipeline {
    async fn on_message(
        &self,
        trigger: Arc<TriggerConfig>,
        payload: FeedPayload,
    ) -> Result<TriggerId, DeliveryError> {
        self.deliver(&trigger, &payload).await
    }
}
