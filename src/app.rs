use crate::admin::TriggerAdmin;
use crate::auth::{HttpTriggerAuth, TriggerAuth};
use crate::config::{FeedConfig, StoreBackend, StoreConfig};
use crate::delivery::{DeliveryPipeline, HttpTriggerEndpoint, TriggerEndpoint};
use crate::domain::TriggerId;
use crate::error::{Context, Result};
use crate::feed::{Feed, FeedHandle, FeedStats, TriggerCallback};
use crate::store::{
    CouchDocumentStore, DisableOutcome, DocumentStore, MemoryDocumentStore, ReasonKind,
    TriggerDocument, TriggerStore,
};
use crate::transport::AmqpTransport;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TARGET: &str = "amqp_feed::app";

/// Wires configuration into the trigger store, delivery pipeline and feed reactor.
pub struct FeedProvider {
    config: FeedConfig,
    store: Arc<TriggerStore>,
    pipeline: Arc<DeliveryPipeline>,
    admin: TriggerAdmin,
    feed: FeedHandle,
    reactor: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl FeedProvider {
    pub async fn initialise(config: FeedConfig) -> Result<Self> {
        let documents = document_store(&config.store)?;
        let timeout = config.delivery.request_timeout;
        let endpoint = HttpTriggerEndpoint::new(&config.router, timeout)
            .context("failed to build trigger endpoint")?;
        let auth = HttpTriggerAuth::new(&config.router, timeout)
            .context("failed to build trigger authorization client")?;

        let shutdown = CancellationToken::new();
        let transport = default_transport(&shutdown)?;
        Ok(Self::assemble(
            config,
            transport,
            documents,
            Arc::new(endpoint),
            Arc::new(auth),
            shutdown,
        ))
    }

    /// Builds a provider around caller-supplied seams. Must run inside a tokio runtime.
    pub fn with_parts<T>(
        config: FeedConfig,
        transport: T,
        documents: Arc<dyn DocumentStore>,
        endpoint: Arc<dyn TriggerEndpoint>,
        auth: Arc<dyn TriggerAuth>,
    ) -> Self
    where
        T: AmqpTransport,
    {
        Self::assemble(
            config,
            transport,
            documents,
            endpoint,
            auth,
            CancellationToken::new(),
        )
    }

    fn assemble<T>(
        config: FeedConfig,
        transport: T,
        documents: Arc<dyn DocumentStore>,
        endpoint: Arc<dyn TriggerEndpoint>,
        auth: Arc<dyn TriggerAuth>,
        shutdown: CancellationToken,
    ) -> Self
    where
        T: AmqpTransport,
    {
        let store = Arc::new(
            TriggerStore::new(documents, config.store.retry_policy())
                .with_default_credit(config.feed.default_credit),
        );
        let pipeline = Arc::new(DeliveryPipeline::new(
            endpoint,
            config.delivery.retry_policy(),
        ));
        let admin = TriggerAdmin::new(auth, Arc::clone(&store), config.workers.clone());

        let (feed, handle) = Feed::with_shutdown(transport, store.clone(), shutdown.clone());
        let reactor = feed.spawn();
        tracing::info!(
            target: TARGET,
            event = "provider_started",
            store = ?config.store.backend,
            workers = config.workers.len()
        );

        Self {
            config,
            store,
            pipeline,
            admin,
            feed: handle,
            reactor,
            shutdown,
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn admin(&self) -> &TriggerAdmin {
        &self.admin
    }

    pub fn store(&self) -> &Arc<TriggerStore> {
        &self.store
    }

    pub fn feed(&self) -> &FeedHandle {
        &self.feed
    }

    /// Opens a receiver for a stored trigger, firing it through the delivery pipeline.
    pub async fn create_receiver(&self, document: &TriggerDocument) -> Result<()> {
        let callback: Arc<dyn TriggerCallback> = self.pipeline.clone();
        self.feed
            .create_receiver(
                document.trigger_id(),
                Arc::new(document.to_trigger_config()),
                callback,
            )
            .await
            .with_context(|| format!("failed to open receiver for {}", document.qualified_name()))
    }

    pub async fn delete_receiver(&self, trigger: &TriggerId) -> Result<bool> {
        Ok(self.feed.delete_receiver(trigger.clone()).await?)
    }

    /// Automatic disable; an admin lock is left in place.
    pub async fn disable_trigger(&self, trigger: &TriggerId, message: &str) -> Result<DisableOutcome> {
        Ok(self.store.disable(trigger, ReasonKind::Auto, message).await?)
    }

    pub async fn stats(&self) -> Result<FeedStats> {
        Ok(self.feed.stats().await?)
    }

    /// Stops the reactor, closing every receiver and connection.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        self.reactor.await?;
        tracing::info!(target: TARGET, event = "provider_stopped");
        Ok(())
    }
}

fn document_store(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryDocumentStore::new())),
        StoreBackend::Couchdb => {
            let Some(url) = config.url.as_deref() else {
                crate::bail_err!("store.url is required for the couchdb backend");
            };
            let store = CouchDocumentStore::new(url, config.database.clone())
                .context("invalid store.url")?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(feature = "rabbitmq")]
fn default_transport(shutdown: &CancellationToken) -> Result<Box<dyn AmqpTransport>> {
    Ok(Box::new(crate::transport::rabbitmq::LapinTransport::new(
        shutdown.clone(),
    )))
}

#[cfg(not(feature = "rabbitmq"))]
fn default_transport(_shutdown: &CancellationToken) -> Result<Box<dyn AmqpTransport>> {
    crate::bail_err!("no AMQP transport compiled in; enable the `rabbitmq` feature")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn couchdb_backend_needs_a_url() {
        let config = StoreConfig {
            backend: StoreBackend::Couchdb,
            url: None,
            ..StoreConfig::default()
        };
        let err = document_store(&config).err().unwrap();
        assert!(err.to_string().contains("store.url"));
    }

    #[test]
    fn memory_backend_is_default() {
        assert!(document_store(&StoreConfig::default()).is_ok());
    }
}
