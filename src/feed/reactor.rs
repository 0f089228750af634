use crate::domain::{TriggerConfig, TriggerId};
use crate::feed::registry::ReceiverRegistry;
use crate::feed::{FeedError, FeedEvent, FeedStats, TriggerCallback, TriggerDisabler};
use crate::transport::{AmqpTransport, EventSender};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TARGET: &str = "amqp_feed::feed";

/// Single-task reactor owning the receiver registry and connection pool.
pub struct Feed {
    registry: ReceiverRegistry,
    events: mpsc::UnboundedReceiver<FeedEvent>,
    shutdown: CancellationToken,
}

/// Cloneable front door to a running [`Feed`].
#[derive(Clone, Debug)]
pub struct FeedHandle {
    sender: mpsc::UnboundedSender<FeedEvent>,
    shutdown: CancellationToken,
}

impl Feed {
    pub fn new<T>(transport: T, disabler: Arc<dyn TriggerDisabler>) -> (Self, FeedHandle)
    where
        T: AmqpTransport,
    {
        Self::with_shutdown(transport, disabler, CancellationToken::new())
    }

    pub fn with_shutdown<T>(
        transport: T,
        disabler: Arc<dyn TriggerDisabler>,
        shutdown: CancellationToken,
    ) -> (Self, FeedHandle)
    where
        T: AmqpTransport,
    {
        let (sender, events) = mpsc::unbounded_channel();
        let registry = ReceiverRegistry::new(
            Box::new(transport),
            EventSender::new(sender.clone()),
            disabler,
        );
        let feed = Self {
            registry,
            events,
            shutdown: shutdown.clone(),
        };
        (feed, FeedHandle { sender, shutdown })
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        tracing::info!(target: TARGET, event = "feed_started");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => self.registry.handle(event),
                    None => break,
                },
            }
        }
        let stats = self.registry.stats();
        self.registry.shutdown();
        tracing::info!(
            target: TARGET,
            event = "feed_stopped",
            triggers = stats.triggers,
            connections = stats.connections
        );
    }
}

impl FeedHandle {
    /// Registers (or replaces) a trigger's receiver and waits for the link to open.
    pub async fn create_receiver(
        &self,
        trigger: TriggerId,
        config: Arc<TriggerConfig>,
        callback: Arc<dyn TriggerCallback>,
    ) -> Result<(), FeedError> {
        let (reply, opened) = oneshot::channel();
        self.sender
            .send(FeedEvent::CreateReceiver {
                trigger,
                config,
                callback,
                reply,
            })
            .map_err(|_| FeedError::Stopped)?;
        opened.await.map_err(|_| FeedError::Stopped)?
    }

    /// Removes a trigger's receiver. Returns false when the trigger was not registered.
    pub async fn delete_receiver(&self, trigger: TriggerId) -> Result<bool, FeedError> {
        let (reply, deleted) = oneshot::channel();
        self.sender
            .send(FeedEvent::DeleteReceiver {
                trigger,
                reply: Some(reply),
            })
            .map_err(|_| FeedError::Stopped)?;
        deleted.await.map_err(|_| FeedError::Stopped)
    }

    pub async fn stats(&self) -> Result<FeedStats, FeedError> {
        let (reply, stats) = oneshot::channel();
        self.sender
            .send(FeedEvent::Stats { reply })
            .map_err(|_| FeedError::Stopped)?;
        stats.await.map_err(|_| FeedError::Stopped)
    }

    /// Sender transports can use to feed events into this reactor.
    pub fn events(&self) -> EventSender {
        EventSender::new(self.sender.clone())
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
