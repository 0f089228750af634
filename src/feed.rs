//! Connection multiplexing and receiver lifecycle.
//!
//! All connection and receiver bookkeeping lives on a single reactor task ([`Feed`]).
//! Commands from [`FeedHandle`], transport callbacks and delivery follow-ups arrive on one
//! channel as [`FeedEvent`]s, so there is never concurrent mutation of the maps.

use crate::delivery::DeliveryError;
use crate::domain::{TriggerConfig, TriggerId};
use crate::transport::{InboundMessage, LinkId, TransportError, TransportEvent};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

pub mod key;
pub mod pool;
pub mod reactor;
pub mod registry;

pub use key::{connection_label, ConnectionKey};
pub use pool::{ConnectionFailure, ConnectionPool, ConnectionState};
pub use reactor::{Feed, FeedHandle};
pub use registry::{ReceiverRegistry, ReceiverState};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("receiver for trigger {trigger} was closed before it opened")]
    ReceiverClosed { trigger: String },
    #[error("receiver for trigger {trigger} failed: {reason}")]
    LinkFailed { trigger: String, reason: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("feed reactor has stopped")]
    Stopped,
}

/// What a trigger callback is asked to deliver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedPayload {
    Message(InboundMessage),
    FeedError(String),
}

/// Invoked for every message (and link failure) on a trigger's receiver.
#[async_trait]
pub trait TriggerCallback: Send + Sync + 'static {
    async fn on_message(
        &self,
        trigger: Arc<TriggerConfig>,
        payload: FeedPayload,
    ) -> Result<TriggerId, DeliveryError>;
}

/// Requests an automatic disable of a trigger's stored document.
#[async_trait]
pub trait TriggerDisabler: Send + Sync + 'static {
    async fn disable_trigger(&self, trigger: &TriggerId, message: &str)
        -> crate::error::Result<()>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub triggers: usize,
    pub connections: usize,
    pub pending_receivers: usize,
    pub closing_receivers: usize,
}

pub type OpenReply = oneshot::Sender<Result<(), FeedError>>;

/// Input of the feed reactor.
pub enum FeedEvent {
    Transport(TransportEvent),
    CreateReceiver {
        trigger: TriggerId,
        config: Arc<TriggerConfig>,
        callback: Arc<dyn TriggerCallback>,
        reply: OpenReply,
    },
    DeleteReceiver {
        trigger: TriggerId,
        reply: Option<oneshot::Sender<bool>>,
    },
    Stats {
        reply: oneshot::Sender<FeedStats>,
    },
    DeliveryFailed {
        trigger: TriggerId,
        link: LinkId,
        error: DeliveryError,
    },
}
