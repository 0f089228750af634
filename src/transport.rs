use crate::domain::ConnectionOptions;
use crate::feed::FeedEvent;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

#[cfg(feature = "rabbitmq")]
pub mod rabbitmq;
pub mod runtime;

pub type ConnectionId = u64;
pub type LinkId = u64;

pub const TRIGGER_CLOSED: &str = "amqpfeed:openwhisk:triggerclosed";
pub const TRIGGER_CANCELED: &str = "amqpfeed:openwhisk:triggercanceled";
pub const TRIGGER_FAILURE: &str = "amqpfeed:openwhisk:triggerfailure";

/// Condition attached to a rejected delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorCondition {
    pub condition: String,
    pub description: String,
}

impl ErrorCondition {
    pub fn new(condition: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            description: description.into(),
        }
    }

    pub fn trigger_closed() -> Self {
        Self::new(TRIGGER_CLOSED, "async close in progress")
    }

    pub fn trigger_canceled() -> Self {
        Self::new(TRIGGER_CANCELED, "No OpenWhisk consumer")
    }

    pub fn trigger_failure(description: impl Into<String>) -> Self {
        Self::new(TRIGGER_FAILURE, description)
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.condition, self.description)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InboundMessage {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl InboundMessage {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            content_type: None,
        }
    }
}

/// Settlement handle for one inbound message. Settling consumes the handle, so a
/// delivery is settled at most once.
pub trait Delivery: Send + 'static {
    fn accept(self: Box<Self>);
    fn reject(self: Box<Self>, condition: ErrorCondition);
}

/// Everything a transport reports back to the feed, in emission order.
pub enum TransportEvent {
    ConnectionOpened {
        connection: ConnectionId,
    },
    ConnectionClosed {
        connection: ConnectionId,
        error: Option<String>,
    },
    Disconnected {
        connection: ConnectionId,
        error: Option<String>,
    },
    ConnectionError {
        connection: ConnectionId,
        error: String,
    },
    ProtocolError {
        connection: ConnectionId,
        error: String,
    },
    SocketError {
        connection: ConnectionId,
        error: String,
    },
    ReceiverOpened {
        link: LinkId,
    },
    ReceiverError {
        link: LinkId,
        error: String,
    },
    ReceiverClosed {
        link: LinkId,
    },
    Message {
        link: LinkId,
        message: InboundMessage,
        delivery: Box<dyn Delivery>,
    },
}

impl TransportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::ConnectionOpened { .. } => "connection_open",
            TransportEvent::ConnectionClosed { .. } => "connection_close",
            TransportEvent::Disconnected { .. } => "disconnected",
            TransportEvent::ConnectionError { .. } => "connection_error",
            TransportEvent::ProtocolError { .. } => "protocol_error",
            TransportEvent::SocketError { .. } => "socket_error",
            TransportEvent::ReceiverOpened { .. } => "receiver_open",
            TransportEvent::ReceiverError { .. } => "receiver_error",
            TransportEvent::ReceiverClosed { .. } => "receiver_close",
            TransportEvent::Message { .. } => "message",
        }
    }
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::ConnectionOpened { connection }
            | TransportEvent::ConnectionClosed { connection, .. }
            | TransportEvent::Disconnected { connection, .. }
            | TransportEvent::ConnectionError { connection, .. }
            | TransportEvent::ProtocolError { connection, .. }
            | TransportEvent::SocketError { connection, .. } => f
                .debug_struct(self.name())
                .field("connection", connection)
                .finish_non_exhaustive(),
            TransportEvent::ReceiverOpened { link }
            | TransportEvent::ReceiverError { link, .. }
            | TransportEvent::ReceiverClosed { link }
            | TransportEvent::Message { link, .. } => f
                .debug_struct(self.name())
                .field("link", link)
                .finish_non_exhaustive(),
        }
    }
}

/// Channel into the feed reactor, handed to transports so every callback is serialised.
#[derive(Clone, Debug)]
pub struct EventSender {
    inner: mpsc::UnboundedSender<FeedEvent>,
}

impl EventSender {
    pub fn new(inner: mpsc::UnboundedSender<FeedEvent>) -> Self {
        Self { inner }
    }

    /// Returns false once the reactor has stopped.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.inner.send(FeedEvent::Transport(event)).is_ok()
    }

    pub(crate) fn send_feed(&self, event: FeedEvent) -> bool {
        self.inner.send(event).is_ok()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid connection options for `{label}`: {reason}")]
    InvalidOptions { label: String, reason: String },
    #[error("connection `{label}` failed: {reason}")]
    Connect { label: String, reason: String },
    #[error("receiver on `{address}` failed: {reason}")]
    Link { address: String, reason: String },
    #[error("connection is closed")]
    Closed,
}

/// Opens connections. `connect` must not wait for the handshake: the outcome arrives later
/// as `ConnectionOpened` or `SocketError` + `Disconnected` on `events`.
pub trait AmqpTransport: Send + 'static {
    fn connect(
        &mut self,
        connection: ConnectionId,
        options: &ConnectionOptions,
        events: EventSender,
    ) -> Result<Box<dyn AmqpConnection>, TransportError>;
}

impl<T: AmqpTransport + ?Sized> AmqpTransport for Box<T> {
    fn connect(
        &mut self,
        connection: ConnectionId,
        options: &ConnectionOptions,
        events: EventSender,
    ) -> Result<Box<dyn AmqpConnection>, TransportError> {
        (**self).connect(connection, options, events)
    }
}

pub trait AmqpConnection: Send {
    /// Requests a receiver link; `ReceiverOpened` or `ReceiverError` follows.
    fn open_receiver(
        &mut self,
        link: LinkId,
        address: &str,
        credit: u32,
    ) -> Result<Box<dyn AmqpReceiver>, TransportError>;

    fn close(&mut self);
}

pub trait AmqpReceiver: Send {
    fn close(&mut self);
}
