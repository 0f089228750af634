use crate::domain::TriggerConfig;
use crate::feed::key::{connection_label, ConnectionKey};
use crate::feed_event;
use crate::transport::{
    AmqpConnection, AmqpReceiver, AmqpTransport, ConnectionId, EventSender, LinkId,
    TransportError, TransportEvent,
};
use std::collections::{BTreeSet, HashMap};

const TARGET: &str = "amqp_feed::pool";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Open,
    Failed,
    Closed,
}

/// A connection that failed before (or after giving up on) reconnecting. Every listed
/// link must be failed by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionFailure {
    pub connection: ConnectionId,
    pub links: Vec<LinkId>,
    pub error: String,
}

struct PooledConnection {
    key: ConnectionKey,
    label: String,
    handle: Box<dyn AmqpConnection>,
    state: ConnectionState,
    ever_opened: bool,
    socket_error: Option<String>,
    receivers: BTreeSet<LinkId>,
}

/// Shares one transport connection between every trigger with the same [`ConnectionKey`].
///
/// Connections are reference counted through their receiver sets. Entries for failed
/// connections are evicted from the key map right away so the next trigger with that key
/// opens a fresh connection; their bookkeeping lingers until the last link detaches.
pub struct ConnectionPool {
    transport: Box<dyn AmqpTransport>,
    events: EventSender,
    by_key: HashMap<ConnectionKey, ConnectionId>,
    connections: HashMap<ConnectionId, PooledConnection>,
    next_id: ConnectionId,
}

impl ConnectionPool {
    pub fn new(transport: Box<dyn AmqpTransport>, events: EventSender) -> Self {
        Self {
            transport,
            events,
            by_key: HashMap::new(),
            connections: HashMap::new(),
            next_id: 1,
        }
    }

    /// Returns the pooled connection for this trigger's key, opening one if needed.
    /// Does not wait for the handshake.
    pub fn get_connection(
        &mut self,
        trigger: &TriggerConfig,
    ) -> Result<ConnectionId, TransportError> {
        let key = ConnectionKey::for_trigger(trigger);
        if let Some(id) = self.by_key.get(&key) {
            return Ok(*id);
        }

        let id = self.next_id;
        self.next_id += 1;
        let label = connection_label(trigger);
        let handle = self
            .transport
            .connect(id, &trigger.connection, self.events.clone())?;

        feed_event!(
            info,
            TARGET,
            "connection_opening",
            connection = label,
            connection_id = id
        );
        self.by_key.insert(key.clone(), id);
        self.connections.insert(
            id,
            PooledConnection {
                key,
                label,
                handle,
                state: ConnectionState::Pending,
                ever_opened: false,
                socket_error: None,
                receivers: BTreeSet::new(),
            },
        );
        Ok(id)
    }

    /// Opens a receiver link on `connection` and attaches it to the connection's set.
    pub fn open_receiver(
        &mut self,
        connection: ConnectionId,
        link: LinkId,
        address: &str,
        credit: u32,
    ) -> Result<Box<dyn AmqpReceiver>, TransportError> {
        let pooled = self
            .connections
            .get_mut(&connection)
            .ok_or(TransportError::Closed)?;
        if matches!(pooled.state, ConnectionState::Failed | ConnectionState::Closed) {
            return Err(TransportError::Closed);
        }
        let receiver = pooled.handle.open_receiver(link, address, credit)?;
        pooled.receivers.insert(link);
        Ok(receiver)
    }

    pub fn detach(&mut self, connection: ConnectionId, link: LinkId) {
        if let Some(pooled) = self.connections.get_mut(&connection) {
            pooled.receivers.remove(&link);
        }
    }

    /// Closes and evicts `connection` when it has no receivers left and is still the
    /// pool's current entry for its key.
    pub fn maybe_close(&mut self, connection: ConnectionId) -> bool {
        let Some(pooled) = self.connections.get(&connection) else {
            return false;
        };
        if !pooled.receivers.is_empty() {
            return false;
        }
        if self.by_key.get(&pooled.key) != Some(&connection) {
            if matches!(pooled.state, ConnectionState::Failed | ConnectionState::Closed) {
                self.connections.remove(&connection);
            }
            return false;
        }

        self.by_key.remove(&pooled.key);
        if let Some(mut pooled) = self.connections.remove(&connection) {
            pooled.handle.close();
            feed_event!(
                info,
                TARGET,
                "connection_closed",
                connection = pooled.label,
                connection_id = connection
            );
        }
        true
    }

    /// Applies a connection-level event. Returns the failure every attached link must
    /// observe when the connection is gone for good.
    pub fn handle_event(&mut self, event: &TransportEvent) -> Option<ConnectionFailure> {
        match event {
            TransportEvent::ConnectionOpened { connection } => {
                let pooled = self.connections.get_mut(connection)?;
                pooled.state = ConnectionState::Open;
                pooled.ever_opened = true;
                feed_event!(
                    info,
                    TARGET,
                    "connection_open",
                    connection = pooled.label,
                    receivers = pooled.receivers.len()
                );
                None
            }
            TransportEvent::SocketError { connection, error } => {
                let pooled = self.connections.get_mut(connection)?;
                feed_event!(
                    warn,
                    TARGET,
                    "socket_error",
                    connection = pooled.label,
                    error = error
                );
                if pooled.socket_error.is_none() {
                    pooled.socket_error = Some(error.clone());
                }
                None
            }
            TransportEvent::ConnectionError { connection, error }
            | TransportEvent::ProtocolError { connection, error } => {
                let pooled = self.connections.get_mut(connection)?;
                feed_event!(
                    error,
                    TARGET,
                    event.name(),
                    connection = pooled.label,
                    error = error
                );
                if pooled.socket_error.is_none() {
                    pooled.socket_error = Some(error.clone());
                }
                None
            }
            TransportEvent::Disconnected { connection, error } => {
                let pooled = self.connections.get(connection)?;
                if pooled.ever_opened {
                    feed_event!(
                        warn,
                        TARGET,
                        "disconnected",
                        connection = pooled.label,
                        error = error.as_deref().unwrap_or("none"),
                        reconnect = "transport"
                    );
                    return None;
                }
                let reason = pooled
                    .socket_error
                    .clone()
                    .or_else(|| error.clone())
                    .unwrap_or_else(|| "connection lost before it opened".to_string());
                self.fail(*connection, reason)
            }
            TransportEvent::ConnectionClosed { connection, error } => {
                // A current entry only closes when the peer (or the transport giving up)
                // closed it; pool-initiated closes evict the entry first.
                if self.is_current(*connection) || error.is_some() {
                    let reason = error
                        .clone()
                        .unwrap_or_else(|| "connection closed by peer".to_string());
                    return self.fail(*connection, reason);
                }
                let pooled = self.connections.get_mut(connection)?;
                pooled.state = ConnectionState::Closed;
                feed_event!(info, TARGET, "connection_close", connection = pooled.label);
                if pooled.receivers.is_empty() {
                    self.connections.remove(connection);
                }
                None
            }
            _ => None,
        }
    }

    fn fail(&mut self, connection: ConnectionId, reason: String) -> Option<ConnectionFailure> {
        let pooled = self.connections.get_mut(&connection)?;
        if pooled.state == ConnectionState::Failed {
            return None;
        }
        pooled.state = ConnectionState::Failed;
        pooled.handle.close();
        feed_event!(
            error,
            TARGET,
            "connection_failed",
            connection = pooled.label,
            error = reason,
            receivers = pooled.receivers.len()
        );
        let links: Vec<LinkId> = pooled.receivers.iter().copied().collect();
        let key = pooled.key.clone();
        if self.by_key.get(&key) == Some(&connection) {
            self.by_key.remove(&key);
        }
        if links.is_empty() {
            self.connections.remove(&connection);
        }
        Some(ConnectionFailure {
            connection,
            links,
            error: reason,
        })
    }

    pub fn label(&self, connection: ConnectionId) -> Option<&str> {
        self.connections
            .get(&connection)
            .map(|pooled| pooled.label.as_str())
    }

    pub fn state(&self, connection: ConnectionId) -> Option<ConnectionState> {
        self.connections.get(&connection).map(|pooled| pooled.state)
    }

    pub fn receiver_count(&self, connection: ConnectionId) -> usize {
        self.connections
            .get(&connection)
            .map(|pooled| pooled.receivers.len())
            .unwrap_or(0)
    }

    pub fn is_current(&self, connection: ConnectionId) -> bool {
        self.connections
            .get(&connection)
            .is_some_and(|pooled| self.by_key.get(&pooled.key) == Some(&connection))
    }

    /// Connections currently reachable by key.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn close_all(&mut self) {
        self.by_key.clear();
        for (_, mut pooled) in self.connections.drain() {
            pooled.handle.close();
        }
    }
}
