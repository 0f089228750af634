use crate::delivery::DeliveryError;
use crate::domain::{TriggerConfig, TriggerId};
use crate::feed::pool::{ConnectionFailure, ConnectionPool};
use crate::feed::{
    FeedError, FeedEvent, FeedPayload, FeedStats, OpenReply, TriggerCallback, TriggerDisabler,
};
use crate::feed_event;
use crate::transport::{
    AmqpReceiver, AmqpTransport, ConnectionId, Delivery, ErrorCondition, EventSender,
    InboundMessage, LinkId, TransportEvent,
};
use std::collections::HashMap;
use std::sync::Arc;

const TARGET: &str = "amqp_feed::registry";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiverState {
    Pending,
    Open,
    Closing,
}

struct RegisteredTrigger {
    config: Arc<TriggerConfig>,
    callback: Arc<dyn TriggerCallback>,
    link: LinkId,
}

struct ReceiverLink {
    trigger: TriggerId,
    connection: ConnectionId,
    state: ReceiverState,
    handle: Box<dyn AmqpReceiver>,
    opened: Option<OpenReply>,
}

/// One receiver link per registered trigger.
///
/// A link is flagged `Closing` before its registry entry goes away, and stays in the link
/// table until the transport confirms the close. Messages and errors that race a delete
/// therefore always find the link and are settled instead of dispatched.
pub struct ReceiverRegistry {
    pool: ConnectionPool,
    events: EventSender,
    disabler: Arc<dyn TriggerDisabler>,
    triggers: HashMap<TriggerId, RegisteredTrigger>,
    links: HashMap<LinkId, ReceiverLink>,
    next_link: LinkId,
}

impl ReceiverRegistry {
    pub fn new(
        transport: Box<dyn AmqpTransport>,
        events: EventSender,
        disabler: Arc<dyn TriggerDisabler>,
    ) -> Self {
        Self {
            pool: ConnectionPool::new(transport, events.clone()),
            events,
            disabler,
            triggers: HashMap::new(),
            links: HashMap::new(),
            next_link: 1,
        }
    }

    pub fn handle(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Transport(event) => self.handle_transport(event),
            FeedEvent::CreateReceiver {
                trigger,
                config,
                callback,
                reply,
            } => {
                self.create_receiver(trigger, config, callback, reply);
            }
            FeedEvent::DeleteReceiver { trigger, reply } => {
                let deleted = self.delete_receiver(&trigger);
                if let Some(reply) = reply {
                    let _ = reply.send(deleted);
                }
            }
            FeedEvent::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            FeedEvent::DeliveryFailed {
                trigger,
                link,
                error,
            } => self.on_delivery_failed(&trigger, link, &error),
        }
    }

    pub fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ReceiverOpened { link } => self.on_receiver_opened(link),
            TransportEvent::ReceiverError { link, error } => self.on_receiver_error(link, error),
            TransportEvent::ReceiverClosed { link } => self.on_receiver_closed(link),
            TransportEvent::Message {
                link,
                message,
                delivery,
            } => self.on_message(link, message, delivery),
            other => {
                if let Some(failure) = self.pool.handle_event(&other) {
                    self.on_connection_failure(failure);
                }
                if let TransportEvent::ConnectionClosed { connection, .. } = other {
                    self.purge_closing(connection);
                }
            }
        }
    }

    /// Registers `trigger` and requests its receiver link. `opened` is settled once, by the
    /// link's open or error event, or right away when the link cannot be requested.
    /// An existing receiver for the same trigger is deleted first.
    pub fn create_receiver(
        &mut self,
        trigger: TriggerId,
        config: Arc<TriggerConfig>,
        callback: Arc<dyn TriggerCallback>,
        opened: OpenReply,
    ) -> Option<LinkId> {
        if self.triggers.contains_key(&trigger) {
            feed_event!(info, TARGET, "receiver_replaced", trigger = trigger);
            self.delete_receiver(&trigger);
        }

        let connection = match self.pool.get_connection(&config) {
            Ok(connection) => connection,
            Err(err) => {
                feed_event!(
                    error,
                    TARGET,
                    "receiver_create_failed",
                    trigger = trigger,
                    error = err
                );
                let _ = opened.send(Err(err.into()));
                return None;
            }
        };

        let link = self.next_link;
        self.next_link += 1;
        let handle = match self
            .pool
            .open_receiver(connection, link, &config.address, config.credit)
        {
            Ok(handle) => handle,
            Err(err) => {
                feed_event!(
                    error,
                    TARGET,
                    "receiver_create_failed",
                    trigger = trigger,
                    error = err
                );
                let _ = opened.send(Err(err.into()));
                self.pool.maybe_close(connection);
                return None;
            }
        };

        feed_event!(
            info,
            TARGET,
            "receiver_created",
            trigger = trigger,
            connection = self.connection_label(connection),
            address = config.address,
            credit = config.credit
        );
        self.links.insert(
            link,
            ReceiverLink {
                trigger: trigger.clone(),
                connection,
                state: ReceiverState::Pending,
                handle,
                opened: Some(opened),
            },
        );
        self.triggers.insert(
            trigger,
            RegisteredTrigger {
                config,
                callback,
                link,
            },
        );
        Some(link)
    }

    /// Removes the trigger's receiver. Unknown triggers are a no-op and return false.
    pub fn delete_receiver(&mut self, trigger: &TriggerId) -> bool {
        let Some(registered) = self.triggers.remove(trigger) else {
            feed_event!(debug, TARGET, "receiver_delete_ignored", trigger = trigger);
            return false;
        };

        let Some(link) = self.links.get_mut(&registered.link) else {
            return true;
        };
        link.state = ReceiverState::Closing;
        link.handle.close();
        if let Some(opened) = link.opened.take() {
            let _ = opened.send(Err(FeedError::ReceiverClosed {
                trigger: trigger.to_string(),
            }));
        }
        let connection = link.connection;

        self.pool.detach(connection, registered.link);
        feed_event!(
            info,
            TARGET,
            "receiver_deleted",
            trigger = trigger,
            connection = self.connection_label(connection)
        );
        self.pool.maybe_close(connection);
        true
    }

    fn on_receiver_opened(&mut self, link_id: LinkId) {
        let Some(link) = self.links.get_mut(&link_id) else {
            return;
        };
        match link.state {
            ReceiverState::Pending => {
                link.state = ReceiverState::Open;
                if let Some(opened) = link.opened.take() {
                    let _ = opened.send(Ok(()));
                }
                feed_event!(info, TARGET, "receiver_open", trigger = link.trigger);
            }
            ReceiverState::Closing => {
                feed_event!(debug, TARGET, "receiver_open_ignored", trigger = link.trigger);
            }
            ReceiverState::Open => {}
        }
    }

    fn on_receiver_error(&mut self, link_id: LinkId, error: String) {
        let Some(link) = self.links.get_mut(&link_id) else {
            tracing::warn!(target: TARGET, event = "receiver_error_untracked", link = link_id, error = %error);
            return;
        };
        if link.state == ReceiverState::Closing {
            return;
        }

        let trigger_id = link.trigger.clone();
        if let Some(opened) = link.opened.take() {
            let _ = opened.send(Err(FeedError::LinkFailed {
                trigger: trigger_id.to_string(),
                reason: error.clone(),
            }));
        }

        let registered = match self.triggers.get(&trigger_id) {
            Some(registered) if registered.link == link_id => registered,
            _ => {
                feed_event!(
                    warn,
                    TARGET,
                    "receiver_error_untracked",
                    trigger = trigger_id,
                    error = error
                );
                return;
            }
        };
        let config = Arc::clone(&registered.config);
        let callback = Arc::clone(&registered.callback);

        feed_event!(
            error,
            TARGET,
            "receiver_error",
            trigger = trigger_id,
            error = error
        );
        self.delete_receiver(&trigger_id);

        let disabler = Arc::clone(&self.disabler);
        tokio::spawn(async move {
            if let Err(err) = callback
                .on_message(config, FeedPayload::FeedError(error.clone()))
                .await
            {
                feed_event!(
                    warn,
                    TARGET,
                    "feed_error_delivery_failed",
                    trigger = trigger_id,
                    error = err
                );
            }
            if let Err(err) = disabler.disable_trigger(&trigger_id, &error).await {
                feed_event!(
                    error,
                    TARGET,
                    "trigger_disable_failed",
                    trigger = trigger_id,
                    error = err
                );
            }
        });
    }

    fn on_receiver_closed(&mut self, link_id: LinkId) {
        let closing = self
            .links
            .get(&link_id)
            .map(|link| link.state == ReceiverState::Closing);
        match closing {
            Some(true) => {
                self.links.remove(&link_id);
            }
            Some(false) => {
                self.on_receiver_error(link_id, "receiver closed by peer".to_string());
                self.links.remove(&link_id);
            }
            None => {}
        }
    }

    fn on_message(
        &mut self,
        link_id: LinkId,
        message: InboundMessage,
        delivery: Box<dyn Delivery>,
    ) {
        let Some(link) = self.links.get(&link_id) else {
            tracing::warn!(target: TARGET, event = "message_rejected", link = link_id, reason = "unknown link");
            delivery.reject(ErrorCondition::trigger_canceled());
            return;
        };
        if link.state == ReceiverState::Closing {
            feed_event!(
                info,
                TARGET,
                "message_rejected",
                trigger = link.trigger,
                reason = "closing"
            );
            delivery.reject(ErrorCondition::trigger_closed());
            return;
        }

        let registered = match self.triggers.get(&link.trigger) {
            Some(registered) if registered.link == link_id => registered,
            _ => {
                feed_event!(
                    warn,
                    TARGET,
                    "message_rejected",
                    trigger = link.trigger,
                    reason = "no consumer"
                );
                delivery.reject(ErrorCondition::trigger_canceled());
                return;
            }
        };

        let trigger_id = link.trigger.clone();
        let config = Arc::clone(&registered.config);
        let callback = Arc::clone(&registered.callback);
        let events = self.events.clone();
        tokio::spawn(async move {
            match callback
                .on_message(config, FeedPayload::Message(message))
                .await
            {
                Ok(_) => delivery.accept(),
                Err(error) => {
                    delivery.reject(ErrorCondition::trigger_failure(error.to_string()));
                    events.send_feed(FeedEvent::DeliveryFailed {
                        trigger: trigger_id,
                        link: link_id,
                        error,
                    });
                }
            }
        });
    }

    fn on_delivery_failed(&mut self, trigger: &TriggerId, link: LinkId, error: &DeliveryError) {
        let current = self
            .triggers
            .get(trigger)
            .is_some_and(|registered| registered.link == link);
        if !current {
            feed_event!(
                debug,
                TARGET,
                "delivery_failure_stale",
                trigger = trigger,
                error = error
            );
            return;
        }

        feed_event!(
            error,
            TARGET,
            "delivery_failed",
            trigger = trigger,
            error = error
        );
        self.delete_receiver(trigger);

        let disabler = Arc::clone(&self.disabler);
        let trigger = trigger.clone();
        let message = error.to_string();
        tokio::spawn(async move {
            if let Err(err) = disabler.disable_trigger(&trigger, &message).await {
                feed_event!(
                    error,
                    TARGET,
                    "trigger_disable_failed",
                    trigger = trigger,
                    error = err
                );
            }
        });
    }

    fn on_connection_failure(&mut self, failure: ConnectionFailure) {
        let reason = format!("connection failed: {}", failure.error);
        for link in failure.links {
            self.on_receiver_error(link, reason.clone());
        }
        self.purge_closing(failure.connection);
        self.pool.maybe_close(failure.connection);
    }

    fn purge_closing(&mut self, connection: ConnectionId) {
        self.links.retain(|_, link| {
            !(link.connection == connection && link.state == ReceiverState::Closing)
        });
    }

    fn connection_label(&self, connection: ConnectionId) -> String {
        self.pool
            .label(connection)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{connection}"))
    }

    pub fn stats(&self) -> FeedStats {
        let count = |state: ReceiverState| {
            self.links
                .values()
                .filter(|link| link.state == state)
                .count()
        };
        FeedStats {
            triggers: self.triggers.len(),
            connections: self.pool.len(),
            pending_receivers: count(ReceiverState::Pending),
            closing_receivers: count(ReceiverState::Closing),
        }
    }

    pub fn contains(&self, trigger: &TriggerId) -> bool {
        self.triggers.contains_key(trigger)
    }

    pub fn link_for(&self, trigger: &TriggerId) -> Option<LinkId> {
        self.triggers.get(trigger).map(|registered| registered.link)
    }

    pub fn link_state(&self, link: LinkId) -> Option<ReceiverState> {
        self.links.get(&link).map(|link| link.state)
    }

    pub fn connection_for(&self, trigger: &TriggerId) -> Option<ConnectionId> {
        let link = self.link_for(trigger)?;
        self.links.get(&link).map(|link| link.connection)
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Closes every link and connection. Used when the reactor stops.
    pub fn shutdown(&mut self) {
        let triggers: Vec<TriggerId> = self.triggers.keys().cloned().collect();
        for trigger in triggers {
            self.delete_receiver(&trigger);
        }
        self.links.clear();
        self.pool.close_all();
    }
}
