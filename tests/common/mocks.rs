#![allow(dead_code)]

use amqp_feed::auth::{AuthError, TriggerAuth};
use amqp_feed::delivery::{DeliveryError, FireError, TriggerEndpoint};
use amqp_feed::domain::{ConnectionOptions, TriggerConfig, TriggerId};
use amqp_feed::feed::{FeedPayload, TriggerCallback, TriggerDisabler};
use amqp_feed::store::{DocumentStore, MemoryDocumentStore, StoreError, TriggerDocument};
use amqp_feed::transport::{
    AmqpConnection, AmqpReceiver, AmqpTransport, ConnectionId, Delivery, ErrorCondition,
    EventSender, LinkId, TransportError, TransportEvent,
};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenedReceiver {
    pub connection: ConnectionId,
    pub link: LinkId,
    pub address: String,
    pub credit: u32,
}

#[derive(Default)]
struct TransportState {
    connects: Vec<(ConnectionId, ConnectionOptions)>,
    receivers: Vec<OpenedReceiver>,
    closed_links: Vec<LinkId>,
    closed_connections: Vec<ConnectionId>,
    events: Option<EventSender>,
    refuse_connect: bool,
}

/// Records every connection and link the feed asks for. Events are injected by the test.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    pub fn refusing() -> Self {
        let transport = Self::default();
        transport.inner.lock().expect("transport state").refuse_connect = true;
        transport
    }

    pub fn connect_count(&self) -> usize {
        self.inner.lock().expect("transport state").connects.len()
    }

    pub fn connected_hosts(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("transport state")
            .connects
            .iter()
            .map(|(_, options)| options.host().to_string())
            .collect()
    }

    pub fn receivers(&self) -> Vec<OpenedReceiver> {
        self.inner.lock().expect("transport state").receivers.clone()
    }

    pub fn last_receiver(&self) -> OpenedReceiver {
        self.receivers().last().cloned().expect("a receiver was opened")
    }

    pub fn closed_links(&self) -> Vec<LinkId> {
        self.inner.lock().expect("transport state").closed_links.clone()
    }

    pub fn closed_connections(&self) -> Vec<ConnectionId> {
        self.inner
            .lock()
            .expect("transport state")
            .closed_connections
            .clone()
    }

    /// Sends `event` to the reactor the transport was last connected from.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let events = self.inner.lock().expect("transport state").events.clone();
        events.map(|events| events.send(event)).unwrap_or(false)
    }
}

impl AmqpTransport for MockTransport {
    fn connect(
        &mut self,
        connection: ConnectionId,
        options: &ConnectionOptions,
        events: EventSender,
    ) -> Result<Box<dyn AmqpConnection>, TransportError> {
        let mut state = self.inner.lock().expect("transport state");
        if state.refuse_connect {
            return Err(TransportError::InvalidOptions {
                label: options.host().to_string(),
                reason: "refused by test transport".to_string(),
            });
        }
        state.connects.push((connection, options.clone()));
        state.events = Some(events);
        Ok(Box::new(MockConnection {
            id: connection,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockConnection {
    id: ConnectionId,
    inner: Arc<Mutex<TransportState>>,
}

impl AmqpConnection for MockConnection {
    fn open_receiver(
        &mut self,
        link: LinkId,
        address: &str,
        credit: u32,
    ) -> Result<Box<dyn AmqpReceiver>, TransportError> {
        self.inner
            .lock()
            .expect("transport state")
            .receivers
            .push(OpenedReceiver {
                connection: self.id,
                link,
                address: address.to_string(),
                credit,
            });
        Ok(Box::new(MockReceiver {
            link,
            inner: Arc::clone(&self.inner),
        }))
    }

    fn close(&mut self) {
        self.inner
            .lock()
            .expect("transport state")
            .closed_connections
            .push(self.id);
    }
}

struct MockReceiver {
    link: LinkId,
    inner: Arc<Mutex<TransportState>>,
}

impl AmqpReceiver for MockReceiver {
    fn close(&mut self) {
        self.inner
            .lock()
            .expect("transport state")
            .closed_links
            .push(self.link);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    Accepted,
    Rejected(ErrorCondition),
}

/// Hands out deliveries and records how each was settled.
#[derive(Clone, Default)]
pub struct DeliveryProbe {
    settled: Arc<Mutex<Vec<Settlement>>>,
}

impl DeliveryProbe {
    pub fn delivery(&self) -> Box<dyn Delivery> {
        Box::new(ProbeDelivery {
            settled: Arc::clone(&self.settled),
        })
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.settled.lock().expect("settlements").clone()
    }

    pub fn accepted(&self) -> usize {
        self.settlements()
            .iter()
            .filter(|settlement| **settlement == Settlement::Accepted)
            .count()
    }

    pub fn rejections(&self) -> Vec<ErrorCondition> {
        self.settlements()
            .into_iter()
            .filter_map(|settlement| match settlement {
                Settlement::Rejected(condition) => Some(condition),
                Settlement::Accepted => None,
            })
            .collect()
    }
}

struct ProbeDelivery {
    settled: Arc<Mutex<Vec<Settlement>>>,
}

impl Delivery for ProbeDelivery {
    fn accept(self: Box<Self>) {
        self.settled
            .lock()
            .expect("settlements")
            .push(Settlement::Accepted);
    }

    fn reject(self: Box<Self>, condition: ErrorCondition) {
        self.settled
            .lock()
            .expect("settlements")
            .push(Settlement::Rejected(condition));
    }
}

/// Trigger callback that records payloads and answers with a fixed outcome.
#[derive(Clone, Default)]
pub struct RecordingCallback {
    payloads: Arc<Mutex<Vec<FeedPayload>>>,
    failure: Option<DeliveryError>,
}

impl RecordingCallback {
    pub fn failing(error: DeliveryError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    pub fn payloads(&self) -> Vec<FeedPayload> {
        self.payloads.lock().expect("payloads").clone()
    }
}

#[async_trait]
impl TriggerCallback for RecordingCallback {
    async fn on_message(
        &self,
        trigger: Arc<TriggerConfig>,
        payload: FeedPayload,
    ) -> Result<TriggerId, DeliveryError> {
        self.payloads.lock().expect("payloads").push(payload);
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(trigger.id()),
        }
    }
}

#[derive(Clone, Default)]
pub struct RecordingDisabler {
    calls: Arc<Mutex<Vec<(TriggerId, String)>>>,
}

impl RecordingDisabler {
    pub fn calls(&self) -> Vec<(TriggerId, String)> {
        self.calls.lock().expect("disable calls").clone()
    }
}

#[async_trait]
impl TriggerDisabler for RecordingDisabler {
    async fn disable_trigger(&self, trigger: &TriggerId, message: &str) -> amqp_feed::Result<()> {
        self.calls
            .lock()
            .expect("disable calls")
            .push((trigger.clone(), message.to_string()));
        Ok(())
    }
}

/// Endpoint answering with queued statuses, then 200.
#[derive(Clone, Default)]
pub struct ScriptedEndpoint {
    statuses: Arc<Mutex<VecDeque<u16>>>,
    bodies: Arc<Mutex<Vec<JsonValue>>>,
}

impl ScriptedEndpoint {
    pub fn with_statuses(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            statuses: Arc::new(Mutex::new(statuses.into_iter().collect())),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.bodies.lock().expect("bodies").len()
    }

    pub fn bodies(&self) -> Vec<JsonValue> {
        self.bodies.lock().expect("bodies").clone()
    }
}

#[async_trait]
impl TriggerEndpoint for ScriptedEndpoint {
    async fn fire(&self, _trigger: &TriggerConfig, body: &JsonValue) -> Result<(), FireError> {
        self.bodies.lock().expect("bodies").push(body.clone());
        let status = self
            .statuses
            .lock()
            .expect("statuses")
            .pop_front()
            .unwrap_or(200);
        if status >= 400 {
            return Err(FireError::Status { status });
        }
        Ok(())
    }
}

/// Memory store that can be told to answer the next writes with a conflict.
#[derive(Default)]
pub struct ContendedStore {
    inner: MemoryDocumentStore,
    conflicts: AtomicU32,
    writes: AtomicU32,
    worker_queries: AtomicU32,
    worker_loads: Mutex<Option<HashMap<String, u64>>>,
}

impl ContendedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conflict_next(&self, writes: u32) {
        self.conflicts.store(writes, Ordering::SeqCst);
    }

    pub fn with_worker_loads(self, loads: &[(&str, u64)]) -> Self {
        *self.worker_loads.lock().expect("worker loads") = Some(
            loads
                .iter()
                .map(|(worker, load)| (worker.to_string(), *load))
                .collect(),
        );
        self
    }

    /// Successful writes and destroys.
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn worker_queries(&self) -> u32 {
        self.worker_queries.load(Ordering::SeqCst)
    }

    fn take_conflict(&self, id: &str) -> Result<(), StoreError> {
        let injected = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Conflict { id: id.to_string() });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for ContendedStore {
    async fn get(&self, id: &str) -> Result<Option<TriggerDocument>, StoreError> {
        self.inner.get(id).await
    }

    async fn insert(&self, document: &TriggerDocument) -> Result<String, StoreError> {
        self.take_conflict(&document.id)?;
        let rev = self.inner.insert(document).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(rev)
    }

    async fn destroy(&self, id: &str, rev: &str) -> Result<(), StoreError> {
        self.take_conflict(id)?;
        self.inner.destroy(id, rev).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn triggers_by_worker(&self) -> Result<HashMap<String, u64>, StoreError> {
        self.worker_queries.fetch_add(1, Ordering::SeqCst);
        if let Some(loads) = self.worker_loads.lock().expect("worker loads").clone() {
            return Ok(loads);
        }
        self.inner.triggers_by_worker().await
    }
}

/// Authorizer that allows or refuses every call with a fixed status.
#[derive(Clone, Default)]
pub struct StaticAuth {
    refuse_with: Option<u16>,
    calls: Arc<Mutex<Vec<(String, String, bool)>>>,
}

impl StaticAuth {
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn refuse(status: u16) -> Self {
        Self {
            refuse_with: Some(status),
            ..Self::default()
        }
    }

    /// `(namespace, name, deleting)` per call.
    pub fn calls(&self) -> Vec<(String, String, bool)> {
        self.calls.lock().expect("auth calls").clone()
    }
}

#[async_trait]
impl TriggerAuth for StaticAuth {
    async fn verify(
        &self,
        namespace: &str,
        name: &str,
        _apikey: &str,
        deleting: bool,
    ) -> Result<(), AuthError> {
        self.calls
            .lock()
            .expect("auth calls")
            .push((namespace.to_string(), name.to_string(), deleting));
        match self.refuse_with {
            Some(status) => Err(AuthError::Rejected { status }),
            None => Ok(()),
        }
    }
}
