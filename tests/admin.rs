#[path = "common/mod.rs"]
mod common;

use amqp_feed::admin::{CreateTriggerRequest, TriggerAdmin};
use amqp_feed::config::FeedConfig;
use amqp_feed::domain::ConnectionOptions;
use amqp_feed::retry::RetryPolicy;
use amqp_feed::store::{
    DisableOutcome, MemoryDocumentStore, ReasonKind, TriggerError, TriggerStore, TriggerUpdate,
};
use amqp_feed::transport::{InboundMessage, TransportEvent};
use amqp_feed::FeedProvider;
use common::mocks::{DeliveryProbe, MockTransport, ScriptedEndpoint, StaticAuth};
use common::{trigger_id, wait_for_condition, APIKEY};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn admin(auth: &StaticAuth) -> TriggerAdmin {
    let store = TriggerStore::new(
        Arc::new(MemoryDocumentStore::new()),
        RetryPolicy::new(5, Duration::from_millis(10)),
    );
    TriggerAdmin::new(
        Arc::new(auth.clone()),
        Arc::new(store),
        vec!["worker0".to_string()],
    )
}

fn create_request(name: &str) -> CreateTriggerRequest {
    CreateTriggerRequest {
        trigger_name: name.to_string(),
        auth_key: APIKEY.to_string(),
        address: Some("orders-queue".to_string()),
        connection: Some(ConnectionOptions::for_host("broker")),
        payload: Some(json!({"source": "amqp"})),
        ..CreateTriggerRequest::default()
    }
}

#[tokio::test]
async fn trigger_lifecycle_through_admin() {
    let auth = StaticAuth::allow();
    let admin = admin(&auth);

    let created = admin.create_trigger(create_request("/guest/orders")).await.unwrap();
    assert_eq!(created.id, trigger_id("orders").as_str());

    let view = admin.get_trigger("/guest/orders", APIKEY).await.unwrap();
    assert_eq!(view.config["address"], "orders-queue");
    assert_eq!(view.config["payload"], json!({"source": "amqp"}));
    assert_eq!(view.status["active"], true);

    let updated = admin
        .update_trigger(
            "/guest/orders",
            APIKEY,
            TriggerUpdate {
                credit: Some(50),
                ..TriggerUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.credit, 50);

    admin.delete_trigger("/guest/orders", APIKEY).await.unwrap();
    let err = admin.get_trigger("/guest/orders", APIKEY).await.unwrap_err();
    assert_eq!(err.status_code(), 404);

    let calls = auth.calls();
    assert_eq!(calls.len(), 5);
    assert!(calls.iter().all(|(namespace, name, _)| namespace == "guest" && name == "orders"));
    assert!(calls[3].2);
}

#[tokio::test]
async fn bare_names_use_the_default_namespace() {
    let auth = StaticAuth::allow();
    let admin = admin(&auth);

    let created = admin.create_trigger(create_request("orders")).await.unwrap();

    assert_eq!(created.namespace, "_");
    assert_eq!(auth.calls()[0].0, "_");
}

#[tokio::test]
async fn missing_auth_key_is_a_bad_request() {
    let auth = StaticAuth::allow();
    let admin = admin(&auth);

    let err = admin
        .create_trigger(CreateTriggerRequest {
            auth_key: String::new(),
            ..create_request("/guest/orders")
        })
        .await
        .unwrap_err();

    assert!(matches!(err, TriggerError::BadRequest(_)));
    assert!(auth.calls().is_empty());
}

#[tokio::test]
async fn refused_caller_never_reaches_the_store() {
    let auth = StaticAuth::refuse(403);
    let admin = admin(&auth);

    let err = admin
        .create_trigger(create_request("/guest/orders"))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 403);
    assert!(admin.store().get(&trigger_id("orders")).await.is_err());
}

#[tokio::test]
async fn create_request_deserializes_camel_case() {
    let request: CreateTriggerRequest = serde_json::from_value(json!({
        "triggerName": "/guest/orders",
        "authKey": APIKEY,
        "address": "orders-queue",
        "connection": {"host": "broker", "port": 5673},
        "credit": 5,
        "maxTriggers": 100
    }))
    .unwrap();

    assert_eq!(request.trigger_name, "/guest/orders");
    assert_eq!(request.credit, Some(5));
    assert_eq!(request.max_triggers, Some(100));
    assert_eq!(request.connection.unwrap().port(), 5673);
}

#[tokio::test]
async fn provider_runs_stored_triggers() {
    let transport = MockTransport::default();
    let endpoint = ScriptedEndpoint::default();
    let provider = FeedProvider::with_parts(
        FeedConfig::default(),
        transport.clone(),
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(endpoint.clone()),
        Arc::new(StaticAuth::allow()),
    );

    let document = provider
        .admin()
        .create_trigger(create_request("/guest/orders"))
        .await
        .unwrap();

    let opening = {
        let transport = transport.clone();
        tokio::spawn(async move {
            assert!(wait_for_condition(WAIT, || !transport.receivers().is_empty()).await);
            let link = transport.last_receiver().link;
            transport.emit(TransportEvent::ReceiverOpened { link });
            link
        })
    };
    provider.create_receiver(&document).await.unwrap();
    let link = opening.await.unwrap();

    let stats = provider.stats().await.unwrap();
    assert_eq!(stats.triggers, 1);
    assert_eq!(stats.connections, 1);

    let probe = DeliveryProbe::default();
    transport.emit(TransportEvent::Message {
        link,
        message: InboundMessage::new(br#"{"order": 1}"#.to_vec()),
        delivery: probe.delivery(),
    });
    assert!(wait_for_condition(WAIT, || probe.accepted() == 1).await);
    assert_eq!(endpoint.bodies(), vec![json!({"body": {"order": 1}})]);

    let outcome = provider
        .disable_trigger(&document.trigger_id(), "maintenance")
        .await
        .unwrap();
    assert_eq!(outcome, DisableOutcome::Disabled);
    assert!(provider.delete_receiver(&document.trigger_id()).await.unwrap());
    assert_eq!(provider.stats().await.unwrap().triggers, 0);

    provider.shutdown().await.unwrap();
}

#[tokio::test]
async fn link_error_auto_disables_until_the_next_update() {
    let transport = MockTransport::default();
    let endpoint = ScriptedEndpoint::default();
    let provider = FeedProvider::with_parts(
        FeedConfig::default(),
        transport.clone(),
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(endpoint.clone()),
        Arc::new(StaticAuth::allow()),
    );

    let document = provider
        .admin()
        .create_trigger(create_request("/guest/orders"))
        .await
        .unwrap();
    assert!(document.status.active);
    assert!(document.status.reason.is_none());

    let opening = {
        let transport = transport.clone();
        tokio::spawn(async move {
            assert!(wait_for_condition(WAIT, || !transport.receivers().is_empty()).await);
            let link = transport.last_receiver().link;
            transport.emit(TransportEvent::ReceiverOpened { link });
            link
        })
    };
    provider.create_receiver(&document).await.unwrap();
    let link = opening.await.unwrap();

    transport.emit(TransportEvent::ReceiverError {
        link,
        error: "amqp:not-found".to_string(),
    });

    let id = document.trigger_id();
    let mut disabled = None;
    for _ in 0..500 {
        let current = provider.store().get(&id).await.unwrap();
        if !current.status.active {
            disabled = Some(current);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let disabled = disabled.expect("trigger disabled after link error");
    let reason = disabled.status.reason.expect("disable reason");
    assert_eq!(reason.kind, ReasonKind::Auto);
    assert_eq!(provider.stats().await.unwrap().triggers, 0);
    assert!(wait_for_condition(WAIT, || !endpoint.bodies().is_empty()).await);
    assert_eq!(endpoint.bodies()[0]["type"], "feed_error");

    let updated = provider
        .admin()
        .update_trigger(
            "/guest/orders",
            APIKEY,
            TriggerUpdate {
                credit: Some(20),
                ..TriggerUpdate::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.status.active);
    assert!(updated.status.reason.is_none());
    assert_eq!(updated.credit, 20);

    provider.shutdown().await.unwrap();
}
