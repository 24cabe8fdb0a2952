use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};

use super::*;
use crate::consumer::{BindingKey, Body, Delivery};
use crate::message::{ContentType, Message};
use crate::publisher::{AbandonReason, DeliveryOutcome};
use crate::session::SessionEvent;
use crate::transport::{EventEmitter, LoopbackBroker, Transport, TransportError, TransportEvent};

const ENDPOINT: &str = "tutorial/dte";
const SUBSCRIPTION: &str = "tutorial/topic";

fn props() -> SessionProperties {
    SessionProperties::new("ws://localhost:8008", "default", "admin", "admin")
}

fn client(
    connector: impl Connector + 'static,
    options: ClientOptions,
) -> (Client, UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Client::spawn(connector, tx, options), rx)
}

async fn wait_for<F>(rx: &mut UnboundedReceiver<SessionEvent>, mut predicate: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = rx.recv().await {
            if predicate(&event) {
                return event;
            }
        }
        panic!("observer channel closed")
    })
    .await
    .expect("timed out waiting for session event")
}

async fn wait_for_state(rx: &mut UnboundedReceiver<SessionEvent>, state: SessionState) {
    wait_for(rx, |event| {
        matches!(event, SessionEvent::StateChanged { to, .. } if *to == state)
    })
    .await;
}

async fn wait_for_outcome(rx: &mut UnboundedReceiver<SessionEvent>, id: CorrelationId) -> DeliveryOutcome {
    match wait_for(rx, |event| {
        matches!(event, SessionEvent::Outcome { correlation_id, .. } if *correlation_id == id)
    })
    .await
    {
        SessionEvent::Outcome { outcome, .. } => outcome,
        _ => unreachable!(),
    }
}

async fn connected(
    connector: impl Connector + 'static,
    options: ClientOptions,
) -> (Client, UnboundedReceiver<SessionEvent>) {
    let (client, mut rx) = client(connector, options);
    client.connect(props()).unwrap();
    wait_for_state(&mut rx, SessionState::Connected).await;
    (client, rx)
}

async fn bound_consumer(
    broker: &LoopbackBroker,
) -> (Client, UnboundedReceiver<SessionEvent>, UnboundedReceiver<Delivery>) {
    let (client, mut rx) = connected(broker.connector(), ClientOptions::default()).await;
    let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
    client
        .start_consume(ENDPOINT, SUBSCRIPTION, DecodeMode::Auto, move |delivery: Delivery| {
            let _ = deliveries_tx.send(delivery);
        })
        .unwrap();
    wait_for(&mut rx, |event| matches!(event, SessionEvent::BindingUp { .. })).await;
    (client, rx, deliveries_rx)
}

async fn next_delivery(rx: &mut UnboundedReceiver<Delivery>) -> Delivery {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("delivery channel closed")
}

/// Accepts everything and never answers a publish.
struct SilentConnector;

struct SilentTransport {
    events: EventEmitter,
}

impl Connector for SilentConnector {
    fn open(
        &mut self,
        _properties: &SessionProperties,
        events: EventEmitter,
    ) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(SilentTransport { events }))
    }
}

impl Transport for SilentTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.events.emit(TransportEvent::Up);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.events.emit(TransportEvent::Disconnected);
        Ok(())
    }

    fn send(&mut self, _message: &Message) -> Result<(), TransportError> {
        Ok(())
    }

    fn bind(&mut self, _binding: &BindingKey) -> Result<(), TransportError> {
        Ok(())
    }

    fn unbind(&mut self, _binding: &BindingKey) -> Result<(), TransportError> {
        Ok(())
    }

    fn ack(&mut self, _binding: &BindingKey, _message_id: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_published_message_reaches_bound_consumer() {
    let broker = LoopbackBroker::new();
    broker.provision_endpoint(ENDPOINT);
    let (_consumer, _consumer_events, mut deliveries) = bound_consumer(&broker).await;
    let (publisher, mut publisher_events) =
        connected(broker.connector(), ClientOptions::default()).await;

    let payload = vec![0u8, 159, 146, 150, 255];
    let id = publisher.publish(SUBSCRIPTION, payload.clone()).unwrap();
    assert_eq!(
        wait_for_outcome(&mut publisher_events, id).await,
        DeliveryOutcome::Delivered
    );

    let delivery = next_delivery(&mut deliveries).await;
    assert_eq!(delivery.topic, SUBSCRIPTION);
    assert_eq!(delivery.payload, payload);
    assert_eq!(delivery.body, Body::Binary);
    assert_eq!(publisher.pending(), 0);
}

#[tokio::test]
async fn test_text_message_is_decoded() {
    let broker = LoopbackBroker::new();
    broker.provision_endpoint(ENDPOINT);
    let (_consumer, _consumer_events, mut deliveries) = bound_consumer(&broker).await;
    let (publisher, _publisher_events) =
        connected(broker.connector(), ClientOptions::default()).await;

    publisher.publish_text(SUBSCRIPTION, "Sample Message").unwrap();
    let delivery = next_delivery(&mut deliveries).await;
    assert_eq!(delivery.content_type, ContentType::Text);
    assert_eq!(delivery.body, Body::Text("Sample Message".to_string()));
}

#[tokio::test]
async fn test_messages_survive_while_consumer_is_stopped() {
    let broker = LoopbackBroker::new();
    broker.provision_endpoint(ENDPOINT);
    let (consumer, mut consumer_events, _first_deliveries) = bound_consumer(&broker).await;
    consumer.stop_consume(ENDPOINT, SUBSCRIPTION).unwrap();
    assert_eq!(consumer.binding_state(ENDPOINT, SUBSCRIPTION), BindState::Unbound);

    let (publisher, mut publisher_events) =
        connected(broker.connector(), ClientOptions::default()).await;
    for n in 0..3 {
        let id = publisher
            .publish(SUBSCRIPTION, format!("message {n}").into_bytes())
            .unwrap();
        assert!(wait_for_outcome(&mut publisher_events, id).await.is_delivered());
    }
    assert_eq!(broker.spooled(ENDPOINT), 3);

    let (deliveries_tx, mut deliveries) = mpsc::unbounded_channel();
    consumer
        .start_consume(ENDPOINT, SUBSCRIPTION, DecodeMode::Raw, move |delivery: Delivery| {
            let _ = deliveries_tx.send(delivery);
        })
        .unwrap();
    wait_for(&mut consumer_events, |event| {
        matches!(event, SessionEvent::BindingUp { .. })
    })
    .await;

    for n in 0..3 {
        let delivery = next_delivery(&mut deliveries).await;
        assert_eq!(delivery.payload, format!("message {n}").into_bytes());
    }
    assert_eq!(broker.spooled(ENDPOINT), 0);
}

#[tokio::test]
async fn test_bind_to_unprovisioned_endpoint_fails() {
    let broker = LoopbackBroker::new();
    let (client, mut rx) = connected(broker.connector(), ClientOptions::default()).await;

    client
        .start_consume(ENDPOINT, SUBSCRIPTION, DecodeMode::Auto, |_: Delivery| {})
        .unwrap();
    let event = wait_for(&mut rx, |event| matches!(event, SessionEvent::Failure(_))).await;
    assert!(matches!(
        event,
        SessionEvent::Failure(Error::BindError { endpoint, .. }) if endpoint == ENDPOINT
    ));
    assert_eq!(
        client.binding_state(ENDPOINT, SUBSCRIPTION),
        BindState::BindFailed
    );
}

#[tokio::test]
async fn test_rejected_publish_reports_rejection() {
    let broker = LoopbackBroker::new();
    broker.reject_topics("restricted/>", "permission denied");
    let (client, mut rx) = connected(broker.connector(), ClientOptions::default()).await;

    let id = client.publish("restricted/area", b"x".to_vec()).unwrap();
    assert_eq!(
        wait_for_outcome(&mut rx, id).await,
        DeliveryOutcome::Rejected {
            info: "permission denied".to_string()
        }
    );
}

#[tokio::test]
async fn test_login_failure_reports_connection_error() {
    let broker = LoopbackBroker::new();
    broker.fail_logins(Some("unknown user"));
    let (client, mut rx) = client(broker.connector(), ClientOptions::default());

    client.connect(props()).unwrap();
    let event = wait_for(&mut rx, |event| matches!(event, SessionEvent::Failure(_))).await;
    assert!(matches!(
        event,
        SessionEvent::Failure(Error::ConnectionError { reason }) if reason == "unknown user"
    ));
    wait_for_state(&mut rx, SessionState::Disconnected).await;
    assert!(matches!(
        client.publish(SUBSCRIPTION, b"x".to_vec()),
        Err(Error::NotConnected)
    ));
}

#[tokio::test]
async fn test_unacknowledged_message_times_out() {
    let options = ClientOptions {
        ack_timeout: Some(Duration::from_millis(50)),
        sweep_interval: Duration::from_millis(10),
    };
    let (client, mut rx) = connected(SilentConnector, options).await;

    let id = client.publish(SUBSCRIPTION, b"x".to_vec()).unwrap();
    assert_eq!(
        wait_for_outcome(&mut rx, id).await,
        DeliveryOutcome::Abandoned {
            reason: AbandonReason::TimedOut
        }
    );
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn test_disconnect_abandons_pending_messages() {
    let (client, mut rx) = connected(SilentConnector, ClientOptions::default()).await;
    let id = client.publish(SUBSCRIPTION, b"x".to_vec()).unwrap();

    client.disconnect();
    assert_eq!(
        wait_for_outcome(&mut rx, id).await,
        DeliveryOutcome::Abandoned {
            reason: AbandonReason::SessionClosed
        }
    );
    wait_for_state(&mut rx, SessionState::Disconnected).await;
    assert_eq!(client.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let broker = LoopbackBroker::new();
    let (client, mut rx) = connected(broker.connector(), ClientOptions::default()).await;

    client.disconnect();
    wait_for_state(&mut rx, SessionState::Disconnected).await;

    client.connect(props()).unwrap();
    wait_for_state(&mut rx, SessionState::Connected).await;
    let id = client.publish(SUBSCRIPTION, b"again".to_vec()).unwrap();
    assert!(wait_for_outcome(&mut rx, id).await.is_delivered());
}

#[tokio::test]
async fn test_dropping_client_abandons_pending_messages() {
    let (client, mut rx) = connected(SilentConnector, ClientOptions::default()).await;
    let id = client.publish(SUBSCRIPTION, b"x".to_vec()).unwrap();

    drop(client);
    assert_eq!(
        wait_for_outcome(&mut rx, id).await,
        DeliveryOutcome::Abandoned {
            reason: AbandonReason::SessionClosed
        }
    );
}

#[tokio::test]
async fn test_consumed_messages_are_settled_on_the_broker() {
    let broker = LoopbackBroker::new();
    broker.provision_endpoint(ENDPOINT);
    let (_consumer, _consumer_events, mut deliveries) = bound_consumer(&broker).await;
    let (publisher, _publisher_events) =
        connected(broker.connector(), ClientOptions::default()).await;

    publisher.publish_text(SUBSCRIPTION, "settle me").unwrap();
    next_delivery(&mut deliveries).await;
    assert_eq!(broker.unacked(ENDPOINT), 0);
    assert_eq!(broker.spooled(ENDPOINT), 0);
}
