use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::oneshot;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::consumer::{BindState, BindingKey, DecodeMode, Delivery};
use crate::message::{ContentType, CorrelationId, InboundMessage, Message};
use crate::session::{Session, SessionEvent, SessionOptions, SessionProperties};
use crate::transport::message::{ClientFrame, ServerFrame};
use crate::transport::websocket::websocket_url;
use crate::transport::{
    Connector, Envelope, EventEmitter, Transport, TransportError, TransportEvent, WsConnector,
};

type ServerSocket = WebSocketStream<TcpStream>;

/// Starts a one-connection WebSocket server that runs `script` against the
/// accepted client and returns the address to dial.
async fn scripted_server<F, Fut>(script: F) -> String
where
    F: FnOnce(ServerSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("WebSocket handshake failed");
        script(ws).await;
    });
    format!("ws://{addr}")
}

async fn recv_frame(ws: &mut ServerSocket) -> Option<ClientFrame> {
    while let Some(Ok(msg)) = ws.next().await {
        if msg.is_text() {
            let text = msg.to_text().unwrap();
            return Some(serde_json::from_str(text).unwrap_or_else(|e| {
                panic!("Failed to deserialize ClientFrame from '{text}': {e}")
            }));
        }
        if msg.is_close() {
            return None;
        }
    }
    None
}

async fn send_frame(ws: &mut ServerSocket, frame: ServerFrame) {
    ws.send(WsMessage::text(serde_json::to_string(&frame).unwrap()))
        .await
        .expect("Failed to send server frame");
}

/// Accepts the login and hands the socket to the rest of the script.
async fn accept_login(ws: &mut ServerSocket) {
    match recv_frame(ws).await {
        Some(ClientFrame::Login { username, .. }) => assert_eq!(username, "admin"),
        other => panic!("Expected Login, got {other:?}"),
    }
    send_frame(ws, ServerFrame::LoginOk).await;
}

fn start(address: &str) -> (Box<dyn Transport>, UnboundedReceiver<Envelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let properties = SessionProperties::new(address, "default", "admin", "admin");
    let mut transport = WsConnector
        .open(&properties, EventEmitter::new(1, tx))
        .unwrap();
    transport.connect().unwrap();
    (transport, rx)
}

async fn next_envelope(rx: &mut UnboundedReceiver<Envelope>) -> Envelope {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
}

async fn next_event(rx: &mut UnboundedReceiver<Envelope>) -> TransportEvent {
    next_envelope(rx).await.event
}

#[tokio::test]
async fn test_login_success_emits_up() {
    let address = scripted_server(|mut ws| async move {
        accept_login(&mut ws).await;
        let _ = recv_frame(&mut ws).await;
    })
    .await;

    let (_transport, mut rx) = start(&address);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Up);
}

#[tokio::test]
async fn test_login_failure_emits_connect_failed() {
    let address = scripted_server(|mut ws| async move {
        let _ = recv_frame(&mut ws).await;
        send_frame(
            &mut ws,
            ServerFrame::LoginFailed {
                reason: "bad credentials".to_string(),
            },
        )
        .await;
    })
    .await;

    let (_transport, mut rx) = start(&address);
    assert_eq!(
        next_event(&mut rx).await,
        TransportEvent::ConnectFailed {
            reason: "bad credentials".to_string()
        }
    );
}

#[tokio::test]
async fn test_unreachable_broker_emits_connect_failed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (_transport, mut rx) = start(&format!("ws://{addr}"));
    assert!(matches!(
        next_event(&mut rx).await,
        TransportEvent::ConnectFailed { .. }
    ));
}

#[tokio::test]
async fn test_publish_is_acknowledged() {
    let address = scripted_server(|mut ws| async move {
        accept_login(&mut ws).await;
        match recv_frame(&mut ws).await {
            Some(ClientFrame::Publish {
                correlation_id: Some(correlation_id),
                topic,
                payload,
                ..
            }) => {
                assert_eq!(topic, "tutorial/topic");
                assert_eq!(payload, b"Sample Message");
                send_frame(&mut ws, ServerFrame::Acknowledged { correlation_id }).await;
            }
            other => panic!("Expected Publish, got {other:?}"),
        }
        let _ = recv_frame(&mut ws).await;
    })
    .await;

    let (mut transport, mut rx) = start(&address);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Up);

    let message = Message::persistent("tutorial/topic", b"Sample Message".to_vec(), ContentType::Binary)
        .with_correlation_id(CorrelationId::new(1));
    transport.send(&message).unwrap();
    assert_eq!(
        next_event(&mut rx).await,
        TransportEvent::Acknowledged {
            correlation_id: CorrelationId::new(1)
        }
    );
}

#[tokio::test]
async fn test_bound_endpoint_receives_messages_and_sends_acks() {
    let (acked_tx, acked_rx) = oneshot::channel();
    let address = scripted_server(|mut ws| async move {
        accept_login(&mut ws).await;
        let Some(ClientFrame::Bind {
            endpoint,
            subscription,
        }) = recv_frame(&mut ws).await
        else {
            panic!("Expected Bind");
        };
        send_frame(
            &mut ws,
            ServerFrame::BindOk {
                endpoint: endpoint.clone(),
                subscription: subscription.clone(),
            },
        )
        .await;
        send_frame(
            &mut ws,
            ServerFrame::Message {
                endpoint,
                subscription,
                message_id: "m-1".to_string(),
                topic: "tutorial/topic".to_string(),
                payload: b"hello".to_vec(),
                content_type: ContentType::Text,
            },
        )
        .await;
        let _ = acked_tx.send(recv_frame(&mut ws).await);
        let _ = recv_frame(&mut ws).await;
    })
    .await;

    let (mut transport, mut rx) = start(&address);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Up);

    let key = BindingKey::new("tutorial/dte", "tutorial/topic");
    transport.bind(&key).unwrap();
    assert_eq!(
        next_event(&mut rx).await,
        TransportEvent::BindUp {
            binding: key.clone()
        }
    );
    assert_eq!(
        next_event(&mut rx).await,
        TransportEvent::Message {
            binding: key.clone(),
            message_id: "m-1".to_string(),
            message: InboundMessage::new("tutorial/topic", b"hello".to_vec())
                .with_content_type(ContentType::Text),
        }
    );

    transport.ack(&key, "m-1").unwrap();
    let ack = tokio::time::timeout(Duration::from_secs(5), acked_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        ack,
        Some(ClientFrame::Ack {
            endpoint: "tutorial/dte".to_string(),
            message_id: "m-1".to_string(),
        })
    );
}

#[tokio::test]
async fn test_delivery_after_unbind_is_not_acknowledged() {
    let (next_tx, next_rx) = oneshot::channel();
    let address = scripted_server(|mut ws| async move {
        accept_login(&mut ws).await;
        let Some(ClientFrame::Bind {
            endpoint,
            subscription,
        }) = recv_frame(&mut ws).await
        else {
            panic!("Expected Bind");
        };
        send_frame(
            &mut ws,
            ServerFrame::BindOk {
                endpoint: endpoint.clone(),
                subscription: subscription.clone(),
            },
        )
        .await;
        match recv_frame(&mut ws).await {
            Some(ClientFrame::Unbind { .. }) => {}
            other => panic!("Expected Unbind, got {other:?}"),
        }
        send_frame(
            &mut ws,
            ServerFrame::Message {
                endpoint,
                subscription,
                message_id: "m1".to_string(),
                topic: "tutorial/topic".to_string(),
                payload: b"in flight".to_vec(),
                content_type: ContentType::Text,
            },
        )
        .await;
        // the client closes without settling m1
        let _ = next_tx.send(recv_frame(&mut ws).await);
    })
    .await;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (observer, _observed) = mpsc::unbounded_channel::<SessionEvent>();
    let mut session = Session::new(
        Box::new(WsConnector),
        events_tx,
        Box::new(observer),
        SessionOptions::default(),
    );
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    session
        .connect(SessionProperties::new(&address, "default", "admin", "admin"))
        .unwrap();
    session.dispatch(next_envelope(&mut events_rx).await);
    session
        .start_consume(
            "tutorial/dte",
            "tutorial/topic",
            DecodeMode::Auto,
            move |delivery: Delivery| sink.lock().unwrap().push(delivery),
        )
        .unwrap();
    session.dispatch(next_envelope(&mut events_rx).await);
    assert_eq!(
        session.binding_state("tutorial/dte", "tutorial/topic"),
        BindState::Bound
    );

    session.stop_consume("tutorial/dte", "tutorial/topic").unwrap();
    let envelope = next_envelope(&mut events_rx).await;
    assert!(matches!(envelope.event, TransportEvent::Message { .. }));
    session.dispatch(envelope);
    assert!(received.lock().unwrap().is_empty());

    session.disconnect();
    let next = tokio::time::timeout(Duration::from_secs(5), next_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next, None);
}

#[tokio::test]
async fn test_secure_address_starts_tls_handshake() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (first_tx, first_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut first = [0u8; 1];
        let read = stream.read_exact(&mut first).await.map(|_| first[0]);
        let _ = first_tx.send(read.ok());
    });

    let (_transport, mut rx) = start(&format!("wss://{addr}"));
    let first = tokio::time::timeout(Duration::from_secs(5), first_rx)
        .await
        .unwrap()
        .unwrap();
    // 0x16 opens a TLS handshake record (ClientHello)
    assert_eq!(first, Some(0x16));

    match next_event(&mut rx).await {
        TransportEvent::ConnectFailed { reason } => {
            assert!(!reason.contains("not compiled in"), "{reason}")
        }
        other => panic!("Expected ConnectFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_close_emits_disconnected() {
    let address = scripted_server(|mut ws| async move {
        accept_login(&mut ws).await;
        let _ = ws.close(None).await;
    })
    .await;

    let (_transport, mut rx) = start(&address);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Up);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Disconnected);
}

#[tokio::test]
async fn test_disconnect_closes_connection() {
    let (closed_tx, closed_rx) = oneshot::channel();
    let address = scripted_server(|mut ws| async move {
        accept_login(&mut ws).await;
        let _ = closed_tx.send(recv_frame(&mut ws).await.is_none());
    })
    .await;

    let (mut transport, mut rx) = start(&address);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Up);
    transport.disconnect().unwrap();
    assert_eq!(next_event(&mut rx).await, TransportEvent::Disconnected);
    assert!(closed_rx.await.unwrap());
}

#[tokio::test]
async fn test_connect_twice_is_refused() {
    let address = scripted_server(|mut ws| async move {
        accept_login(&mut ws).await;
        let _ = recv_frame(&mut ws).await;
    })
    .await;

    let (mut transport, _rx) = start(&address);
    assert!(matches!(
        transport.connect(),
        Err(TransportError::AlreadyStarted)
    ));
}

#[test]
fn test_connect_outside_runtime_fails() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let properties = SessionProperties::new("ws://127.0.0.1:1", "default", "admin", "admin");
    let mut transport = WsConnector
        .open(&properties, EventEmitter::new(1, tx))
        .unwrap();
    assert!(matches!(
        transport.connect(),
        Err(TransportError::Runtime(_))
    ));
}

#[test]
fn test_websocket_url_rewrites_http_schemes() {
    assert_eq!(
        websocket_url("http://broker:8008").unwrap().as_str(),
        "ws://broker:8008/"
    );
    assert_eq!(
        websocket_url("https://broker").unwrap().scheme(),
        "wss"
    );
    assert_eq!(
        websocket_url("ws://broker:8008").unwrap().as_str(),
        "ws://broker:8008/"
    );
    assert!(matches!(
        websocket_url("tcp://broker:55555"),
        Err(TransportError::InvalidAddress(_))
    ));
    assert!(matches!(
        websocket_url("not a url"),
        Err(TransportError::InvalidAddress(_))
    ));
}
