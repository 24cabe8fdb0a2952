//! WebSocket transport
//!
//! This file implements the client side of the JSON frame protocol in
//! `transport::message`. Responsibilities:
//! - Dial the broker and perform the login handshake (`login` -> `login_ok`)
//! - Forward publish/bind/unbind requests from the session as frames
//! - Turn broker frames into `TransportEvent`s for the session
//! - Acknowledge a delivery once the session has handed it to a bound consumer
//!
//! Each connect cycle runs one background task that owns the socket. The
//! `Transport` handle only talks to that task through a command channel, so
//! none of its methods block. Dropping the handle closes the channel, which
//! closes the socket.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;
use url::Url;
use uuid::Uuid;

use crate::consumer::BindingKey;
use crate::message::Message;
use crate::session::SessionProperties;
use crate::transport::message::{ClientFrame, ServerFrame};
use crate::transport::{Connector, EventEmitter, Transport, TransportError, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

/// Rewrites a session address into the WebSocket URL to dial.
///
/// `http` and `https` addresses are dialled as `ws` and `wss`.
pub fn websocket_url(address: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(address)
        .map_err(|e| TransportError::InvalidAddress(format!("{address}: {e}")))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(TransportError::InvalidAddress(format!(
                "unsupported scheme '{other}' in {address}"
            )));
        }
    };
    if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
        return Err(TransportError::InvalidAddress(format!(
            "cannot dial {address} as {scheme}"
        )));
    }
    Ok(url)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(
        &mut self,
        properties: &SessionProperties,
        events: EventEmitter,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let url = websocket_url(&properties.address)?;
        let login = ClientFrame::Login {
            namespace: properties.namespace.clone(),
            username: properties.username.clone(),
            password: properties.password.clone(),
            client_name: format!("durasub-{}", Uuid::new_v4()),
        };
        let (commands, receiver) = mpsc::unbounded_channel();
        Ok(Box::new(WsTransport {
            url,
            startup: Some((login, receiver)),
            commands,
            events,
        }))
    }
}

#[derive(Debug)]
enum Command {
    Frame(ClientFrame),
    Close,
}

struct WsTransport {
    url: Url,
    startup: Option<(ClientFrame, UnboundedReceiver<Command>)>,
    commands: UnboundedSender<Command>,
    events: EventEmitter,
}

impl WsTransport {
    fn command(&self, command: Command) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .map_err(|_| TransportError::Closed)
    }
}

impl Transport for WsTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Runtime(e.to_string()))?;
        let (login, commands) = self.startup.take().ok_or(TransportError::AlreadyStarted)?;
        runtime.spawn(run_connection(
            self.url.clone(),
            login,
            commands,
            self.events.clone(),
        ));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.command(Command::Close)
    }

    fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        self.command(Command::Frame(ClientFrame::publish(message)))
    }

    fn bind(&mut self, binding: &BindingKey) -> Result<(), TransportError> {
        self.command(Command::Frame(ClientFrame::bind(binding)))
    }

    fn unbind(&mut self, binding: &BindingKey) -> Result<(), TransportError> {
        self.command(Command::Frame(ClientFrame::unbind(binding)))
    }

    fn ack(&mut self, binding: &BindingKey, message_id: &str) -> Result<(), TransportError> {
        self.command(Command::Frame(ClientFrame::ack(binding, message_id)))
    }
}

async fn run_connection(
    url: Url,
    login: ClientFrame,
    mut commands: UnboundedReceiver<Command>,
    events: EventEmitter,
) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!(%url, "connection failed: {e}");
            events.emit(TransportEvent::ConnectFailed {
                reason: e.to_string(),
            });
            return;
        }
    };
    let (mut sink, mut source) = stream.split();

    if let Err(reason) = handshake(&mut sink, &mut source, &login).await {
        warn!(%url, "login refused: {reason}");
        let _ = sink.close().await;
        events.emit(TransportEvent::ConnectFailed { reason });
        return;
    }
    info!(%url, "session established");
    events.emit(TransportEvent::Up);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Frame(frame)) => {
                    if let Err(e) = send_frame(&mut sink, &frame).await {
                        warn!(%url, "failed to send frame: {e}");
                        break;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(msg)) if msg.is_text() => {
                    if let Ok(text) = msg.to_text() {
                        handle_text(text, &events);
                    }
                }
                Some(Ok(msg)) if msg.is_close() => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(%url, "connection error: {e}");
                    break;
                }
                None => break,
            },
        }
    }

    debug!(%url, "connection task finished");
    events.emit(TransportEvent::Disconnected);
}

async fn handshake(
    sink: &mut WsSink,
    source: &mut WsSource,
    login: &ClientFrame,
) -> Result<(), String> {
    send_frame(sink, login).await.map_err(|e| e.to_string())?;

    while let Some(incoming) = source.next().await {
        let msg = incoming.map_err(|e| e.to_string())?;
        if msg.is_close() {
            break;
        }
        if !msg.is_text() {
            continue;
        }
        let text = msg.to_text().map_err(|e| e.to_string())?;
        match serde_json::from_str::<ServerFrame>(text) {
            Ok(ServerFrame::LoginOk) => return Ok(()),
            Ok(ServerFrame::LoginFailed { reason }) => return Err(reason),
            Ok(ServerFrame::Error { message }) => return Err(message),
            Ok(other) => debug!(frame = ?other, "ignoring frame received before login completed"),
            Err(e) => return Err(format!("invalid login response: {e}")),
        }
    }

    Err("connection closed during login".to_string())
}

fn handle_text(text: &str, events: &EventEmitter) {
    let frame = match serde_json::from_str::<ServerFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(
                "invalid server frame: {e} | {}",
                text.chars().take(100).collect::<String>()
            );
            return;
        }
    };

    match frame {
        ServerFrame::Error { message } => warn!("broker error: {message}"),
        frame => match frame.into_event() {
            Some(event) => {
                events.emit(event);
            }
            None => debug!("ignoring unexpected login frame"),
        },
    }
}

async fn send_frame(sink: &mut WsSink, frame: &ClientFrame) -> Result<(), TransportError> {
    let text = serde_json::to_string(frame)?;
    sink.send(WsMessage::text(text))
        .await
        .map_err(|e| TransportError::WebSocket(e.to_string()))
}
