//! Session
//!
//! The `Session` owns the transport handle, the guaranteed publisher and the
//! durable consumers, and is the single place where transport events are
//! applied. It is a plain synchronous state machine:
//! - user calls (`connect`, `publish`, `start_consume`, ...) validate the
//!   current state, hand work to the transport and return immediately
//! - transport events arrive later through `dispatch` / `handle_event` and
//!   drive the state forward
//! - everything the caller needs to know afterwards goes to the injected
//!   `SessionObserver`
//!
//! Concurrency and usage notes:
//! - All mutation happens through `&mut self`, so a host that shares a session
//!   between tasks keeps it behind one lock (see `client::Client`) and never
//!   holds that lock across I/O.
//! - Every connect cycle gets a new generation number. Events stamped with an
//!   older generation come from a released transport and are discarded.

mod observer;
mod properties;
mod state;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::consumer::{BindState, BindingKey, DecodeMode, DurableConsumer, MessageHandler};
use crate::message::{ContentType, CorrelationId, InboundMessage, topic};
use crate::publisher::{DeliveryOutcome, GuaranteedPublisher};
use crate::transport::{
    Connector, Envelope, EventEmitter, Transport, TransportError, TransportEvent,
};
use crate::utils::Error;

pub use observer::{LogObserver, SessionEvent, SessionObserver};
pub use properties::{SUPPORTED_SCHEMES, SessionProperties};
pub use state::SessionState;

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    /// Abandon guaranteed messages not acknowledged within this time.
    pub ack_timeout: Option<Duration>,
}

pub struct Session {
    state: SessionState,
    properties: Option<SessionProperties>,
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    events: UnboundedSender<Envelope>,
    generation: u64,
    publisher: GuaranteedPublisher,
    consumers: HashMap<BindingKey, DurableConsumer>,
    observer: Box<dyn SessionObserver>,
}

impl Session {
    /// Creates a disconnected session. Transports opened by `connector` report
    /// back through `events`.
    pub fn new(
        connector: Box<dyn Connector>,
        events: UnboundedSender<Envelope>,
        observer: Box<dyn SessionObserver>,
        options: SessionOptions,
    ) -> Self {
        Self {
            state: SessionState::Disconnected,
            properties: None,
            connector,
            transport: None,
            events,
            generation: 0,
            publisher: GuaranteedPublisher::new(options.ack_timeout),
            consumers: HashMap::new(),
            observer,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Properties of the last accepted connect request.
    pub fn properties(&self) -> Option<&SessionProperties> {
        self.properties.as_ref()
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Number of guaranteed messages waiting for an outcome.
    pub fn pending(&self) -> usize {
        self.publisher.pending()
    }

    pub fn is_pending(&self, id: CorrelationId) -> bool {
        self.publisher.tracker().contains(id)
    }

    pub fn binding_state(&self, endpoint: &str, subscription: &str) -> BindState {
        self.consumers
            .get(&BindingKey::new(endpoint, subscription))
            .map_or(BindState::Unbound, DurableConsumer::state)
    }

    /// Opens a transport and starts connecting. The outcome arrives as an
    /// `Up` or `ConnectFailed` event.
    pub fn connect(&mut self, properties: SessionProperties) -> Result<(), Error> {
        match self.state {
            SessionState::Connected | SessionState::Connecting => {
                info!(state = %self.state, "already connected, connect request ignored");
                return Ok(());
            }
            SessionState::Disconnecting => {
                info!("disconnect in progress, connect request ignored");
                return Ok(());
            }
            SessionState::Disconnected => {}
        }

        properties.validate()?;
        info!(
            address = %properties.address,
            namespace = %properties.namespace,
            username = %properties.username,
            "connecting"
        );

        self.generation += 1;
        let emitter = EventEmitter::new(self.generation, self.events.clone());
        self.set_state(SessionState::Connecting);

        let opened = self
            .connector
            .open(&properties, emitter)
            .and_then(|mut transport| {
                transport.connect()?;
                Ok(transport)
            });
        match opened {
            Ok(transport) => {
                self.transport = Some(transport);
                self.properties = Some(properties);
                Ok(())
            }
            Err(e) => {
                warn!("could not open transport: {e}");
                self.set_state(SessionState::Disconnected);
                Err(Error::ConnectionError {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Starts closing the session. Teardown completes on the `Disconnected`
    /// event, or immediately if the transport cannot be asked to close.
    pub fn disconnect(&mut self) {
        match self.state {
            SessionState::Disconnected => info!("not connected, nothing to disconnect"),
            SessionState::Disconnecting => info!("disconnect already in progress"),
            SessionState::Connecting | SessionState::Connected => {
                info!("disconnecting");
                self.set_state(SessionState::Disconnecting);
                let requested = match self.transport.as_mut() {
                    Some(transport) => transport.disconnect().map_err(|e| e.to_string()),
                    None => Err("no transport".to_string()),
                };
                if let Err(reason) = requested {
                    warn!(%reason, "transport cannot disconnect, tearing down locally");
                    self.teardown();
                }
            }
        }
    }

    pub fn publish(
        &mut self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<CorrelationId, Error> {
        self.submit(topic, payload.into(), ContentType::Binary)
    }

    pub fn publish_text(&mut self, topic: &str, text: &str) -> Result<CorrelationId, Error> {
        self.submit(topic, text.as_bytes().to_vec(), ContentType::Text)
    }

    pub fn publish_structured<T>(&mut self, topic: &str, value: &T) -> Result<CorrelationId, Error>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(value).map_err(|e| {
            Error::InvalidArgument(format!("cannot encode structured payload: {e}"))
        })?;
        self.submit(topic, payload, ContentType::Structured)
    }

    fn submit(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        content_type: ContentType,
    ) -> Result<CorrelationId, Error> {
        if !self.state.is_connected() {
            warn!(topic, state = %self.state, "cannot publish, not connected");
            return Err(Error::NotConnected);
        }
        let Some(transport) = self.transport.as_mut() else {
            return Err(Error::NotConnected);
        };
        self.publisher
            .publish(transport.as_mut(), topic, payload, content_type)
    }

    /// Binds the durable `endpoint` to `subscription` and routes its messages
    /// to `handler` once bound.
    pub fn start_consume<H>(
        &mut self,
        endpoint: &str,
        subscription: &str,
        decode: DecodeMode,
        handler: H,
    ) -> Result<(), Error>
    where
        H: MessageHandler + 'static,
    {
        if !self.state.is_connected() {
            warn!(endpoint, state = %self.state, "cannot start consumer, not connected");
            return Err(Error::NotConnected);
        }
        let Some(transport) = self.transport.as_mut() else {
            return Err(Error::NotConnected);
        };
        if endpoint.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "endpoint name must not be empty".to_string(),
            ));
        }
        topic::validate_subscription(subscription)?;

        let key = BindingKey::new(endpoint, subscription);
        if let Some(existing) = self.consumers.get(&key) {
            if existing.state().is_active() {
                info!(binding = %key, state = %existing.state(), "consumer already started");
                return Ok(());
            }
        }

        info!(endpoint, subscription, "starting consumer for durable endpoint");
        let mut consumer = DurableConsumer::new(key.clone(), decode, Box::new(handler));
        let started = consumer.start(transport.as_mut());
        self.consumers.insert(key, consumer);
        started
    }

    /// Unbinds a bound consumer and drops its handler. Fails with `NotBound`
    /// in any other state.
    pub fn stop_consume(&mut self, endpoint: &str, subscription: &str) -> Result<(), Error> {
        let key = BindingKey::new(endpoint, subscription);
        let stopped = match (self.consumers.get_mut(&key), self.transport.as_mut()) {
            (Some(consumer), Some(transport)) => consumer.stop(transport.as_mut()),
            _ => {
                info!(binding = %key, "cannot stop consumer, it is not bound");
                return Err(Error::NotBound {
                    endpoint: endpoint.to_string(),
                });
            }
        };
        if stopped.is_ok() {
            self.consumers.remove(&key);
        }
        stopped
    }

    /// Abandons guaranteed messages older than the ack timeout. Returns how
    /// many were abandoned.
    pub fn expire_pending(&mut self, now: Instant) -> usize {
        let expired = self.publisher.expire(now);
        let count = expired.len();
        for (correlation_id, outcome) in expired {
            self.observer.notify(SessionEvent::Outcome {
                correlation_id,
                outcome,
            });
        }
        count
    }

    /// Applies an event if it belongs to the current connect cycle.
    pub fn dispatch(&mut self, envelope: Envelope) {
        if envelope.generation != self.generation {
            debug!(
                generation = envelope.generation,
                current = self.generation,
                event = ?envelope.event,
                "event from a released transport discarded"
            );
            return;
        }
        self.handle_event(envelope.event);
    }

    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Up => self.on_up(),
            TransportEvent::ConnectFailed { reason } => self.on_connect_failed(reason),
            TransportEvent::Disconnected => self.on_disconnected(),
            TransportEvent::Acknowledged { correlation_id } => {
                self.settle(correlation_id, DeliveryOutcome::Delivered)
            }
            TransportEvent::Rejected {
                correlation_id,
                info,
            } => self.settle(correlation_id, DeliveryOutcome::Rejected { info }),
            TransportEvent::BindUp { binding } => self.on_bind_up(binding),
            TransportEvent::BindFailed { binding, reason } => self.on_bind_failed(binding, reason),
            TransportEvent::Down { binding, reason } => self.on_down(binding, reason),
            TransportEvent::Message {
                binding,
                message_id,
                message,
            } => self.on_message(binding, message_id, message),
        }
    }

    fn on_up(&mut self) {
        if self.state != SessionState::Connecting {
            warn!(state = %self.state, "unexpected session up ignored");
            return;
        }
        self.set_state(SessionState::Connected);
        info!("=== successfully connected ===");
    }

    fn on_connect_failed(&mut self, reason: String) {
        if !matches!(
            self.state,
            SessionState::Connecting | SessionState::Disconnecting
        ) {
            warn!(state = %self.state, %reason, "unexpected connect failure ignored");
            return;
        }
        warn!(%reason, "connection failed, check the session properties and connectivity");
        self.abandon_and_reset();
        self.release_transport();
        self.observer
            .notify(SessionEvent::Failure(Error::ConnectionError { reason }));
        self.set_state(SessionState::Disconnected);
    }

    fn on_disconnected(&mut self) {
        if self.state == SessionState::Disconnected {
            debug!("already disconnected");
            return;
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.state != SessionState::Disconnecting {
            self.set_state(SessionState::Disconnecting);
        }
        self.abandon_and_reset();
        self.release_transport();
        self.set_state(SessionState::Disconnected);
        info!("disconnected");
    }

    fn abandon_and_reset(&mut self) {
        for (correlation_id, outcome) in self.publisher.abandon_all() {
            self.observer.notify(SessionEvent::Outcome {
                correlation_id,
                outcome,
            });
        }
        for (binding, mut consumer) in self.consumers.drain() {
            if consumer.reset() {
                self.observer.notify(SessionEvent::BindingReset { binding });
            }
        }
    }

    fn release_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            drop(transport);
            debug!(generation = self.generation, "transport released");
        }
    }

    fn settle(&mut self, id: CorrelationId, outcome: DeliveryOutcome) {
        if let Some(outcome) = self.publisher.resolve(id, outcome) {
            self.observer.notify(SessionEvent::Outcome {
                correlation_id: id,
                outcome,
            });
        }
    }

    fn on_bind_up(&mut self, binding: BindingKey) {
        match self.consumers.get_mut(&binding) {
            Some(consumer) => {
                if consumer.on_bind_up() {
                    self.observer.notify(SessionEvent::BindingUp { binding });
                }
            }
            None => warn!(%binding, "bind confirmation for unknown consumer ignored"),
        }
    }

    fn on_bind_failed(&mut self, binding: BindingKey, reason: String) {
        match self.consumers.get_mut(&binding) {
            Some(consumer) => {
                if let Some(error) = consumer.on_bind_failed(reason) {
                    self.observer.notify(SessionEvent::Failure(error));
                }
            }
            None => warn!(%binding, %reason, "bind failure for unknown consumer ignored"),
        }
    }

    fn on_down(&mut self, binding: BindingKey, reason: String) {
        match self.consumers.get_mut(&binding) {
            Some(consumer) => {
                if let Some(error) = consumer.on_down(reason) {
                    self.observer.notify(SessionEvent::Failure(error));
                }
            }
            None => warn!(%binding, %reason, "flow down for unknown consumer ignored"),
        }
    }

    /// Hands a delivery to its consumer and acknowledges it once the handler
    /// has it. Anything else is left unacknowledged on the endpoint.
    fn on_message(&mut self, binding: BindingKey, message_id: String, message: InboundMessage) {
        let Some(consumer) = self.consumers.get_mut(&binding) else {
            warn!(%binding, %message_id, topic = %message.topic, "message for unknown consumer left unacknowledged");
            return;
        };
        match consumer.on_message(message) {
            Ok(true) => {
                let acked = match self.transport.as_mut() {
                    Some(transport) => transport.ack(&binding, &message_id),
                    None => Err(TransportError::Closed),
                };
                if let Err(e) = acked {
                    warn!(%binding, %message_id, "could not acknowledge delivery: {e}");
                }
            }
            Ok(false) => debug!(%binding, %message_id, "delivery left unacknowledged"),
            Err(error) => {
                warn!(%binding, %message_id, "{error}");
                self.observer.notify(SessionEvent::Failure(error));
            }
        }
    }

    fn set_state(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        debug!(%from, %to, "session state changed");
        self.observer.notify(SessionEvent::StateChanged { from, to });
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.abandon_and_reset();
        self.release_transport();
    }
}
