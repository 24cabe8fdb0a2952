//! In-process broker with durable topic endpoints.
//!
//! `LoopbackBroker` keeps provisioned endpoints, the subscription each one
//! attracts, a spool of messages that arrived while no consumer was bound, and
//! the deliveries its consumer has not acknowledged yet. Unacknowledged
//! deliveries go back to the front of the spool when the consumer goes away.
//! Every `LoopbackTransport` opened through a `LoopbackConnector` shares the
//! same broker, so a publisher session and a consumer session can talk to each
//! other without a network. Outcomes are emitted synchronously from inside the
//! transport call, on the session's event channel.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::consumer::BindingKey;
use crate::message::{InboundMessage, Message, topic};
use crate::session::SessionProperties;
use crate::transport::{Connector, EventEmitter, Transport, TransportError, TransportEvent};

#[derive(Debug)]
struct Attachment {
    session: u64,
    binding: BindingKey,
    events: EventEmitter,
}

type Stored = (String, InboundMessage);

#[derive(Debug, Default)]
struct Endpoint {
    subscription: Option<String>,
    spool: VecDeque<Stored>,
    in_flight: Vec<Stored>,
    consumer: Option<Attachment>,
    next_message: u64,
}

impl Endpoint {
    fn store(&mut self, name: &str, message: InboundMessage) -> Stored {
        self.next_message += 1;
        (format!("{name}:{}", self.next_message), message)
    }

    fn deliver(&mut self, stored: Stored) {
        let Some(attachment) = &self.consumer else {
            self.spool.push_back(stored);
            return;
        };
        let (message_id, message) = stored.clone();
        attachment.events.emit(TransportEvent::Message {
            binding: attachment.binding.clone(),
            message_id,
            message,
        });
        self.in_flight.push(stored);
    }

    /// Drops the consumer and puts its unacknowledged deliveries back in
    /// front of the spool, oldest first.
    fn detach(&mut self) -> Option<Attachment> {
        for stored in self.in_flight.drain(..).rev() {
            self.spool.push_front(stored);
        }
        self.consumer.take()
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    endpoints: HashMap<String, Endpoint>,
    rejections: Vec<(String, String)>,
    login_failure: Option<String>,
    next_session: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LoopbackBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl LoopbackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> LoopbackConnector {
        LoopbackConnector {
            broker: self.clone(),
        }
    }

    /// Creates a durable endpoint. Binding to an endpoint that was never
    /// provisioned fails.
    pub fn provision_endpoint(&self, name: &str) {
        self.lock().endpoints.entry(name.to_string()).or_default();
    }

    /// Rejects every guaranteed message whose topic matches `subscription`.
    pub fn reject_topics(&self, subscription: &str, info: &str) {
        self.lock()
            .rejections
            .push((subscription.to_string(), info.to_string()));
    }

    /// Makes every following login fail with `reason`; `None` accepts them again.
    pub fn fail_logins(&self, reason: Option<&str>) {
        self.lock().login_failure = reason.map(str::to_string);
    }

    /// Takes the flow of a bound endpoint down. Returns false if nothing was
    /// bound to it.
    pub fn take_down(&self, endpoint: &str, reason: &str) -> bool {
        let mut state = self.lock();
        let Some(attachment) = state.endpoints.get_mut(endpoint).and_then(Endpoint::detach)
        else {
            return false;
        };
        attachment.events.emit(TransportEvent::Down {
            binding: attachment.binding,
            reason: reason.to_string(),
        });
        true
    }

    /// Number of messages retained for an endpoint with no bound consumer.
    pub fn spooled(&self, endpoint: &str) -> usize {
        self.lock()
            .endpoints
            .get(endpoint)
            .map_or(0, |ep| ep.spool.len())
    }

    /// Number of deliveries the bound consumer has not acknowledged.
    pub fn unacked(&self, endpoint: &str) -> usize {
        self.lock()
            .endpoints
            .get(endpoint)
            .map_or(0, |ep| ep.in_flight.len())
    }

    pub fn is_bound(&self, endpoint: &str) -> bool {
        self.lock()
            .endpoints
            .get(endpoint)
            .is_some_and(|ep| ep.consumer.is_some())
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn detach_session(&self, session: u64) {
        let mut state = self.lock();
        for (name, endpoint) in state.endpoints.iter_mut() {
            if endpoint
                .consumer
                .as_ref()
                .is_some_and(|attachment| attachment.session == session)
            {
                endpoint.detach();
                debug!(endpoint = %name, session, "consumer detached");
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    broker: LoopbackBroker,
}

impl Connector for LoopbackConnector {
    fn open(
        &mut self,
        _properties: &SessionProperties,
        events: EventEmitter,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let session = {
            let mut state = self.broker.lock();
            state.next_session += 1;
            state.next_session
        };
        Ok(Box::new(LoopbackTransport {
            broker: self.broker.clone(),
            session,
            events,
            connected: false,
        }))
    }
}

struct LoopbackTransport {
    broker: LoopbackBroker,
    session: u64,
    events: EventEmitter,
    connected: bool,
}

impl LoopbackTransport {
    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

impl Transport for LoopbackTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        let failure = self.broker.lock().login_failure.clone();
        match failure {
            Some(reason) => {
                self.events.emit(TransportEvent::ConnectFailed { reason });
            }
            None => {
                self.connected = true;
                self.events.emit(TransportEvent::Up);
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.broker.detach_session(self.session);
        self.connected = false;
        self.events.emit(TransportEvent::Disconnected);
        Ok(())
    }

    fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let mut state = self.broker.lock();
        let BrokerState {
            endpoints,
            rejections,
            ..
        } = &mut *state;

        let rejection = rejections
            .iter()
            .find(|(pattern, _)| topic::matches(pattern, &message.topic));
        if let Some((_, info)) = rejection {
            if let Some(correlation_id) = message.correlation_id {
                self.events.emit(TransportEvent::Rejected {
                    correlation_id,
                    info: info.clone(),
                });
            }
            return Ok(());
        }

        for (name, endpoint) in endpoints.iter_mut() {
            let attracted = endpoint
                .subscription
                .as_deref()
                .is_some_and(|subscription| topic::matches(subscription, &message.topic));
            if !attracted {
                continue;
            }
            let stored = endpoint.store(name, InboundMessage::from(message));
            endpoint.deliver(stored);
        }

        if let Some(correlation_id) = message.correlation_id {
            self.events
                .emit(TransportEvent::Acknowledged { correlation_id });
        }
        Ok(())
    }

    fn bind(&mut self, binding: &BindingKey) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let mut state = self.broker.lock();
        let Some(endpoint) = state.endpoints.get_mut(&binding.endpoint) else {
            self.events.emit(TransportEvent::BindFailed {
                binding: binding.clone(),
                reason: "endpoint not provisioned".to_string(),
            });
            return Ok(());
        };
        if endpoint.consumer.is_some() {
            self.events.emit(TransportEvent::BindFailed {
                binding: binding.clone(),
                reason: "endpoint already bound by another consumer".to_string(),
            });
            return Ok(());
        }

        // A new subscription replaces the old one and discards what it spooled.
        if endpoint.subscription.as_deref() != Some(binding.subscription.as_str()) {
            endpoint.spool.clear();
            endpoint.in_flight.clear();
            endpoint.subscription = Some(binding.subscription.clone());
        }
        endpoint.consumer = Some(Attachment {
            session: self.session,
            binding: binding.clone(),
            events: self.events.clone(),
        });

        self.events.emit(TransportEvent::BindUp {
            binding: binding.clone(),
        });
        while let Some(stored) = endpoint.spool.pop_front() {
            endpoint.deliver(stored);
        }
        Ok(())
    }

    fn unbind(&mut self, binding: &BindingKey) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        if let Some(endpoint) = state.endpoints.get_mut(&binding.endpoint) {
            let owned = endpoint
                .consumer
                .as_ref()
                .is_some_and(|attachment| {
                    attachment.session == self.session && attachment.binding == *binding
                });
            if owned {
                endpoint.detach();
            }
        }
        Ok(())
    }

    fn ack(&mut self, binding: &BindingKey, message_id: &str) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        let Some(endpoint) = state.endpoints.get_mut(&binding.endpoint) else {
            return Ok(());
        };
        match endpoint.in_flight.iter().position(|(id, _)| id == message_id) {
            Some(index) => {
                endpoint.in_flight.remove(index);
            }
            None => debug!(%binding, message_id, "ack for unknown delivery ignored"),
        }
        Ok(())
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.broker.detach_session(self.session);
    }
}
