//! The `client` module hosts a `Session` on the tokio runtime.
//!
//! `Client` owns the session behind an `Arc<Mutex<_>>` and runs two background
//! tasks next to it:
//!
//! - the dispatch loop, which applies transport events to the session in the
//!   order they were emitted
//! - the expiry sweep (only with an ack timeout), which periodically abandons
//!   guaranteed messages nobody acknowledged
//!
//! Both tasks hold a `Weak` reference and stop once the client is dropped.
//! Dropping the client drops the session, which abandons whatever is still
//! pending (`AbandonReason::SessionClosed`) before releasing the transport.
//! The lock is only held for the duration of one session call and never
//! across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::consumer::{BindState, DecodeMode, MessageHandler};
use crate::message::CorrelationId;
use crate::session::{Session, SessionObserver, SessionOptions, SessionProperties, SessionState};
use crate::transport::{Connector, Envelope};
use crate::utils::Error;

#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    /// Abandon guaranteed messages not acknowledged within this time.
    pub ack_timeout: Option<Duration>,
    /// How often pending messages are checked against `ack_timeout`.
    pub sweep_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            ack_timeout: None,
            sweep_interval: Duration::from_millis(1000),
        }
    }
}

pub struct Client {
    session: Arc<Mutex<Session>>,
    dispatch: JoinHandle<()>,
    sweeper: Option<JoinHandle<()>>,
}

impl Client {
    /// Creates a disconnected client. Must be called from within a tokio
    /// runtime.
    pub fn spawn<C, O>(connector: C, observer: O, options: ClientOptions) -> Self
    where
        C: Connector + 'static,
        O: SessionObserver + 'static,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Session::new(
            Box::new(connector),
            events_tx,
            Box::new(observer),
            SessionOptions {
                ack_timeout: options.ack_timeout,
            },
        );
        let session = Arc::new(Mutex::new(session));

        let dispatch = tokio::spawn(run_dispatch_loop(Arc::downgrade(&session), events_rx));
        let sweeper = options.ack_timeout.map(|_| {
            tokio::spawn(run_expiry_loop(
                Arc::downgrade(&session),
                options.sweep_interval,
            ))
        });

        Self {
            session,
            dispatch,
            sweeper,
        }
    }

    pub fn connect(&self, properties: SessionProperties) -> Result<(), Error> {
        self.lock().connect(properties)
    }

    pub fn disconnect(&self) {
        self.lock().disconnect()
    }

    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<CorrelationId, Error> {
        self.lock().publish(topic, payload)
    }

    pub fn publish_text(&self, topic: &str, text: &str) -> Result<CorrelationId, Error> {
        self.lock().publish_text(topic, text)
    }

    pub fn publish_structured<T>(&self, topic: &str, value: &T) -> Result<CorrelationId, Error>
    where
        T: Serialize + ?Sized,
    {
        self.lock().publish_structured(topic, value)
    }

    pub fn start_consume<H>(
        &self,
        endpoint: &str,
        subscription: &str,
        decode: DecodeMode,
        handler: H,
    ) -> Result<(), Error>
    where
        H: MessageHandler + 'static,
    {
        self.lock()
            .start_consume(endpoint, subscription, decode, handler)
    }

    pub fn stop_consume(&self, endpoint: &str, subscription: &str) -> Result<(), Error> {
        self.lock().stop_consume(endpoint, subscription)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state()
    }

    pub fn pending(&self) -> usize {
        self.lock().pending()
    }

    pub fn binding_state(&self, endpoint: &str, subscription: &str) -> BindState {
        self.lock().binding_state(endpoint, subscription)
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        lock(&self.session)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.dispatch.abort();
        if let Some(sweeper) = &self.sweeper {
            sweeper.abort();
        }
    }
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_dispatch_loop(session: Weak<Mutex<Session>>, mut events: UnboundedReceiver<Envelope>) {
    while let Some(envelope) = events.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        lock(&session).dispatch(envelope);
    }
    debug!("dispatch loop finished");
}

async fn run_expiry_loop(session: Weak<Mutex<Session>>, period: Duration) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(session) = session.upgrade() else {
            break;
        };
        let expired = lock(&session).expire_pending(Instant::now().into_std());
        if expired > 0 {
            info!(expired, "unacknowledged messages abandoned");
        }
    }
    debug!("expiry loop finished");
}

#[cfg(test)]
mod tests;
