//! CLI for durasub
//!
//! Subcommands:
//! - `publish`: send guaranteed messages and report their outcomes
//! - `consume`: bind to a durable endpoint and print what arrives
//! - `demo`: publish and consume against an in-process broker

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use clap::{Parser, Subcommand};
use durasub::config::{Settings, load_config, load_config_from};
use durasub::consumer::{Body, Delivery};
use durasub::session::{LogObserver, SessionEvent, SessionObserver, SessionProperties, SessionState};
use durasub::transport::{LoopbackBroker, WsConnector};
use durasub::utils::logging;
use durasub::{Client, ClientOptions, Error};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const BIND_TIMEOUT: Duration = Duration::from_secs(10);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "durasub", about = "Guaranteed publish and durable consume")]
struct Cli {
    /// Configuration file (default: config/default.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Publish persistent messages and wait for their acknowledgments
    Publish {
        #[arg(long, default_value = "tutorial/topic")]
        topic: String,
        #[arg(long, default_value = "Sample Message")]
        payload: String,
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// How long to wait for outstanding acknowledgments
        #[arg(long, default_value_t = 10)]
        wait_secs: u64,
    },
    /// Consume from a durable endpoint until Ctrl-C
    Consume {
        /// Endpoint name (default: from configuration)
        #[arg(long)]
        endpoint: Option<String>,
        /// Topic subscription (default: from configuration)
        #[arg(long)]
        subscription: Option<String>,
    },
    /// Show durable delivery against an in-process broker
    Demo {
        #[arg(long, default_value_t = 3)]
        count: u32,
        /// Topic to publish on (default: the configured subscription)
        #[arg(long)]
        topic: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    };
    let settings = match loaded {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(&settings.logging.level);

    let result = match cli.command {
        Command::Publish {
            topic,
            payload,
            count,
            wait_secs,
        } => run_publish(&settings, &topic, &payload, count, wait_secs).await,
        Command::Consume {
            endpoint,
            subscription,
        } => {
            let endpoint = endpoint.unwrap_or_else(|| settings.consumer.endpoint.clone());
            let subscription =
                subscription.unwrap_or_else(|| settings.consumer.subscription.clone());
            run_consume(&settings, &endpoint, &subscription).await
        }
        Command::Demo { count, topic } => run_demo(&settings, count, topic).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run_publish(
    settings: &Settings,
    topic: &str,
    payload: &str,
    count: u32,
    wait_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let (observer, mut events) = mpsc::unbounded_channel();
    let client = Client::spawn(WsConnector, observer, settings.client_options());
    connect(&client, settings.session_properties(), &mut events).await?;

    let mut pending = HashSet::new();
    for n in 1..=count {
        let id = client.publish_text(topic, payload)?;
        info!("Message {n} sent with correlation id {id}");
        pending.insert(id);
    }

    let waited = tokio::time::timeout(Duration::from_secs(wait_secs), async {
        while !pending.is_empty() {
            let Some(event) = events.recv().await else {
                break;
            };
            if let SessionEvent::Outcome { correlation_id, .. } = &event {
                pending.remove(correlation_id);
            }
            LogObserver.notify(event);
        }
    })
    .await;
    if waited.is_err() {
        warn!(
            outstanding = pending.len(),
            "gave up waiting for acknowledgments"
        );
    }

    disconnect(&client, &mut events).await;
    Ok(())
}

async fn run_consume(
    settings: &Settings,
    endpoint: &str,
    subscription: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let decode = settings.decode_mode()?;
    let (observer, mut events) = mpsc::unbounded_channel();
    let client = Client::spawn(WsConnector, observer, settings.client_options());
    connect(&client, settings.session_properties(), &mut events).await?;

    client.start_consume(endpoint, subscription, decode, print_delivery)?;
    wait_for(&mut events, BIND_TIMEOUT, Awaiting::Bound { endpoint }).await?;
    info!("Consuming from {endpoint}, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Exiting gracefully.");
                break;
            }
            event = events.recv() => match event {
                Some(SessionEvent::StateChanged { to: SessionState::Disconnected, .. }) | None => {
                    warn!("session closed by the broker");
                    return Ok(());
                }
                Some(event) => LogObserver.notify(event),
            },
        }
    }

    if let Err(e) = client.stop_consume(endpoint, subscription) {
        warn!("{}", e);
    }
    disconnect(&client, &mut events).await;
    Ok(())
}

async fn run_demo(
    settings: &Settings,
    count: u32,
    topic: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = settings.consumer.endpoint.as_str();
    let subscription = settings.consumer.subscription.as_str();
    let topic = topic.unwrap_or_else(|| subscription.to_string());
    let properties = SessionProperties::new("ws://loopback", "default", "demo", "demo");

    let broker = LoopbackBroker::new();
    broker.provision_endpoint(endpoint);

    let (consumer_observer, mut consumer_events) = mpsc::unbounded_channel();
    let consumer = Client::spawn(broker.connector(), consumer_observer, ClientOptions::default());
    connect(&consumer, properties.clone(), &mut consumer_events).await?;

    info!("Binding once so the endpoint attracts {subscription}, then unbinding");
    consumer.start_consume(endpoint, subscription, settings.decode_mode()?, print_delivery)?;
    wait_for(&mut consumer_events, BIND_TIMEOUT, Awaiting::Bound { endpoint }).await?;
    consumer.stop_consume(endpoint, subscription)?;

    let (publisher_observer, mut publisher_events) = mpsc::unbounded_channel();
    let publisher = Client::spawn(
        broker.connector(),
        publisher_observer,
        settings.client_options(),
    );
    connect(&publisher, properties, &mut publisher_events).await?;

    let mut pending = HashSet::new();
    for n in 1..=count {
        pending.insert(publisher.publish_text(&topic, &format!("Sample Message {n}"))?);
    }
    while !pending.is_empty() {
        let Some(event) = publisher_events.recv().await else {
            break;
        };
        if let SessionEvent::Outcome { correlation_id, .. } = &event {
            pending.remove(correlation_id);
        }
        LogObserver.notify(event);
    }
    info!(
        spooled = broker.spooled(endpoint),
        "Messages retained while no consumer was bound"
    );

    info!("Binding again to receive the retained messages");
    consumer.start_consume(endpoint, subscription, settings.decode_mode()?, print_delivery)?;
    wait_for(&mut consumer_events, BIND_TIMEOUT, Awaiting::Bound { endpoint }).await?;
    // deliveries are printed by the handler while the spool drains
    tokio::time::sleep(Duration::from_millis(100)).await;

    disconnect(&publisher, &mut publisher_events).await;
    disconnect(&consumer, &mut consumer_events).await;
    Ok(())
}

fn print_delivery(delivery: Delivery) {
    match &delivery.body {
        Body::Text(text) => info!(topic = %delivery.topic, "Received message: {text}"),
        Body::Structured(value) => info!(topic = %delivery.topic, "Received message: {value}"),
        Body::Binary => info!(
            topic = %delivery.topic,
            bytes = delivery.payload.len(),
            "Received binary message"
        ),
    }
}

async fn connect(
    client: &Client,
    properties: SessionProperties,
    events: &mut UnboundedReceiver<SessionEvent>,
) -> Result<(), Error> {
    client.connect(properties)?;
    wait_for(events, CONNECT_TIMEOUT, Awaiting::Connected).await
}

async fn disconnect(client: &Client, events: &mut UnboundedReceiver<SessionEvent>) {
    client.disconnect();
    let closed = wait_for(events, DISCONNECT_TIMEOUT, Awaiting::Disconnected).await;
    if let Err(e) = closed {
        warn!("{}", e);
    }
}

/// What a command is waiting for on the session event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaiting<'a> {
    Connected,
    Disconnected,
    Bound { endpoint: &'a str },
}

impl Awaiting<'_> {
    fn is_reached(&self, event: &SessionEvent) -> bool {
        match (self, event) {
            (Awaiting::Connected, SessionEvent::StateChanged { to, .. }) => {
                *to == SessionState::Connected
            }
            (Awaiting::Disconnected, SessionEvent::StateChanged { to, .. }) => {
                *to == SessionState::Disconnected
            }
            (Awaiting::Bound { endpoint }, SessionEvent::BindingUp { binding }) => {
                binding.endpoint == *endpoint
            }
            _ => false,
        }
    }

    fn failed(&self, reason: String) -> Error {
        match self {
            Awaiting::Bound { endpoint } => Error::BindError {
                endpoint: endpoint.to_string(),
                reason,
            },
            Awaiting::Connected | Awaiting::Disconnected => Error::ConnectionError { reason },
        }
    }
}

impl fmt::Display for Awaiting<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Awaiting::Connected => f.write_str("session to come up"),
            Awaiting::Disconnected => f.write_str("session to close"),
            Awaiting::Bound { endpoint } => write!(f, "bind confirmation for endpoint \"{endpoint}\""),
        }
    }
}

/// Logs session events until `awaiting` is reached. A failure reported before
/// that ends the wait with the failure.
async fn wait_for(
    events: &mut UnboundedReceiver<SessionEvent>,
    limit: Duration,
    awaiting: Awaiting<'_>,
) -> Result<(), Error> {
    let waited = tokio::time::timeout(limit, async {
        while let Some(event) = events.recv().await {
            if awaiting.is_reached(&event) {
                LogObserver.notify(event);
                return Ok(());
            }
            match event {
                SessionEvent::Failure(error) => return Err(error),
                other => LogObserver.notify(other),
            }
        }
        Err(awaiting.failed(format!(
            "event stream closed while waiting for {awaiting}"
        )))
    })
    .await;

    waited.unwrap_or_else(|_| {
        Err(awaiting.failed(format!(
            "timed out after {}s waiting for {awaiting}",
            limit.as_secs()
        )))
    })
}
