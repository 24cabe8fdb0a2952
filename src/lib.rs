//! # durasub
//!
//! `durasub` is the client core of a guaranteed-messaging pub/sub system. It
//! opens a session to a broker, publishes persistent messages whose delivery
//! is confirmed or refused through correlation ids, and binds to durable topic
//! endpoints that keep messages while no consumer is attached.
//!
//! ## Core Modules
//!
//! - `session`: the session state machine that owns the transport, the
//!   publisher and the consumers, and applies transport events.
//! - `publisher`: the guaranteed publisher and its correlation tracker.
//! - `consumer`: durable endpoint bindings and payload decoding.
//! - `message`: message types and topic matching.
//! - `transport`: the transport abstraction with a WebSocket implementation
//!   and an in-process loopback broker.
//! - `client`: hosts a session on the tokio runtime.
//! - `config`: loads settings from file and environment.
//! - `utils`: error taxonomy and logging setup.

pub mod client;
pub mod config;
pub mod consumer;
pub mod message;
pub mod publisher;
pub mod session;
pub mod transport;
pub mod utils;

pub use client::{Client, ClientOptions};
pub use utils::Error;
