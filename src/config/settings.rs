use std::fmt;

use serde::Deserialize;

/// Top-level configuration of the client.
///
/// One section per concern: the session to open, the guaranteed publisher,
/// the durable consumer and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub session: SessionSettings,
    pub publisher: PublisherSettings,
    pub consumer: ConsumerSettings,
    pub logging: LoggingSettings,
}

/// Connection parameters of the session. All four must be set before
/// connecting.
#[derive(Deserialize, Clone, PartialEq)]
pub struct SessionSettings {
    pub address: String,
    pub namespace: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSettings")
            .field("address", &self.address)
            .field("namespace", &self.namespace)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Guaranteed publisher settings.
///
/// An `ack_timeout_ms` of 0 waits for acknowledgments forever.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PublisherSettings {
    pub ack_timeout_ms: u64,
    pub sweep_interval_ms: u64,
}

/// Durable endpoint the `consume` command binds to.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ConsumerSettings {
    pub endpoint: String,
    pub subscription: String,
    /// One of `raw`, `auto`, `binary`, `text`, `structured`.
    pub decode: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Settings as found in the file and the environment, before defaults are
/// applied.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub session: Option<PartialSessionSettings>,
    pub publisher: Option<PartialPublisherSettings>,
    pub consumer: Option<PartialConsumerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Deserialize, Default)]
pub struct PartialSessionSettings {
    pub address: Option<String>,
    pub namespace: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for PartialSessionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialSessionSettings")
            .field("address", &self.address)
            .field("namespace", &self.namespace)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialPublisherSettings {
    pub ack_timeout_ms: Option<u64>,
    pub sweep_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialConsumerSettings {
    pub endpoint: Option<String>,
    pub subscription: Option<String>,
    pub decode: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
///
/// The session is left unset; it has to come from the file or the
/// environment.
impl Default for Settings {
    fn default() -> Self {
        Self {
            session: SessionSettings {
                address: String::new(),
                namespace: "default".to_string(),
                username: String::new(),
                password: String::new(),
            },
            publisher: PublisherSettings {
                ack_timeout_ms: 0,
                sweep_interval_ms: 1000,
            },
            consumer: ConsumerSettings {
                endpoint: "tutorial/dte".to_string(),
                subscription: "tutorial/topic".to_string(),
                decode: "auto".to_string(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Fills every value missing from `self` with the one from `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        let session = self.session.unwrap_or_default();
        let publisher = self.publisher.unwrap_or_default();
        let consumer = self.consumer.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            session: SessionSettings {
                address: session.address.unwrap_or(defaults.session.address),
                namespace: session.namespace.unwrap_or(defaults.session.namespace),
                username: session.username.unwrap_or(defaults.session.username),
                password: session.password.unwrap_or(defaults.session.password),
            },
            publisher: PublisherSettings {
                ack_timeout_ms: publisher
                    .ack_timeout_ms
                    .unwrap_or(defaults.publisher.ack_timeout_ms),
                sweep_interval_ms: publisher
                    .sweep_interval_ms
                    .unwrap_or(defaults.publisher.sweep_interval_ms),
            },
            consumer: ConsumerSettings {
                endpoint: consumer.endpoint.unwrap_or(defaults.consumer.endpoint),
                subscription: consumer
                    .subscription
                    .unwrap_or(defaults.consumer.subscription),
                decode: consumer.decode.unwrap_or(defaults.consumer.decode),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(defaults.logging.level),
            },
        }
    }
}
