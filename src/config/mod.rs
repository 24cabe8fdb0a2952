//! Configuration loading.
//!
//! Values are layered, later sources winning:
//!
//! 1. built-in defaults (`Settings::default`)
//! 2. a TOML file, `config/default.toml` unless another path is given
//! 3. environment variables prefixed with `DURASUB_`, sections separated by
//!    `__` (e.g. `DURASUB_SESSION__ADDRESS`, `DURASUB_PUBLISHER__ACK_TIMEOUT_MS`)

mod settings;

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};

use crate::client::ClientOptions;
use crate::consumer::DecodeMode;
use crate::session::SessionProperties;
use crate::utils::Error;

pub use settings::{
    ConsumerSettings, LoggingSettings, PartialSettings, PublisherSettings, SessionSettings,
    Settings,
};

const DEFAULT_CONFIG_FILE: &str = "config/default";
const ENV_PREFIX: &str = "DURASUB";

/// Loads `config/default.toml` (if present) and the environment on top of the
/// defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    load(None)
}

/// Like `load_config`, but reads the given file, which must exist.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    load(Some(path))
}

fn load(path: Option<&str>) -> Result<Settings, ConfigError> {
    let file = match path {
        Some(path) => File::with_name(path).required(true),
        None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };
    let config = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let partial: PartialSettings = config.try_deserialize()?;
    Ok(partial.merge(Settings::default()))
}

impl Settings {
    pub fn session_properties(&self) -> SessionProperties {
        SessionProperties::new(
            self.session.address.clone(),
            self.session.namespace.clone(),
            self.session.username.clone(),
            self.session.password.clone(),
        )
    }

    pub fn client_options(&self) -> ClientOptions {
        let ack_timeout = match self.publisher.ack_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        ClientOptions {
            ack_timeout,
            sweep_interval: Duration::from_millis(self.publisher.sweep_interval_ms),
        }
    }

    pub fn decode_mode(&self) -> Result<DecodeMode, Error> {
        self.consumer.decode.parse().map_err(Error::InvalidConfig)
    }
}
