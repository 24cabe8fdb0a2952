use std::fmt;

use serde::Deserialize;
use url::Url;

use crate::utils::Error;

/// Address schemes a session can be opened on.
pub const SUPPORTED_SCHEMES: [&str; 4] = ["ws", "wss", "http", "https"];

/// Parameters of a session. All four are required.
#[derive(Clone, PartialEq, Eq, Default, Deserialize)]
pub struct SessionProperties {
    /// Broker URI, e.g. `wss://broker:443`.
    pub address: String,
    /// Tenant the session authenticates into (the broker's message VPN).
    pub namespace: String,
    pub username: String,
    pub password: String,
}

impl SessionProperties {
    pub fn new(
        address: impl Into<String>,
        namespace: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            namespace: namespace.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        let missing: Vec<&str> = [
            ("address", &self.address),
            ("namespace", &self.namespace),
            ("username", &self.username),
            ("password", &self.password),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "missing required session properties: {}",
                missing.join(", ")
            )));
        }

        let url = Url::parse(&self.address).map_err(|e| {
            Error::InvalidConfig(format!("invalid address \"{}\": {e}", self.address))
        })?;
        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(Error::InvalidConfig(format!(
                "invalid protocol \"{}\", use one of ws://, wss://, http://, https://",
                url.scheme()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for SessionProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionProperties")
            .field("address", &self.address)
            .field("namespace", &self.namespace)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
