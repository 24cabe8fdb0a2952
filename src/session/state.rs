use std::fmt;

/// Lifecycle of a session.
///
/// - `Disconnected` -> `Connecting` on `connect`
/// - `Connecting` -> `Connected` on `Up`, or back to `Disconnected` on `ConnectFailed`
/// - any state -> `Disconnecting` -> `Disconnected` on `disconnect` / `Disconnected`
///
/// Only `Connected` accepts publish and bind requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Disconnecting => "Disconnecting",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
