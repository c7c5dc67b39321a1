//! Events broadcast by a [`crate::WaSocket`].

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    /// Transport is up and the Noise handshake finished.
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUpdate {
    pub connection: ConnectionState,
    /// Why the connection closed, when it closed because of an error.
    pub last_disconnect: Option<String>,
    /// The handshake registered a device that had never paired.
    pub is_new_login: bool,
}

impl ConnectionUpdate {
    pub fn connecting() -> Self {
        Self {
            connection: ConnectionState::Connecting,
            last_disconnect: None,
            is_new_login: false,
        }
    }

    pub fn open(is_new_login: bool) -> Self {
        Self {
            connection: ConnectionState::Open,
            last_disconnect: None,
            is_new_login,
        }
    }

    pub fn close(reason: Option<String>) -> Self {
        Self {
            connection: ConnectionState::Close,
            last_disconnect: reason,
            is_new_login: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ConnectionUpdate(ConnectionUpdate),
    /// Credentials changed and should be persisted.
    CredsUpdate,
}
