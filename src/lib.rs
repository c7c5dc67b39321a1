//! wa-bootstrap: the startup half of a WhatsApp Web client.
//!
//! Loads a multi-file auth folder, wraps its Signal key store in a TTL
//! cache and builds a socket that can complete the Noise handshake with
//! the WhatsApp Web endpoint.
//!
//! ## Modules
//!
//! - `auth` - Credentials, key store trait and the multi-file folder store
//! - `cache` - Caching decorator for key stores
//! - `config` - Socket and startup configuration
//! - `crypto` - Curve25519 key pairs, HKDF and the Noise handshake state
//! - `logger` - Leveled logger handles and subscriber setup
//! - `proto` - Handshake protobuf messages
//! - `socket` - WebSocket transport, framing and connection events
//! - `bootstrap` - The four-step startup sequence

pub mod auth;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod logger;
pub mod proto;
pub mod socket;

pub use auth::{
    init_auth_creds, use_multi_file_auth_state, AuthError, AuthenticationCreds,
    AuthenticationState, SaveCreds, SignalDataType, SignalKeyStore, SignalValue,
};
pub use bootstrap::{bootstrap, BootstrapError, Session};
pub use cache::{make_cacheable_signal_key_store, CacheableSignalKeyStore};
pub use config::{BootstrapConfig, Browser, SocketConfig};
pub use logger::{init_subscriber, parse_level, Logger, LoggerError};
pub use socket::{make_wa_socket, ConnectionState, ConnectionUpdate, Event, SocketError, WaSocket};
