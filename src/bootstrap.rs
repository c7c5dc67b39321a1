//! The startup sequence: load the auth folder, build the logger, cache the
//! keys and construct the socket.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::auth::{use_multi_file_auth_state, AuthError, AuthenticationState, SaveCreds};
use crate::cache::make_cacheable_signal_key_store;
use crate::config::{BootstrapConfig, SocketConfig};
use crate::logger::{parse_level, Logger, LoggerError};
use crate::socket::{make_wa_socket, ConnectionState, Event, SocketError, WaSocket};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to load auth state: {0}")]
    Auth(#[from] AuthError),
    #[error("invalid logger configuration: {0}")]
    Logger(#[from] LoggerError),
    #[error(transparent)]
    Socket(#[from] SocketError),
}

/// Everything the startup sequence produced.
pub struct Session {
    pub socket: WaSocket,
    pub save_creds: SaveCreds,
    /// Logger handed to the key cache.
    pub logger: Logger,
}

pub fn bootstrap(cfg: &BootstrapConfig) -> Result<Session, BootstrapError> {
    let (state, save_creds) = use_multi_file_auth_state(&cfg.auth_dir)?;
    let logger = Logger::new(parse_level(&cfg.log_level)?);
    logger.debug(format_args!(
        "loaded auth state from {}",
        cfg.auth_dir.display()
    ));

    let keys = make_cacheable_signal_key_store(state.keys, &logger);
    let auth = AuthenticationState {
        creds: state.creds,
        keys: Arc::new(keys),
    };

    let mut socket_config = SocketConfig::new(auth).with_logger(Logger::default());
    if let Some(url) = &cfg.ws_url {
        socket_config = socket_config.with_ws_url(url.clone());
    }
    let socket = make_wa_socket(socket_config);

    Ok(Session {
        socket,
        save_creds,
        logger,
    })
}

/// Persist credentials whenever they change and log connection updates.
///
/// Runs until the socket that owns the channel is dropped. When the
/// listener falls behind it saves anyway, since a skipped update may have
/// been a credentials change.
pub async fn persist_creds_on_update(
    mut events: broadcast::Receiver<Event>,
    save_creds: SaveCreds,
    logger: Logger,
) {
    let save = |why: &str| {
        if let Err(e) = save_creds.save() {
            logger.error(format_args!("failed to save credentials after {why}: {e}"));
        }
    };

    loop {
        match events.recv().await {
            Ok(Event::CredsUpdate) => save("update"),
            Ok(Event::ConnectionUpdate(update)) => match update.connection {
                ConnectionState::Connecting => logger.info(format_args!("connecting")),
                ConnectionState::Open => logger.info(format_args!(
                    "connection open, new login: {}",
                    update.is_new_login
                )),
                ConnectionState::Close => logger.info(format_args!(
                    "connection closed: {}",
                    update.last_disconnect.as_deref().unwrap_or("requested")
                )),
            },
            Err(RecvError::Lagged(skipped)) => {
                logger.warn(format_args!("event listener skipped {skipped} events"));
                save("lag");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
