use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::AuthenticationState;
use crate::logger::Logger;

/// WhatsApp Web endpoint.
pub const DEFAULT_WS_URL: &str = "wss://web.whatsapp.com/ws/chat";
/// Origin header expected by the endpoint.
pub const DEFAULT_ORIGIN: &str = "https://web.whatsapp.com";
/// WhatsApp Web version advertised in the client payload.
pub const DEFAULT_WA_VERSION: [u32; 3] = [2, 3000, 1012170356];

/// How the client describes itself: `(os, browser, os version)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Browser {
    pub os: String,
    pub name: String,
    pub version: String,
}

impl Browser {
    pub fn ubuntu(name: impl Into<String>) -> Self {
        Self {
            os: "Ubuntu".into(),
            name: name.into(),
            version: "22.04.4".into(),
        }
    }

    pub fn macos(name: impl Into<String>) -> Self {
        Self {
            os: "Mac OS".into(),
            name: name.into(),
            version: "14.4.1".into(),
        }
    }
}

impl Default for Browser {
    fn default() -> Self {
        Self::ubuntu("Chrome")
    }
}

/// Everything [`crate::make_wa_socket`] needs.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Credentials and keys of the session.
    pub auth: AuthenticationState,
    /// Logger used by the socket itself.
    pub logger: Logger,
    pub ws_url: String,
    pub origin: String,
    /// Budget for opening the WebSocket and finishing the Noise handshake.
    pub connect_timeout: Duration,
    pub browser: Browser,
    pub version: [u32; 3],
}

impl SocketConfig {
    pub fn new(auth: AuthenticationState) -> Self {
        Self {
            auth,
            logger: Logger::default(),
            ws_url: DEFAULT_WS_URL.into(),
            origin: DEFAULT_ORIGIN.into(),
            connect_timeout: Duration::from_secs(20),
            browser: Browser::default(),
            version: DEFAULT_WA_VERSION,
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Override the WebSocket endpoint.
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_browser(mut self, browser: Browser) -> Self {
        self.browser = browser;
        self
    }

    pub fn with_version(mut self, version: [u32; 3]) -> Self {
        self.version = version;
        self
    }

    /// `primary.secondary.tertiary`
    pub fn version_string(&self) -> String {
        let [a, b, c] = self.version;
        format!("{a}.{b}.{c}")
    }
}

/// Settings of the startup sequence run by the binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Folder holding `creds.json` and the key files.
    pub auth_dir: PathBuf,
    /// Level of the logger handed to the key cache.
    pub log_level: String,
    /// Open the connection after constructing the socket.
    pub connect: bool,
    /// Endpoint override, mostly for tests against a local server.
    pub ws_url: Option<String>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            auth_dir: PathBuf::from("auth_info_multi"),
            log_level: "debug".into(),
            connect: false,
            ws_url: None,
        }
    }
}

impl BootstrapConfig {
    pub fn with_auth_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.auth_dir = dir.into();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_connect(mut self, connect: bool) -> Self {
        self.connect = connect;
        self
    }

    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }
}
