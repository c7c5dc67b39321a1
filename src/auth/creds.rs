//! Account credentials and the shared authentication state.

use std::fmt;
use std::sync::{Arc, RwLock};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::auth::{buffer_json, SignalKeyStore};
use crate::crypto::{KeyPair, SignedKeyPair};

/// The logged-in account, once pairing has completed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Device JID, e.g. `15551234567:3@s.whatsapp.net`.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
}

impl Contact {
    /// User part of the JID (`15551234567`).
    pub fn user(&self) -> &str {
        let bare = self.id.split('@').next().unwrap_or_default();
        bare.split(':').next().unwrap_or_default()
    }

    /// Device number from the JID; the primary device is 0.
    pub fn device(&self) -> u32 {
        self.id
            .split('@')
            .next()
            .and_then(|bare| bare.split_once(':'))
            .and_then(|(_, device)| device.parse().ok())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    #[serde(default)]
    pub remote_jid: Option<String>,
    #[serde(default)]
    pub from_me: Option<bool>,
    #[serde(default)]
    pub id: Option<String>,
}

/// A history-sync message that has already been processed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedHistoryMessage {
    pub key: MessageKey,
    #[serde(default)]
    pub message_timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSettings {
    /// Unarchive chats when a new message arrives.
    pub unarchive_chats: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_disappearing_mode: Option<u32>,
}

/// Everything persisted in `creds.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationCreds {
    pub noise_key: KeyPair,
    pub pairing_ephemeral_key_pair: KeyPair,
    pub signed_identity_key: KeyPair,
    pub signed_pre_key: SignedKeyPair,
    pub registration_id: u16,
    /// Base64 of 32 random bytes.
    pub adv_secret_key: String,
    #[serde(default)]
    pub processed_history_messages: Vec<ProcessedHistoryMessage>,
    pub next_pre_key_id: u32,
    pub first_unuploaded_pre_key_id: u32,
    #[serde(default)]
    pub account_sync_counter: u32,
    #[serde(default)]
    pub account_settings: AccountSettings,
    #[serde(default)]
    pub registered: bool,
    #[serde(default)]
    pub pairing_code: Option<String>,
    #[serde(default)]
    pub me: Option<Contact>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub last_account_sync_timestamp: Option<i64>,
    #[serde(default)]
    pub my_app_state_key_id: Option<String>,
    #[serde(default, with = "buffer_json::option")]
    pub routing_info: Option<Vec<u8>>,
}

impl AuthenticationCreds {
    /// Whether a previous pairing left a logged-in account behind.
    pub fn is_logged_in(&self) -> bool {
        self.me.is_some()
    }
}

/// Registration ids are 14 bits and never zero.
pub fn generate_registration_id() -> u16 {
    rand::thread_rng().gen_range(1..=0x3FFF)
}

/// Fresh credentials for a device that has never paired.
pub fn init_auth_creds() -> AuthenticationCreds {
    let identity = KeyPair::generate();
    let signed_pre_key = SignedKeyPair::generate(&identity, 1);
    let adv_secret: [u8; 32] = rand::random();

    AuthenticationCreds {
        noise_key: KeyPair::generate(),
        pairing_ephemeral_key_pair: KeyPair::generate(),
        signed_identity_key: identity,
        signed_pre_key,
        registration_id: generate_registration_id(),
        adv_secret_key: buffer_json::encode_base64(&adv_secret),
        processed_history_messages: Vec::new(),
        next_pre_key_id: 1,
        first_unuploaded_pre_key_id: 1,
        account_sync_counter: 0,
        account_settings: AccountSettings::default(),
        registered: false,
        pairing_code: None,
        me: None,
        platform: None,
        last_account_sync_timestamp: None,
        my_app_state_key_id: None,
        routing_info: None,
    }
}

/// Credentials shared between the socket and whoever persists them.
pub type SharedCreds = Arc<RwLock<AuthenticationCreds>>;

/// Credentials plus the key store the socket reads and writes.
#[derive(Clone)]
pub struct AuthenticationState {
    pub creds: SharedCreds,
    pub keys: Arc<dyn SignalKeyStore>,
}

impl AuthenticationState {
    pub fn new(creds: AuthenticationCreds, keys: Arc<dyn SignalKeyStore>) -> Self {
        Self {
            creds: Arc::new(RwLock::new(creds)),
            keys,
        }
    }
}

impl fmt::Debug for AuthenticationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registration_id = self.creds.read().map(|c| c.registration_id).ok();
        f.debug_struct("AuthenticationState")
            .field("registration_id", &registration_id)
            .field("keys", &"<dyn SignalKeyStore>")
            .finish()
    }
}
