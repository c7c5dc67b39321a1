//! Signal key store data model and the store trait.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::auth::{buffer_json, AuthError, AuthResult};
use crate::crypto::KeyPair;

/// Category of a stored signal key. The string form is used in file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalDataType {
    PreKey,
    Session,
    SenderKey,
    SenderKeyMemory,
    AppStateSyncKey,
    AppStateSyncVersion,
}

impl SignalDataType {
    pub const ALL: [SignalDataType; 6] = [
        SignalDataType::PreKey,
        SignalDataType::Session,
        SignalDataType::SenderKey,
        SignalDataType::SenderKeyMemory,
        SignalDataType::AppStateSyncKey,
        SignalDataType::AppStateSyncVersion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalDataType::PreKey => "pre-key",
            SignalDataType::Session => "session",
            SignalDataType::SenderKey => "sender-key",
            SignalDataType::SenderKeyMemory => "sender-key-memory",
            SignalDataType::AppStateSyncKey => "app-state-sync-key",
            SignalDataType::AppStateSyncVersion => "app-state-sync-version",
        }
    }
}

impl fmt::Display for SignalDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalDataType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AuthError::UnknownDataType(s.to_string()))
    }
}

/// Fingerprint attached to an app-state sync key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateSyncKeyFingerprint {
    #[serde(default)]
    pub raw_id: Option<u32>,
    #[serde(default)]
    pub current_index: Option<u32>,
    #[serde(default)]
    pub device_indexes: Vec<u32>,
}

/// Key material shared by the primary device for app-state sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateSyncKeyData {
    #[serde(with = "buffer_json")]
    pub key_data: Vec<u8>,
    #[serde(default)]
    pub fingerprint: Option<AppStateSyncKeyFingerprint>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Value MAC recorded per index in an LT-hash state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexValue {
    #[serde(with = "buffer_json")]
    pub value_mac: Vec<u8>,
}

/// Version and rolling hash of one app-state collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LtHashState {
    pub version: u64,
    #[serde(with = "buffer_json")]
    pub hash: Vec<u8>,
    #[serde(default)]
    pub index_value_map: HashMap<String, IndexValue>,
}

impl Default for LtHashState {
    fn default() -> Self {
        Self {
            version: 0,
            hash: vec![0u8; 128],
            index_value_map: HashMap::new(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(transparent)]
struct Bytes(#[serde(with = "buffer_json")] Vec<u8>);

/// A stored key. Each variant belongs to exactly one [`SignalDataType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalValue {
    PreKey(KeyPair),
    Session(Vec<u8>),
    SenderKey(Vec<u8>),
    /// Which participants already received our sender key.
    SenderKeyMemory(HashMap<String, bool>),
    AppStateSyncKey(AppStateSyncKeyData),
    AppStateSyncVersion(LtHashState),
}

impl SignalValue {
    pub fn data_type(&self) -> SignalDataType {
        match self {
            SignalValue::PreKey(_) => SignalDataType::PreKey,
            SignalValue::Session(_) => SignalDataType::Session,
            SignalValue::SenderKey(_) => SignalDataType::SenderKey,
            SignalValue::SenderKeyMemory(_) => SignalDataType::SenderKeyMemory,
            SignalValue::AppStateSyncKey(_) => SignalDataType::AppStateSyncKey,
            SignalValue::AppStateSyncVersion(_) => SignalDataType::AppStateSyncVersion,
        }
    }

    /// JSON form of the inner value, without a type tag.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            SignalValue::PreKey(kp) => serde_json::to_value(kp),
            SignalValue::Session(bytes) | SignalValue::SenderKey(bytes) => {
                serde_json::to_value(Bytes(bytes.clone()))
            }
            SignalValue::SenderKeyMemory(map) => serde_json::to_value(map),
            SignalValue::AppStateSyncKey(data) => serde_json::to_value(data),
            SignalValue::AppStateSyncVersion(state) => serde_json::to_value(state),
        }
    }

    /// Parse a value previously written by [`SignalValue::to_json`].
    pub fn from_json(
        data_type: SignalDataType,
        value: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match data_type {
            SignalDataType::PreKey => SignalValue::PreKey(serde_json::from_value(value)?),
            SignalDataType::Session => {
                SignalValue::Session(serde_json::from_value::<Bytes>(value)?.0)
            }
            SignalDataType::SenderKey => {
                SignalValue::SenderKey(serde_json::from_value::<Bytes>(value)?.0)
            }
            SignalDataType::SenderKeyMemory => {
                SignalValue::SenderKeyMemory(serde_json::from_value(value)?)
            }
            SignalDataType::AppStateSyncKey => {
                SignalValue::AppStateSyncKey(serde_json::from_value(value)?)
            }
            SignalDataType::AppStateSyncVersion => {
                SignalValue::AppStateSyncVersion(serde_json::from_value(value)?)
            }
        })
    }
}

/// A batch of writes: `type -> id -> value`. `None` deletes the key.
pub type SignalDataSet = HashMap<SignalDataType, HashMap<String, Option<SignalValue>>>;

/// Check every value in `data` is filed under its own type.
pub fn validate_data_set(data: &SignalDataSet) -> AuthResult<()> {
    for (data_type, entries) in data {
        for value in entries.values().flatten() {
            if value.data_type() != *data_type {
                return Err(AuthError::TypeMismatch {
                    expected: *data_type,
                    found: value.data_type(),
                });
            }
        }
    }
    Ok(())
}

/// Storage for signal protocol keys.
pub trait SignalKeyStore: Send + Sync {
    /// Fetch the given ids. Ids that are not stored are absent from the result.
    fn get(&self, data_type: SignalDataType, ids: &[String]) -> AuthResult<HashMap<String, SignalValue>>;

    /// Apply a batch of writes and deletions.
    fn set(&self, data: SignalDataSet) -> AuthResult<()>;

    /// Remove every stored key.
    fn clear(&self) -> AuthResult<()>;
}
