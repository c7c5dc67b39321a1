//! Authentication state: credentials, the signal key store and its
//! persistence.

pub mod buffer_json;
mod creds;
mod keys;
mod memory;
mod multi_file;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use creds::*;
pub use keys::*;
pub use memory::MemoryKeyStore;
pub use multi_file::{
    fix_file_name, use_multi_file_auth_state, MultiFileAuthStore, SaveCreds, CREDS_FILE,
};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("found something that is not a directory at {0}, either delete it or specify a different location")]
    NotADirectory(PathBuf),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize {what}: {source}")]
    Serialization {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown signal data type {0:?}")]
    UnknownDataType(String),
    #[error("a {found} value cannot be stored as {expected}")]
    TypeMismatch {
        expected: SignalDataType,
        found: SignalDataType,
    },
    #[error("auth state lock poisoned")]
    LockPoisoned,
}

impl AuthError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        AuthError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
