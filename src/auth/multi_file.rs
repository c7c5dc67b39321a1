//! Auth state persisted as one JSON file per credential set and per key.
//!
//! Layout inside the folder:
//!
//! - `creds.json` holds [`AuthenticationCreds`]
//! - `<type>-<id>.json` holds one signal key, e.g. `session-1555@s.whatsapp.net.json`
//!
//! Suited to bots and small deployments. Every file access goes through a
//! per-path lock and writes land through a rename, so a reader never sees a
//! half-written file.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::auth::{
    init_auth_creds, validate_data_set, AuthError, AuthResult, AuthenticationCreds,
    AuthenticationState, SharedCreds, SignalDataSet, SignalDataType, SignalKeyStore, SignalValue,
};

pub const CREDS_FILE: &str = "creds.json";

/// Make an id safe to embed in a file name.
pub fn fix_file_name(name: &str) -> String {
    name.replace('/', "__").replace(':', "-")
}

fn key_file_name(data_type: SignalDataType, id: &str) -> String {
    format!("{}-{}.json", data_type, fix_file_name(id))
}

/// Whether `name` looks like a key file written by this store.
fn is_key_file(name: &str) -> bool {
    name.ends_with(".json")
        && SignalDataType::ALL
            .iter()
            .any(|t| name.starts_with(&format!("{}-", t.as_str())))
}

/// File-backed storage shared by the key store and [`SaveCreds`].
pub struct MultiFileAuthStore {
    folder: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl MultiFileAuthStore {
    fn new(folder: PathBuf) -> Self {
        Self {
            folder,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    fn lock_for(&self, path: &Path) -> AuthResult<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| AuthError::LockPoisoned)?;
        Ok(locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    fn write_data<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> AuthResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|source| AuthError::Serialization {
            what: file.to_string(),
            source,
        })?;
        self.write_raw(file, &bytes)
    }

    fn write_raw(&self, file: &str, bytes: &[u8]) -> AuthResult<()> {
        let path = self.folder.join(file);
        let tmp = self.folder.join(format!(".{file}.tmp"));
        let lock = self.lock_for(&path)?;
        let _guard = lock.lock().map_err(|_| AuthError::LockPoisoned)?;

        fs::write(&tmp, bytes).map_err(|e| AuthError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| AuthError::io(&path, e))
    }

    /// Read and parse a file. Missing and unparsable files read as `None`.
    fn read_data(&self, file: &str) -> AuthResult<Option<serde_json::Value>> {
        let path = self.folder.join(file);
        let lock = self.lock_for(&path)?;
        let contents = {
            let _guard = lock.lock().map_err(|_| AuthError::LockPoisoned)?;
            match fs::read(&path) {
                Ok(contents) => contents,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(AuthError::io(&path, e)),
            }
        };

        match serde_json::from_slice(&contents) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                log::warn!("ignoring unreadable auth file {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    fn remove_data(&self, file: &str) -> AuthResult<()> {
        let path = self.folder.join(file);
        let lock = self.lock_for(&path)?;
        let _guard = lock.lock().map_err(|_| AuthError::LockPoisoned)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::io(&path, e)),
        }
    }

    fn load_creds(&self) -> AuthResult<Option<AuthenticationCreds>> {
        let Some(value) = self.read_data(CREDS_FILE)? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(creds) => Ok(Some(creds)),
            Err(e) => {
                log::warn!("{} is not a valid credential set: {}", CREDS_FILE, e);
                Ok(None)
            }
        }
    }
}

impl SignalKeyStore for MultiFileAuthStore {
    fn get(&self, data_type: SignalDataType, ids: &[String]) -> AuthResult<HashMap<String, SignalValue>> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            let file = key_file_name(data_type, id);
            let Some(value) = self.read_data(&file)? else {
                continue;
            };
            match SignalValue::from_json(data_type, value) {
                Ok(value) => {
                    found.insert(id.clone(), value);
                }
                Err(e) => log::warn!("ignoring malformed {} key {}: {}", data_type, id, e),
            }
        }
        Ok(found)
    }

    fn set(&self, data: SignalDataSet) -> AuthResult<()> {
        validate_data_set(&data)?;
        for (data_type, entries) in data {
            for (id, value) in entries {
                let file = key_file_name(data_type, &id);
                match value {
                    Some(value) => {
                        let json = value.to_json().map_err(|source| AuthError::Serialization {
                            what: file.clone(),
                            source,
                        })?;
                        self.write_data(&file, &json)?;
                    }
                    None => self.remove_data(&file)?,
                }
            }
        }
        Ok(())
    }

    fn clear(&self) -> AuthResult<()> {
        let entries = fs::read_dir(&self.folder).map_err(|e| AuthError::io(&self.folder, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| AuthError::io(&self.folder, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if is_key_file(name) {
                self.remove_data(name)?;
            }
        }
        Ok(())
    }
}

/// Writes the shared credentials back to `creds.json`.
#[derive(Clone)]
pub struct SaveCreds {
    store: Arc<MultiFileAuthStore>,
    creds: SharedCreds,
}

impl SaveCreds {
    pub fn save(&self) -> AuthResult<()> {
        let snapshot = self
            .creds
            .read()
            .map_err(|_| AuthError::LockPoisoned)?
            .clone();
        self.store.write_data(CREDS_FILE, &snapshot)
    }

    pub fn path(&self) -> PathBuf {
        self.store.folder().join(CREDS_FILE)
    }
}

/// Load the auth state kept in `folder`, creating the folder and fresh
/// credentials when nothing is stored yet.
///
/// Credentials are only written by [`SaveCreds::save`]; keys are written as
/// soon as they are set.
pub fn use_multi_file_auth_state(
    folder: impl AsRef<Path>,
) -> AuthResult<(AuthenticationState, SaveCreds)> {
    let folder = folder.as_ref().to_path_buf();
    match fs::metadata(&folder) {
        Ok(meta) if !meta.is_dir() => return Err(AuthError::NotADirectory(folder)),
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(&folder).map_err(|e| AuthError::io(&folder, e))?;
        }
        Err(e) => return Err(AuthError::io(&folder, e)),
    }

    let store = Arc::new(MultiFileAuthStore::new(folder));
    let creds = match store.load_creds()? {
        Some(creds) => creds,
        None => {
            log::debug!(
                "no credentials in {}, generating a new identity",
                store.folder().display()
            );
            init_auth_creds()
        }
    };

    let state = AuthenticationState::new(creds, store.clone());
    let save_creds = SaveCreds {
        store,
        creds: state.creds.clone(),
    };
    Ok((state, save_creds))
}
