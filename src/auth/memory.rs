//! In-memory key store for tests and throwaway sessions.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::auth::{
    validate_data_set, AuthError, AuthResult, SignalDataSet, SignalDataType, SignalKeyStore,
    SignalValue,
};

/// Keys held in a map; nothing survives the process.
#[derive(Default)]
pub struct MemoryKeyStore {
    data: RwLock<HashMap<SignalDataType, HashMap<String, SignalValue>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys across all types.
    pub fn len(&self) -> usize {
        self.data
            .read()
            .map(|data| data.values().map(HashMap::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SignalKeyStore for MemoryKeyStore {
    fn get(&self, data_type: SignalDataType, ids: &[String]) -> AuthResult<HashMap<String, SignalValue>> {
        let data = self.data.read().map_err(|_| AuthError::LockPoisoned)?;
        let Some(entries) = data.get(&data_type) else {
            return Ok(HashMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| entries.get(id).map(|v| (id.clone(), v.clone())))
            .collect())
    }

    fn set(&self, data: SignalDataSet) -> AuthResult<()> {
        validate_data_set(&data)?;
        let mut stored = self.data.write().map_err(|_| AuthError::LockPoisoned)?;
        for (data_type, entries) in data {
            let bucket = stored.entry(data_type).or_default();
            for (id, value) in entries {
                match value {
                    Some(value) => {
                        bucket.insert(id, value);
                    }
                    None => {
                        bucket.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }

    fn clear(&self) -> AuthResult<()> {
        self.data
            .write()
            .map_err(|_| AuthError::LockPoisoned)?
            .clear();
        Ok(())
    }
}
