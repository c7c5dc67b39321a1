//! Read-through, write-through TTL cache in front of a [`SignalKeyStore`].
//!
//! The socket reads sessions and sender keys for every message, and the
//! file-backed store turns each read into a file open. Wrapping it keeps hot
//! keys in memory for [`DEFAULT_SIGNAL_STORE_TTL`].

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::auth::{AuthError, AuthResult, SignalDataSet, SignalDataType, SignalKeyStore, SignalValue};
use crate::logger::Logger;

pub const DEFAULT_SIGNAL_STORE_TTL: Duration = Duration::from_secs(5 * 60);

/// Entries kept before the least recently used one is evicted.
pub const DEFAULT_SIGNAL_STORE_CAPACITY: usize = 10_000;

fn cache_key(data_type: SignalDataType, id: &str) -> String {
    format!("{data_type}.{id}")
}

struct CacheEntry {
    /// `None` records a deletion.
    value: Option<SignalValue>,
    expires_at: Instant,
}

struct Entries {
    lru: LruCache<String, CacheEntry>,
    last_sweep: Instant,
}

impl Entries {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            lru: LruCache::new(capacity),
            last_sweep: Instant::now(),
        }
    }

    /// Remove every expired entry.
    fn sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .lru
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.lru.pop(key);
        }
        self.last_sweep = now;
        expired.len()
    }

    /// Sweep at most once per `ttl`.
    fn sweep_if_due(&mut self, now: Instant, ttl: Duration) -> usize {
        if now.duration_since(self.last_sweep) >= ttl {
            self.sweep(now)
        } else {
            0
        }
    }
}

/// A [`SignalKeyStore`] that serves repeated reads from memory.
pub struct CacheableSignalKeyStore {
    store: Arc<dyn SignalKeyStore>,
    logger: Logger,
    ttl: Duration,
    entries: Mutex<Entries>,
}

/// Wrap `store` with the default TTL and capacity.
pub fn make_cacheable_signal_key_store(
    store: Arc<dyn SignalKeyStore>,
    logger: &Logger,
) -> CacheableSignalKeyStore {
    CacheableSignalKeyStore::with_ttl(store, logger, DEFAULT_SIGNAL_STORE_TTL)
}

impl CacheableSignalKeyStore {
    pub fn with_ttl(store: Arc<dyn SignalKeyStore>, logger: &Logger, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(DEFAULT_SIGNAL_STORE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self::with_limits(store, logger, ttl, capacity)
    }

    pub fn with_limits(
        store: Arc<dyn SignalKeyStore>,
        logger: &Logger,
        ttl: Duration,
        capacity: NonZeroUsize,
    ) -> Self {
        Self {
            store,
            logger: logger.child("cache"),
            ttl,
            entries: Mutex::new(Entries::new(capacity)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.entries
            .lock()
            .map(|entries| entries.lru.cap().get())
            .unwrap_or(0)
    }

    /// Live (unexpired) entries, tombstones included.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| entries.lru.iter().filter(|(_, e)| e.expires_at > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries now instead of waiting for the next sweep.
    pub fn purge_expired(&self) -> usize {
        match self.entries.lock() {
            Ok(mut entries) => entries.sweep(Instant::now()),
            Err(_) => 0,
        }
    }
}

impl SignalKeyStore for CacheableSignalKeyStore {
    fn get(&self, data_type: SignalDataType, ids: &[String]) -> AuthResult<HashMap<String, SignalValue>> {
        // Held across the store read so a concurrent `set` cannot be
        // overwritten by the stale value fetched here.
        let mut entries = self.entries.lock().map_err(|_| AuthError::LockPoisoned)?;
        let now = Instant::now();
        let swept = entries.sweep_if_due(now, self.ttl);
        if swept > 0 {
            self.logger.trace(format_args!("evicted expired items={swept}"));
        }

        let mut found = HashMap::with_capacity(ids.len());
        let mut to_fetch = Vec::new();
        for id in ids {
            let key = cache_key(data_type, id);
            match entries.lru.get(&key) {
                Some(entry) if entry.expires_at > now => {
                    if let Some(value) = &entry.value {
                        found.insert(id.clone(), value.clone());
                    }
                }
                Some(_) => {
                    entries.lru.pop(&key);
                    to_fetch.push(id.clone());
                }
                None => to_fetch.push(id.clone()),
            }
        }

        if !to_fetch.is_empty() {
            self.logger
                .trace(format_args!("loading from store items={}", to_fetch.len()));
            let mut fetched = self.store.get(data_type, &to_fetch)?;
            let expires_at = Instant::now() + self.ttl;
            for id in to_fetch {
                if let Some(value) = fetched.remove(&id) {
                    entries.lru.put(
                        cache_key(data_type, &id),
                        CacheEntry {
                            value: Some(value.clone()),
                            expires_at,
                        },
                    );
                    found.insert(id, value);
                }
            }
        }

        Ok(found)
    }

    fn set(&self, data: SignalDataSet) -> AuthResult<()> {
        crate::auth::validate_data_set(&data)?;
        let mut entries = self.entries.lock().map_err(|_| AuthError::LockPoisoned)?;
        let now = Instant::now();
        entries.sweep_if_due(now, self.ttl);
        let expires_at = now + self.ttl;

        let mut keys = 0;
        for (data_type, values) in &data {
            for (id, value) in values {
                entries.lru.put(
                    cache_key(*data_type, id),
                    CacheEntry {
                        value: value.clone(),
                        expires_at,
                    },
                );
                keys += 1;
            }
        }
        self.logger.trace(format_args!("updated cache keys={keys}"));

        self.store.set(data)
    }

    fn clear(&self) -> AuthResult<()> {
        self.entries
            .lock()
            .map_err(|_| AuthError::LockPoisoned)?
            .lru
            .clear();
        self.logger.trace(format_args!("flushed cache"));
        self.store.clear()
    }
}
