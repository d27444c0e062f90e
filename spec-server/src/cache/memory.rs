use hashlink::LruCache;
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, SystemTime},
};

use super::{CacheError, Clock, DocumentCache, SystemClock, expiry};

pub const DEFAULT_CAPACITY: usize = 16;

struct Entry {
    document: Arc<str>,
    expires_at: SystemTime,
}

/// In-process LRU cache. Entries are dropped on expiry or when capacity is exceeded.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        if capacity == 0 {
            return Err(CacheError::ZeroCapacity);
        }
        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            clock,
        })
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Entry>> {
        self.entries.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl DocumentCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Arc<str>>, CacheError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            Some(entry) if now < entry.expires_at => return Ok(Some(Arc::clone(&entry.document))),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        Ok(None)
    }

    fn set(&self, key: &str, document: Arc<str>, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = expiry(self.clock.now(), ttl);
        self.lock().insert(
            key.to_string(),
            Entry {
                document,
                expires_at,
            },
        );
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
