mod file;
mod memory;

pub use file::FileCache;
pub use memory::{DEFAULT_CAPACITY, MemoryCache};

use std::{
    io,
    path::PathBuf,
    sync::Arc,
    time::{Duration, SystemTime},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("memory cache capacity must be greater than zero")]
    ZeroCapacity,
    #[error("cache directory {} is not usable: {source}", .path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read cache entry {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write cache entry {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode cache entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Key-value store for serialized documents with a per-entry time-to-live.
pub trait DocumentCache: Send + Sync {
    /// Returns the document stored under `key` if it is present and not yet expired.
    fn get(&self, key: &str) -> Result<Option<Arc<str>>, CacheError>;

    fn set(&self, key: &str, document: Arc<str>, ttl: Duration) -> Result<(), CacheError>;

    /// Short label for logs.
    fn backend(&self) -> &'static str;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Returns the cached document for `key`, or runs `compute` and stores its result for `ttl`.
///
/// A failing `compute` leaves the cache untouched.
pub fn get_or_compute<E, F>(
    cache: &dyn DocumentCache,
    key: &str,
    ttl: Duration,
    compute: F,
) -> Result<Arc<str>, E>
where
    F: FnOnce() -> Result<Arc<str>, E>,
    E: From<CacheError>,
{
    if let Some(document) = cache.get(key)? {
        tracing::debug!(key, backend = cache.backend(), "document cache hit");
        return Ok(document);
    }

    tracing::debug!(key, backend = cache.backend(), "document cache miss");
    let document = compute()?;
    cache.set(key, Arc::clone(&document), ttl)?;
    Ok(document)
}

/// Longest time-to-live an entry can carry; longer values are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn expiry(now: SystemTime, ttl: Duration) -> SystemTime {
    now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now)
}
