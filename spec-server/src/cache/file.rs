use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    fmt::Write as _,
    fs, io,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use super::{CacheError, Clock, DocumentCache, SystemClock, expiry};

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    expires_at_ms: u64,
    document: String,
}

/// Cache that keeps one JSON file per key, so documents survive restarts.
pub struct FileCache {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    write_seq: AtomicU64,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        Self::with_clock(dir, Arc::new(SystemClock))
    }

    pub fn with_clock(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CacheError::Directory {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            clock,
            write_seq: AtomicU64::new(0),
        })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key_digest(key)))
    }
}

impl DocumentCache for FileCache {
    fn get(&self, key: &str) -> Result<Option<Arc<str>>, CacheError> {
        let path = self.entry_path(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Read { path, source }),
        };
        let entry: StoredEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "discarding corrupt cache entry");
                return Ok(None);
            }
        };
        if entry.key != key {
            tracing::warn!(path = %path.display(), key, stored_key = %entry.key, "cache entry key mismatch");
            return Ok(None);
        }
        if unix_millis(self.clock.now()) >= entry.expires_at_ms {
            return Ok(None);
        }
        Ok(Some(Arc::from(entry.document)))
    }

    fn set(&self, key: &str, document: Arc<str>, ttl: Duration) -> Result<(), CacheError> {
        let entry = StoredEntry {
            key: key.to_string(),
            expires_at_ms: unix_millis(expiry(self.clock.now(), ttl)),
            document: document.to_string(),
        };
        let encoded = serde_json::to_vec(&entry)?;

        let path = self.entry_path(key);
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}.{seq}.tmp", std::process::id()));
        fs::write(&tmp, &encoded).map_err(|source| CacheError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| {
            let _ = fs::remove_file(&tmp);
            CacheError::Write {
                path: path.clone(),
                source,
            }
        })
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}

fn key_digest(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(&mut output, "{:02x}", byte);
    }
    output
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
