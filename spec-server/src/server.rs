use axum::{
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;

use crate::{
    cache::{self, CacheError, DocumentCache, get_or_compute},
    scanner::{ScanError, ScanTarget, Scanner},
};

pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(360);
pub const DEFAULT_CACHE_KEY: &str = "api-swagger-cache";

const CORS_ALLOW_HEADERS: &str = "Content-Type, api_key, Authorization";
const CORS_ALLOW_METHODS: &str = "GET, POST, DELETE, PUT";
const CORS_ALLOW_ORIGIN: &str = "*";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("scan target must list at least one path")]
    EmptyScanTarget,
    #[error("cache duration must be greater than zero")]
    ZeroCacheDuration,
    #[error("cache duration must not exceed {} seconds", cache::MAX_TTL.as_secs())]
    CacheDurationTooLong,
    #[error("cache key must not be empty")]
    EmptyCacheKey,
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("failed to serialize API document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What to scan, and how long a generated document stays in the cache.
#[derive(Clone)]
pub struct SpecServerConfig {
    scan_target: ScanTarget,
    cache: Option<Arc<dyn DocumentCache>>,
    cache_duration: Duration,
    cache_key: String,
}

impl SpecServerConfig {
    /// Uncached configuration with the default duration and key.
    pub fn new(scan_target: ScanTarget) -> Result<Self, ConfigError> {
        if scan_target.paths().is_empty() {
            return Err(ConfigError::EmptyScanTarget);
        }
        Ok(Self {
            scan_target,
            cache: None,
            cache_duration: DEFAULT_CACHE_DURATION,
            cache_key: DEFAULT_CACHE_KEY.to_string(),
        })
    }

    pub fn with_cache(mut self, cache: Arc<dyn DocumentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_cache_duration(mut self, duration: Duration) -> Result<Self, ConfigError> {
        if duration.is_zero() {
            return Err(ConfigError::ZeroCacheDuration);
        }
        if duration > cache::MAX_TTL {
            return Err(ConfigError::CacheDurationTooLong);
        }
        self.cache_duration = duration;
        Ok(self)
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Result<Self, ConfigError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ConfigError::EmptyCacheKey);
        }
        self.cache_key = key;
        Ok(self)
    }

    pub fn scan_target(&self) -> &ScanTarget {
        &self.scan_target
    }

    pub fn cache(&self) -> Option<&Arc<dyn DocumentCache>> {
        self.cache.as_ref()
    }

    pub fn cache_duration(&self) -> Duration {
        self.cache_duration
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }
}

/// The CORS headers sent with every document response, successful or not.
pub fn cors_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(CORS_ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(CORS_ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(CORS_ALLOW_ORIGIN),
    );
    headers
}

/// A ready-to-send document: the JSON body plus the headers that go with it.
#[derive(Debug, Clone)]
pub struct SpecResponse {
    headers: HeaderMap,
    body: Arc<str>,
}

impl SpecResponse {
    fn json(body: Arc<str>) -> Self {
        let mut headers = cors_headers();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self { headers, body }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

impl IntoResponse for SpecResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, self.headers, self.body.to_string()).into_response()
    }
}

pub struct SpecServer {
    config: SpecServerConfig,
    scanner: Arc<dyn Scanner>,
}

impl SpecServer {
    pub fn new(config: SpecServerConfig, scanner: Arc<dyn Scanner>) -> Self {
        Self { config, scanner }
    }

    /// Resolves the document (from the cache when one is configured) and wraps it in a response.
    pub fn serve(&self) -> Result<SpecResponse, ServeError> {
        let body = match self.config.cache() {
            Some(cache) => get_or_compute(
                cache.as_ref(),
                self.config.cache_key(),
                self.config.cache_duration(),
                || self.generate(),
            )?,
            None => self.generate()?,
        };
        Ok(SpecResponse::json(body))
    }

    fn generate(&self) -> Result<Arc<str>, ServeError> {
        let started = Instant::now();
        let document = self.scanner.scan(self.config.scan_target())?;
        let body = serde_json::to_string(&document)?;
        tracing::info!(
            paths = document.paths.paths.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generated API document"
        );
        Ok(Arc::from(body))
    }
}
