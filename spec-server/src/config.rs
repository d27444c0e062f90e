use anyhow::{Context, Result};
use serde::Deserialize;
use std::{env, path::PathBuf, sync::Arc, time::Duration};

use crate::{
    api::HEALTH_ROUTE,
    cache::{self, CacheError, DocumentCache, FileCache, MemoryCache},
    scanner::{ScanOptions, ScanTarget},
    server::{self, ConfigError, SpecServerConfig},
};

pub const CONFIG_PATH_ENV: &str = "SPEC_SERVER_CONFIG_PATH";
const ENV_PREFIX: &str = "SPEC_SERVER";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub docs: DocsConfig,
    #[serde(default)]
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocsConfig {
    pub route: String,
    pub scan_targets: Vec<PathBuf>,
    /// Seconds.
    pub cache_duration: u64,
    pub cache_key: String,
    #[serde(default)]
    pub scan_options: ScanOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    File,
    /// Scan on every request.
    #[serde(rename = "none")]
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            capacity: default_cache_capacity(),
            dir: default_cache_dir(),
        }
    }
}

fn default_cache_capacity() -> usize {
    cache::DEFAULT_CAPACITY
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

impl Settings {
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => default_config_path()?,
        };
        let builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("docs.route", "/openapi.json")?
            .set_default("docs.scan_targets", vec!["src"])?
            .set_default(
                "docs.cache_duration",
                server::DEFAULT_CACHE_DURATION.as_secs(),
            )?
            .set_default("docs.cache_key", server::DEFAULT_CACHE_KEY)?
            .set_default("cache.backend", "memory")?
            .add_source(config::File::from(config_path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("docs.scan_targets")
                    .with_list_parse_key("docs.scan_options.exclude")
                    .with_list_parse_key("docs.scan_options.extensions")
                    .with_list_parse_key("docs.scan_options.namespaces")
                    .try_parsing(true),
            );

        let settings: Settings = builder
            .build()?
            .try_deserialize()
            .context("invalid spec-server configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn scan_target(&self) -> ScanTarget {
        ScanTarget::new(
            self.docs.scan_targets.iter().cloned(),
            self.docs.scan_options.clone(),
        )
    }

    pub fn server_config(
        &self,
        cache: Option<Arc<dyn DocumentCache>>,
    ) -> Result<SpecServerConfig, ConfigError> {
        let config = SpecServerConfig::new(self.scan_target())?
            .with_cache_duration(Duration::from_secs(self.docs.cache_duration))?
            .with_cache_key(self.docs.cache_key.clone())?;
        Ok(match cache {
            Some(cache) => config.with_cache(cache),
            None => config,
        })
    }

    /// Builds the configured cache. Any failure here is fatal; there is no uncached fallback.
    pub fn build_cache(&self) -> Result<Option<Arc<dyn DocumentCache>>, CacheError> {
        let settings = &self.cache;
        let cache: Arc<dyn DocumentCache> = match settings.backend {
            CacheBackend::Memory => Arc::new(MemoryCache::new(settings.capacity)?),
            CacheBackend::File => Arc::new(FileCache::new(&settings.dir)?),
            CacheBackend::Disabled => return Ok(None),
        };
        Ok(Some(cache))
    }

    fn validate(&self) -> Result<()> {
        let route = self.docs.route.as_str();
        if !route.starts_with('/') {
            anyhow::bail!("docs.route '{}' must start with '/'", route);
        }
        if route == HEALTH_ROUTE {
            anyhow::bail!("docs.route must not be {}", HEALTH_ROUTE);
        }
        self.server_config(None)
            .context("invalid docs configuration")?;
        if self.cache.backend == CacheBackend::Memory && self.cache.capacity == 0 {
            anyhow::bail!("cache.capacity must be greater than zero");
        }
        Ok(())
    }
}

fn default_config_path() -> Result<PathBuf> {
    let cwd = env::current_dir().context("failed to resolve current directory")?;
    Ok(cwd.join("config").join("spec-server").join("default.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{env_guard, write_file};
    use tempfile::TempDir;

    fn load_from(contents: &str) -> Result<Settings> {
        let dir = TempDir::new().unwrap();
        let path = write_file(dir.path(), "spec-server.toml", contents);
        Settings::load(Some(path))
    }

    #[test]
    fn defaults_apply_without_file() {
        let _env = env_guard();
        let dir = TempDir::new().unwrap();

        let settings = Settings::load(Some(dir.path().join("absent.toml"))).unwrap();

        assert_eq!(settings.listen_addr(), "0.0.0.0:8080");
        assert_eq!(settings.docs.route, "/openapi.json");
        assert_eq!(settings.docs.scan_targets, vec![PathBuf::from("src")]);
        assert_eq!(settings.docs.cache_duration, 360);
        assert_eq!(settings.docs.cache_key, "api-swagger-cache");
        assert_eq!(settings.docs.scan_options.namespaces, vec!["OA", "SWG"]);
        assert_eq!(settings.cache.backend, CacheBackend::Memory);
        assert_eq!(settings.cache.capacity, 16);
        let cache = settings.build_cache().unwrap().unwrap();
        assert_eq!(cache.backend(), "memory");
    }

    #[test]
    fn cache_can_be_disabled() {
        let _env = env_guard();
        let settings = load_from(r#"[cache]
backend = "none"
"#).unwrap();

        assert_eq!(settings.cache.backend, CacheBackend::Disabled);
        assert!(settings.build_cache().unwrap().is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let _env = env_guard();
        let settings = load_from(
            r#"
[server]
host = "127.0.0.1"
port = 9100

[docs]
route = "/swagger.json"
scan_targets = ["app", "routes"]
cache_duration = 60
cache_key = "docs"

[docs.scan_options]
exclude = ["vendor"]
extensions = ["php"]
title = "Shop"

[cache]
backend = "memory"
capacity = 2
"#,
        )
        .unwrap();

        assert_eq!(settings.listen_addr(), "127.0.0.1:9100");
        assert_eq!(settings.docs.route, "/swagger.json");
        assert_eq!(
            settings.docs.scan_targets,
            vec![PathBuf::from("app"), PathBuf::from("routes")]
        );
        assert_eq!(settings.docs.scan_options.exclude, vec![PathBuf::from("vendor")]);
        assert_eq!(settings.docs.scan_options.extensions, vec!["php"]);
        assert_eq!(settings.docs.scan_options.title, "Shop");
        assert!(settings.docs.scan_options.follow_links);

        let cache = &settings.cache;
        assert_eq!(cache.backend, CacheBackend::Memory);
        assert_eq!(cache.capacity, 2);

        let config = settings.server_config(None).unwrap();
        assert_eq!(config.cache_duration(), Duration::from_secs(60));
        assert_eq!(config.cache_key(), "docs");
        assert_eq!(config.scan_target().paths().len(), 2);
    }

    #[test]
    fn env_overrides_file() {
        let mut env = env_guard();
        env.set("SPEC_SERVER__SERVER__PORT", "9200");
        env.set("SPEC_SERVER__DOCS__SCAN_TARGETS", "lib,api");
        env.set("SPEC_SERVER__DOCS__CACHE_KEY", "from-env");

        let settings = load_from("[docs]\ncache_key = \"from-file\"\n").unwrap();

        assert_eq!(settings.server.port, 9200);
        assert_eq!(
            settings.docs.scan_targets,
            vec![PathBuf::from("lib"), PathBuf::from("api")]
        );
        assert_eq!(settings.docs.cache_key, "from-env");
    }

    #[test]
    fn rejects_invalid_docs_settings() {
        let _env = env_guard();

        let err = load_from("[docs]\nroute = \"openapi.json\"\n").unwrap_err();
        assert!(err.to_string().contains("must start with '/'"));

        let err = load_from("[docs]\nroute = \"/health\"\n").unwrap_err();
        assert!(err.to_string().contains("/health"));

        let err = load_from("[docs]\ncache_duration = 0\n").unwrap_err();
        assert!(format!("{err:#}").contains("cache duration must be greater than zero"));

        let err = load_from("[docs]\ncache_key = \"\"\n").unwrap_err();
        assert!(format!("{err:#}").contains("cache key must not be empty"));

        let err = load_from("[docs]\ncache_duration = 10000000000\n").unwrap_err();
        assert!(format!("{err:#}").contains("cache duration must not exceed"));
    }

    #[test]
    fn rejects_unknown_cache_backend() {
        let _env = env_guard();
        assert!(load_from("[cache]\nbackend = \"redis\"\n").is_err());
        assert!(load_from("[cache]\nbackend = \"memory\"\ncapacity = 0\n").is_err());
    }

    #[test]
    fn builds_file_cache() {
        let _env = env_guard();
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("docs-cache");
        let settings = load_from(&format!(
            "[cache]\nbackend = \"file\"\ndir = {:?}\n",
            cache_dir.display().to_string()
        ))
        .unwrap();

        let cache = settings.build_cache().unwrap().unwrap();

        assert_eq!(cache.backend(), "file");
        assert!(cache_dir.is_dir());
    }

    #[test]
    // A file cache pointed at a regular file fails at startup instead of running uncached.
    fn broken_file_cache_is_fatal() {
        let _env = env_guard();
        let dir = TempDir::new().unwrap();
        let occupied = write_file(dir.path(), "occupied", "");
        let settings = load_from(&format!(
            "[cache]\nbackend = \"file\"\ndir = {:?}\n",
            occupied.display().to_string()
        ))
        .unwrap();

        assert!(matches!(
            settings.build_cache(),
            Err(CacheError::Directory { .. })
        ));
    }
}
