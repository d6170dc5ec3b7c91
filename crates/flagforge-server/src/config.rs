//! Layered configuration: built-in defaults, an optional TOML file, then
//! environment variables (`FLAGFORGE_SERVER_*`), each overriding the last.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::{debug, info, trace};

/// Fully resolved, ready-to-use configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub staleness: StalenessConfig,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8080 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpConfigLayer {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl HttpConfigLayer {
    fn merge(&mut self, other: HttpConfigLayer) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
    }

    fn finalize(self) -> HttpConfig {
        let defaults = HttpConfig::default();
        HttpConfig {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite:./flagforge.db".to_string() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfigLayer {
    #[serde(default)]
    pub url: Option<String>,
}

impl DatabaseConfigLayer {
    fn merge(&mut self, other: DatabaseConfigLayer) {
        if other.url.is_some() {
            self.url = other.url;
        }
    }

    fn finalize(self) -> DatabaseConfig {
        DatabaseConfig { url: self.url.unwrap_or_else(|| DatabaseConfig::default().url) }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    /// `"pretty"` for human-readable output, `"json"` for structured logs.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfigLayer {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

impl LoggingConfigLayer {
    fn merge(&mut self, other: LoggingConfigLayer) {
        if other.level.is_some() {
            self.level = other.level;
        }
        if other.format.is_some() {
            self.format = other.format;
        }
    }

    fn finalize(self) -> LoggingConfig {
        let defaults = LoggingConfig::default();
        LoggingConfig {
            level: self.level.unwrap_or(defaults.level),
            format: self.format.unwrap_or(defaults.format),
        }
    }
}

/// Knobs for the staleness sweep; the per-purpose lifetime defaults
/// themselves live in `flagforge_server::staleness` and are overridable per
/// project via `ProjectSettings`, not through this file.
#[derive(Debug, Clone)]
pub struct StalenessConfig {
    pub tick_interval_secs: u64,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self { tick_interval_secs: 3600 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StalenessConfigLayer {
    #[serde(default)]
    pub tick_interval_secs: Option<u64>,
}

impl StalenessConfigLayer {
    fn merge(&mut self, other: StalenessConfigLayer) {
        if other.tick_interval_secs.is_some() {
            self.tick_interval_secs = other.tick_interval_secs;
        }
    }

    fn finalize(self) -> StalenessConfig {
        StalenessConfig { tick_interval_secs: self.tick_interval_secs.unwrap_or(StalenessConfig::default().tick_interval_secs) }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("failed to parse TOML config at {path}: {source}")]
    TomlParse { path: PathBuf, #[source] source: toml::de::Error },

    #[error("failed to read config file {path}: {source}")]
    FileRead { path: PathBuf, #[source] source: std::io::Error },
}

/// A partial configuration, with every field optional so that sources can
/// be merged in precedence order without clobbering unset fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfigLayer {
    #[serde(default)]
    pub http: Option<HttpConfigLayer>,
    #[serde(default)]
    pub database: Option<DatabaseConfigLayer>,
    #[serde(default)]
    pub logging: Option<LoggingConfigLayer>,
    #[serde(default)]
    pub staleness: Option<StalenessConfigLayer>,
}

impl ServerConfigLayer {
    pub fn merge(&mut self, other: ServerConfigLayer) {
        merge_option(&mut self.http, other.http, HttpConfigLayer::merge);
        merge_option(&mut self.database, other.database, DatabaseConfigLayer::merge);
        merge_option(&mut self.logging, other.logging, LoggingConfigLayer::merge);
        merge_option(&mut self.staleness, other.staleness, StalenessConfigLayer::merge);
    }
}

fn merge_option<T, F: FnOnce(&mut T, T)>(target: &mut Option<T>, source: Option<T>, merge_fn: F) {
    match (target.as_mut(), source) {
        (Some(t), Some(s)) => merge_fn(t, s),
        (None, Some(s)) => *target = Some(s),
        _ => {}
    }
}

fn finalize(layer: ServerConfigLayer) -> ServerConfig {
    let http = layer.http.unwrap_or_default().finalize();
    let database = layer.database.unwrap_or_default().finalize();
    let logging = layer.logging.unwrap_or_default().finalize();
    let staleness = layer.staleness.unwrap_or_default().finalize();

    info!(host = %http.host, port = http.port, database = %database.url, tick_interval_secs = staleness.tick_interval_secs, "server configuration loaded");

    ServerConfig { http, database, logging, staleness }
}

/// Source precedence levels (higher overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    Defaults = 10,
    ConfigFile = 20,
    Environment = 50,
}

pub trait ConfigSource: Send + Sync {
    fn name(&self) -> &'static str;
    fn precedence(&self) -> Precedence;
    fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
    fn name(&self) -> &'static str {
        "defaults"
    }

    fn precedence(&self) -> Precedence {
        Precedence::Defaults
    }

    fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
        Ok(ServerConfigLayer::default())
    }
}

pub struct TomlSource {
    path: PathBuf,
}

impl TomlSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn system() -> Self {
        Self::new("/etc/flagforge/server.toml")
    }
}

impl ConfigSource for TomlSource {
    fn name(&self) -> &'static str {
        "toml-config"
    }

    fn precedence(&self) -> Precedence {
        Precedence::ConfigFile
    }

    fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "config file not found, skipping");
            return Ok(ServerConfigLayer::default());
        }

        debug!(path = %self.path.display(), "loading config file");
        let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead { path: self.path.clone(), source: e })?;
        let layer: ServerConfigLayer = toml::from_str(&content).map_err(|e| ConfigError::TomlParse { path: self.path.clone(), source: e })?;
        trace!("parsed config layer from TOML");
        Ok(layer)
    }
}

/// Convention: `FLAGFORGE_SERVER_<SECTION>_<FIELD>`.
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn precedence(&self) -> Precedence {
        Precedence::Environment
    }

    fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
        Ok(ServerConfigLayer {
            http: Some(HttpConfigLayer {
                host: env_var("FLAGFORGE_SERVER_HOST"),
                port: env_u16("FLAGFORGE_SERVER_PORT")?,
            }),
            database: Some(DatabaseConfigLayer { url: env_var("FLAGFORGE_SERVER_DATABASE_URL") }),
            logging: Some(LoggingConfigLayer {
                level: env_var("FLAGFORGE_SERVER_LOG_LEVEL"),
                format: env_var("FLAGFORGE_SERVER_LOG_FORMAT"),
            }),
            staleness: Some(StalenessConfigLayer { tick_interval_secs: env_u64("FLAGFORGE_SERVER_STALENESS_TICK_INTERVAL_SECS")? }),
        })
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_u16(name: &str) -> Result<Option<u16>, ConfigError> {
    match env_var(name) {
        Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue { key: name.to_string(), message: format!("invalid u16 value '{v}'") }),
        None => Ok(None),
    }
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
    match env_var(name) {
        Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue { key: name.to_string(), message: format!("invalid u64 value '{v}'") }),
        None => Ok(None),
    }
}

/// Load configuration from all sources with standard precedence:
/// environment variables, then `/etc/flagforge/server.toml`, then defaults.
pub fn load_config() -> Result<ServerConfig, ConfigError> {
    load_config_with_file(TomlSource::system().path)
}

pub fn load_config_with_file(config_path: impl Into<PathBuf>) -> Result<ServerConfig, ConfigError> {
    let mut sources: Vec<Box<dyn ConfigSource>> = vec![Box::new(DefaultsSource), Box::new(TomlSource::new(config_path.into())), Box::new(EnvSource)];
    sources.sort_by_key(|s| s.precedence());

    let mut merged = ServerConfigLayer::default();
    for source in sources {
        debug!(source = source.name(), "loading configuration source");
        merged.merge(source.load()?);
    }

    Ok(finalize(merged))
}
