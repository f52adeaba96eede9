//! Refresher configuration.

use std::str::FromStr;
use std::time::Duration;

use ratekeeper_common::defaults;
use ratekeeper_fx::GatewayKind;

/// Deployment environment. Selects the log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Human readable logs.
    Local,
    /// JSON logs.
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Local" => Ok(Environment::Local),
            "Production" => Ok(Environment::Production),
            other => Err(format!("Invalid environment value: {other}")),
        }
    }
}

/// Where rate requests are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local store, lost on exit.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("Unknown store backend: {other}")),
        }
    }
}

/// Database connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Full connection URL. Takes precedence over the individual parts.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub name: String,
    /// Pool size.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            name: "ratekeeper".to_string(),
            max_connections: 10,
        }
    }
}

impl DatabaseConfig {
    /// Connection URL, assembled from the parts unless given whole.
    pub fn connection_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.username, self.password, self.host, self.port, self.name
            ),
        }
    }
}

/// Main refresher configuration.
#[derive(Debug, Clone)]
pub struct RefresherConfig {
    /// Seconds between refresh cycles.
    pub refresh_interval_secs: u64,
    /// Pending requests claimed per cycle.
    pub batch_size: usize,
    /// Timeout for each provider call.
    pub http_timeout: Duration,
    /// Storage backend.
    pub store_backend: StoreBackend,
    /// Database configuration, used by the postgres backend.
    pub database: DatabaseConfig,
    /// Rate provider.
    pub gateway_kind: GatewayKind,
    /// Frankfurter API base URL.
    pub frankfurter_api_url: String,
    /// Requeue processing requests untouched for this long. Disabled when unset.
    pub stale_processing_timeout: Option<Duration>,
    /// Deployment environment.
    pub environment: Environment,
    /// Log level, overridden by `RUST_LOG`.
    pub log_level: String,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: defaults::REFRESH_INTERVAL.as_secs(),
            batch_size: defaults::BATCH_SIZE,
            http_timeout: defaults::HTTP_TIMEOUT,
            store_backend: StoreBackend::Postgres,
            database: DatabaseConfig::default(),
            gateway_kind: GatewayKind::Frankfurter,
            frankfurter_api_url: "https://api.frankfurter.dev".to_string(),
            stale_processing_timeout: None,
            environment: Environment::Local,
            log_level: "info".to_string(),
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("{key} has an invalid value: {value}"))
}

impl RefresherConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = lookup("RATES_UPDATE_CRON_IN_SECONDS") {
            config.refresh_interval_secs = parse("RATES_UPDATE_CRON_IN_SECONDS", &secs)?;
        }

        if let Some(size) = lookup("RATES_UPDATE_BATCH_SIZE") {
            config.batch_size = parse("RATES_UPDATE_BATCH_SIZE", &size)?;
        }

        if let Some(secs) = lookup("HTTP_CLIENTS_DEFAULT_TIMEOUT_IN_SECONDS") {
            let secs: u64 = parse("HTTP_CLIENTS_DEFAULT_TIMEOUT_IN_SECONDS", &secs)?;
            config.http_timeout = Duration::from_secs(secs);
        }

        if let Some(backend) = lookup("STORE_BACKEND") {
            config.store_backend = backend.parse()?;
        }

        config.database.url = lookup("DATABASE_URL").filter(|url| !url.is_empty());
        if let Some(host) = lookup("DATABASE_HOST") {
            config.database.host = host;
        }
        if let Some(port) = lookup("DATABASE_PORT") {
            config.database.port = parse("DATABASE_PORT", &port)?;
        }
        if let Some(username) = lookup("DATABASE_USERNAME") {
            config.database.username = username;
        }
        if let Some(password) = lookup("DATABASE_PASSWORD") {
            config.database.password = password;
        }
        if let Some(name) = lookup("DATABASE_NAME") {
            config.database.name = name;
        }
        if let Some(max) = lookup("DATABASE_MAX_CONNECTIONS") {
            config.database.max_connections = parse("DATABASE_MAX_CONNECTIONS", &max)?;
        }

        if let Some(kind) = lookup("RATES_API_TYPE") {
            // Unknown kinds fall back to the fixed table.
            config.gateway_kind = kind.parse().unwrap_or(GatewayKind::Fixed);
        }

        if let Some(url) = lookup("FRANKFURTER_API_URL") {
            config.frankfurter_api_url = url;
        }

        if let Some(secs) = lookup("STALE_PROCESSING_TIMEOUT_IN_SECONDS") {
            let secs: u64 = parse("STALE_PROCESSING_TIMEOUT_IN_SECONDS", &secs)?;
            config.stale_processing_timeout = Some(Duration::from_secs(secs));
        }

        if let Some(environment) = lookup("ENVIRONMENT") {
            config.environment = environment.parse()?;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        Ok(config)
    }

    /// Interval between refresh cycles.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        let interval = defaults::MIN_REFRESH_INTERVAL_SECS..=defaults::MAX_REFRESH_INTERVAL_SECS;
        if !interval.contains(&self.refresh_interval_secs) {
            return Err(format!(
                "Refresh interval must be between {} and {} seconds, got {}",
                interval.start(),
                interval.end(),
                self.refresh_interval_secs
            ));
        }

        let batch = defaults::MIN_BATCH_SIZE..=defaults::MAX_BATCH_SIZE;
        if !batch.contains(&self.batch_size) {
            return Err(format!(
                "Batch size must be between {} and {}, got {}",
                batch.start(),
                batch.end(),
                self.batch_size
            ));
        }

        if self.http_timeout.is_zero() {
            return Err("HTTP timeout cannot be 0".to_string());
        }

        if self.store_backend == StoreBackend::Postgres {
            if self.database.max_connections == 0 {
                return Err("Database pool needs at least one connection".to_string());
            }
            if self.database.url.is_none() && self.database.host.is_empty() {
                return Err("Database host cannot be empty".to_string());
            }
        }

        if self.gateway_kind == GatewayKind::Frankfurter && self.frankfurter_api_url.is_empty() {
            return Err("Frankfurter API URL cannot be empty".to_string());
        }

        // A request still held by a running cycle must never look stale.
        if let Some(timeout) = self.stale_processing_timeout {
            let floor = self.http_timeout + defaults::STALE_PROCESSING_MARGIN;
            if timeout <= floor {
                return Err(format!(
                    "Stale processing timeout must exceed {}s (HTTP timeout plus {}s), got {}s",
                    floor.as_secs(),
                    defaults::STALE_PROCESSING_MARGIN.as_secs(),
                    timeout.as_secs()
                ));
            }
        }

        Ok(())
    }
}
