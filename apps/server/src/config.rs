//! Server configuration
//!
//! Values are layered, lowest precedence first:
//! 1. built-in defaults
//! 2. `clinicq.toml` in the working directory (or the file named by `CLINICQ_CONFIG`)
//! 3. environment variables such as `CLINICQ__SERVER__PORT=9090`
//!
//! A `.env` file is loaded into the process environment before anything else.

use clinicq_core::OrderingPolicy;
use config::{builder::DefaultState, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

pub const CONFIG_PATH_ENV: &str = "CLINICQ_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "clinicq.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub queue: QueueConfig,
    pub realtime: RealtimeConfig,
    pub rate_limit: RateLimitConfig,
    pub billing: BillingConfig,
    pub workers: WorkerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub max_request_body_size: usize,
    /// Base URL of the patient-facing frontend, used for check-in links.
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
            max_request_body_size: 1024 * 1024,
            public_base_url: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: StorageBackend,
    pub url: String,
    pub pool_min_size: u32,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Postgres,
            url: String::new(),
            pool_min_size: 1,
            pool_max_size: 10,
            pool_timeout_seconds: 30,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
    pub issuer: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_minutes: 12 * 60,
            issuer: "clinicq".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub ordering_policy: OrderingPolicy,
    /// Used for wait estimates until a clinic has completed consultations today.
    pub default_avg_consultation_minutes: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ordering_policy: OrderingPolicy::Arrival,
            default_avg_consultation_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub channel_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_window: u32,
    pub window_seconds: u64,
    /// Peers whose `x-forwarded-for` / `x-real-ip` headers are believed.
    /// Everyone else is keyed on the socket address.
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: 30,
            window_seconds: 60,
            trusted_proxies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Shared secret for payment webhook signatures. Webhooks are refused while empty.
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Run the sweeper inside the server process.
    pub enabled: bool,
    pub sweep_interval_seconds: u64,
    /// Appointments still open this long after their end are marked NO_SHOW.
    pub appointment_grace_minutes: i64,
    pub backoff_initial_seconds: u64,
    pub backoff_max_seconds: u64,
    pub backoff_jitter_ratio: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_seconds: 300,
            appointment_grace_minutes: 60,
            backoff_initial_seconds: 1,
            backoff_max_seconds: 60,
            backoff_jitter_ratio: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub file_enabled: bool,
    pub file_directory: String,
    pub file_prefix: String,
    /// daily, hourly, minutely or never
    pub file_rotation: String,
    pub opentelemetry_enabled: bool,
    pub otlp_endpoint: String,
    pub otlp_timeout_seconds: u64,
    pub trace_sample_ratio: f64,
    pub service_name: String,
    pub service_version: Option<String>,
    pub deployment_environment: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_enabled: false,
            file_directory: "logs".to_string(),
            file_prefix: "clinicq".to_string(),
            file_rotation: "daily".to_string(),
            opentelemetry_enabled: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            otlp_timeout_seconds: 10,
            trace_sample_ratio: 1.0,
            service_name: "clinicq".to_string(),
            service_version: None,
            deployment_environment: "development".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `.env`, the config file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(path)
    }

    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if path.exists() {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(
            Environment::with_prefix("CLINICQ")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .with_list_parse_key("rate_limit.trusted_proxies"),
        );
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be non-zero".to_string());
        }
        if self.auth.jwt_secret.trim().is_empty() {
            return Err("auth.jwt_secret must be set".to_string());
        }
        if self.auth.token_ttl_minutes <= 0 {
            return Err("auth.token_ttl_minutes must be positive".to_string());
        }
        if self.database.backend == StorageBackend::Postgres && self.database.url.trim().is_empty()
        {
            return Err("database.url is required for the postgres backend".to_string());
        }
        if self.database.pool_max_size == 0 {
            return Err("database.pool_max_size must be non-zero".to_string());
        }
        if self.rate_limit.enabled
            && (self.rate_limit.window_seconds == 0 || self.rate_limit.requests_per_window == 0)
        {
            return Err(
                "rate_limit.window_seconds and rate_limit.requests_per_window must be non-zero"
                    .to_string(),
            );
        }
        if self.queue.default_avg_consultation_minutes <= 0 {
            return Err("queue.default_avg_consultation_minutes must be positive".to_string());
        }
        if self.realtime.channel_capacity == 0 {
            return Err("realtime.channel_capacity must be non-zero".to_string());
        }
        if self.workers.sweep_interval_seconds == 0 {
            return Err("workers.sweep_interval_seconds must be non-zero".to_string());
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn valid() -> Config {
        let mut config = Config::default();
        config.auth.jwt_secret = "secret".to_string();
        config.database.backend = StorageBackend::Memory;
        config
    }

    #[test]
    fn test_defaults_require_secret() {
        assert!(Config::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = valid();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.database.backend = StorageBackend::Postgres;
        assert!(config.validate().unwrap_err().contains("database.url"));

        let mut config = valid();
        config.rate_limit.window_seconds = 0;
        assert!(config.validate().is_err());
        config.rate_limit.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_sections_override_defaults() {
        let toml = r#"
            [server]
            port = 9090

            [database]
            backend = "memory"

            [queue]
            ordering_policy = "preserve_manual"
            default_avg_consultation_minutes = 20
        "#;
        let builder = config::Config::builder().add_source(File::from_str(toml, FileFormat::Toml));
        let config = Config::from_builder(builder).unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.database.backend, StorageBackend::Memory);
        assert_eq!(config.queue.ordering_policy, OrderingPolicy::PreserveManual);
        assert_eq!(config.queue.default_avg_consultation_minutes, 20);
        // Untouched sections keep their defaults.
        assert_eq!(config.rate_limit.requests_per_window, 30);
    }

    #[test]
    fn test_socket_addr() {
        let mut config = valid();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 3001;
        assert_eq!(config.socket_addr().unwrap().port(), 3001);
    }
}
