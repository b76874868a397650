use crate::error::{EgressError, Result};
use crate::proxy::{CooldownPolicy, ExecutorConfig};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiServerConfig,
    /// Where providers, rules and secrets are persisted
    pub storage: StorageKind,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Admin credentials
    pub admin: AdminConfig,
    /// Logging configuration
    pub log: LogConfig,
    /// Routing and failover defaults
    pub router: RouterConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Postgres,
    Memory,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Postgres => "postgres",
            StorageKind::Memory => "memory",
        }
    }
}

impl FromStr for StorageKind {
    type Err = EgressError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(StorageKind::Postgres),
            "memory" | "mem" => Ok(StorageKind::Memory),
            other => Err(EgressError::Configuration(format!(
                "EGRESS_STORAGE must be 'postgres' or 'memory', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the API server (default: 8001)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Allowed CORS origins (comma-separated, empty = localhost only)
    pub cors_origins: Vec<String>,
    /// JWT secret for token generation
    pub jwt_secret: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    /// SSL mode (disable, require, prefer)
    pub ssl_mode: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl DatabaseConfig {
    /// Connection URL
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.name, self.ssl_mode
        )
    }
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Operator login for the REST API
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    /// Retries after the first attempt when a call does not say
    pub max_retries: u32,
    /// Per-attempt timeout in seconds
    pub request_timeout_secs: u64,
    /// Sticky session lifetime in minutes
    pub sticky_duration_mins: u32,
    /// Echo endpoint used by provider tests
    pub echo_url: String,
    /// Consecutive failures before a cooldown (0 disables)
    pub cooldown_failures: u32,
    pub cooldown_secs: u64,
    /// Background sweep of expired sessions in seconds (0 disables)
    pub session_sweep_interval_secs: u64,
    pub user_agent: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            request_timeout_secs: 30,
            sticky_duration_mins: 10,
            echo_url: "https://api.ipify.org?format=json".to_string(),
            cooldown_failures: 5,
            cooldown_secs: 60,
            session_sweep_interval_secs: 60,
            user_agent: concat!("egress-router/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl RouterConfig {
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_retries: self.max_retries,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            sticky_duration: Duration::from_secs(u64::from(self.sticky_duration_mins) * 60),
        }
    }

    pub fn cooldown_policy(&self) -> CooldownPolicy {
        if self.cooldown_failures == 0 {
            return CooldownPolicy::disabled();
        }
        CooldownPolicy {
            failure_threshold: self.cooldown_failures,
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = RouterConfig::default();

        let config = Config {
            api: ApiServerConfig {
                port: parse_env("API_PORT", 8001, "a valid port number")?,
                host: get_env_or("API_HOST", "0.0.0.0"),
                cors_origins: get_env_or("CORS_ORIGINS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                jwt_secret: get_env_or("JWT_SECRET", ""),
            },
            storage: get_env_or("EGRESS_STORAGE", "postgres").parse()?,
            database: DatabaseConfig {
                host: get_env_or("DB_HOST", "localhost"),
                port: parse_env("DB_PORT", 5432, "a valid port number")?,
                user: get_env_or("DB_USER", "egress"),
                password: get_env_or("DB_PASSWORD", "egress_password"),
                name: get_env_or("DB_NAME", "egress"),
                ssl_mode: get_env_or("DB_SSLMODE", "disable"),
                max_connections: parse_env("DB_MAX_CONNECTIONS", 20, "a valid number")?,
                min_connections: parse_env("DB_MIN_CONNECTIONS", 2, "a valid number")?,
            },
            admin: AdminConfig {
                username: get_env_or("EGRESS_ADMIN_USER", "admin"),
                password: get_env_or("EGRESS_ADMIN_PASSWORD", "admin"),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
            router: RouterConfig {
                max_retries: parse_env("ROUTER_MAX_RETRIES", defaults.max_retries, "a valid number")?,
                request_timeout_secs: parse_env(
                    "ROUTER_REQUEST_TIMEOUT",
                    defaults.request_timeout_secs,
                    "a number of seconds",
                )?,
                sticky_duration_mins: parse_env(
                    "ROUTER_STICKY_DURATION",
                    defaults.sticky_duration_mins,
                    "a number of minutes",
                )?,
                echo_url: get_env_or("ROUTER_ECHO_URL", &defaults.echo_url),
                cooldown_failures: parse_env(
                    "ROUTER_COOLDOWN_FAILURES",
                    defaults.cooldown_failures,
                    "a valid number",
                )?,
                cooldown_secs: parse_env(
                    "ROUTER_COOLDOWN_SECS",
                    defaults.cooldown_secs,
                    "a number of seconds",
                )?,
                session_sweep_interval_secs: parse_env(
                    "ROUTER_SESSION_SWEEP_INTERVAL",
                    defaults.session_sweep_interval_secs,
                    "a number of seconds",
                )?,
                user_agent: get_env_or("ROUTER_USER_AGENT", &defaults.user_agent),
            },
        };

        if config.router.request_timeout_secs == 0 {
            return Err(EgressError::Configuration(
                "ROUTER_REQUEST_TIMEOUT must be at least 1 second".into(),
            ));
        }
        if config.router.sticky_duration_mins == 0 {
            return Err(EgressError::Configuration(
                "ROUTER_STICKY_DURATION must be at least 1 minute".into(),
            ));
        }
        url::Url::parse(&config.router.echo_url).map_err(|e| {
            EgressError::Configuration(format!("ROUTER_ECHO_URL must be a valid URL: {}", e))
        })?;

        Ok(config)
    }

    /// Get the database connection URL
    pub fn database_url(&self) -> String {
        self.database.url()
    }

    /// Get the API server address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, failing loudly on garbage
fn parse_env<T: FromStr>(key: &str, default: T, expected: &str) -> Result<T> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| EgressError::Configuration(format!("{} must be {}", key, expected))),
        _ => Ok(default),
    }
}
