//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::fmt;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub node_env: String,

    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// PalmPay provider credentials
    pub palmpay: PalmPayConfig,

    /// Token signing settings consumed by the auth layer
    pub jwt: JwtConfig,

    /// Public base URL the provider posts webhooks to
    pub webhook_base_url: String,

    /// Frontend application settings
    pub app: AppConfig,

    /// Deposit clearance job settings
    pub clearance: ClearanceConfig,
}

/// PalmPay provider configuration
#[derive(Clone, Default)]
pub struct PalmPayConfig {
    pub base_url: String,
    pub api_key: String,
    pub public_key: String,
    pub private_key: String,
    pub webhook_secret: String,
}

impl fmt::Debug for PalmPayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PalmPayConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("public_key", &redact(&self.public_key))
            .field("private_key", &redact(&self.private_key))
            .field("webhook_secret", &redact(&self.webhook_secret))
            .finish()
    }
}

/// JWT configuration
#[derive(Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub expires_in: String,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &redact(&self.secret))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Frontend application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub url: String,
}

/// Deposit clearance job configuration
#[derive(Debug, Clone)]
pub struct ClearanceConfig {
    /// Time between sweeps (default: 1 minute)
    pub interval: Duration,
    /// Maximum deposits cleared per sweep
    pub batch_size: i64,
    /// Age after which a held lock may be taken over. `None` means a stuck
    /// lock stays held until released manually.
    pub lock_lease: Option<Duration>,
}

impl Default for ClearanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 100,
            lock_lease: None,
        }
    }
}

const DEFAULT_PORT: &str = "5000";
const DEFAULT_PALMPAY_BASE_URL: &str = "https://open-gw-prod.palmpay-inc.com";

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let host = var("HOST", "127.0.0.1");

        let port: u16 = var("PORT", DEFAULT_PORT)
            .parse()
            .map_err(|_| ConfigError::InvalidValue("PORT"))?;

        let node_env = var("NODE_ENV", "development");

        let database_url = lookup("DATABASE_URL")
            .or_else(|| lookup("MONGODB_URI"))
            .ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = var("DATABASE_MAX_CONNECTIONS", "10")
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS"))?;

        let palmpay = PalmPayConfig {
            base_url: var("PALMPAY_BASE_URL", DEFAULT_PALMPAY_BASE_URL),
            api_key: var("PALMPAY_API_KEY", ""),
            public_key: var("PALMPAY_PUBLIC_KEY", ""),
            private_key: var("PALMPAY_PRIVATE_KEY", ""),
            webhook_secret: var("PALMPAY_WEBHOOK_SECRET", ""),
        };

        let jwt_secret = lookup("JWT_SECRET");
        if node_env == "production" && jwt_secret.is_none() {
            return Err(ConfigError::MissingEnv("JWT_SECRET"));
        }
        let jwt = JwtConfig {
            secret: jwt_secret.unwrap_or_else(|| "dev-secret-change-me".to_string()),
            expires_in: var("JWT_EXPIRES_IN", "7d"),
        };

        let webhook_base_url = lookup("WEBHOOK_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", port));

        let app = AppConfig {
            url: var("APP_URL", "http://localhost:3000"),
        };

        let interval_secs: u64 = var("CLEARANCE_INTERVAL_SECS", "60")
            .parse()
            .map_err(|_| ConfigError::InvalidValue("CLEARANCE_INTERVAL_SECS"))?;
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue("CLEARANCE_INTERVAL_SECS"));
        }

        let batch_size: i64 = var("CLEARANCE_BATCH_SIZE", "100")
            .parse()
            .map_err(|_| ConfigError::InvalidValue("CLEARANCE_BATCH_SIZE"))?;
        if batch_size <= 0 {
            return Err(ConfigError::InvalidValue("CLEARANCE_BATCH_SIZE"));
        }

        let lock_lease = match lookup("CLEARANCE_LOCK_LEASE_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("CLEARANCE_LOCK_LEASE_SECS"))?;
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            host,
            port,
            node_env,
            database_url,
            database_max_connections,
            palmpay,
            jwt,
            webhook_base_url,
            app,
            clearance: ClearanceConfig {
                interval: Duration::from_secs(interval_secs),
                batch_size,
                lock_lease,
            },
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.node_env == "production"
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "[REDACTED]"
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
