//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use cribbage::{db::DatabaseConfig, matches::ManagerConfig};
use std::net::SocketAddr;

/// Default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:8121";

/// Minimum JWT secret length.
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Where match state lives
    pub storage: StorageConfig,
    /// JWT verification secret
    pub jwt_secret: String,
    /// Lock timeout and broadcast buffer
    pub manager: ManagerConfig,
    /// Prometheus scrape endpoint, off unless set
    pub metrics_bind: Option<SocketAddr>,
}

/// Backing store for matches
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Postgres(DatabaseConfig),
    /// In-process only; everything is lost on restart.
    Memory,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    /// * `memory` - Use the in-memory store instead of Postgres
    ///
    /// # Returns
    ///
    /// * `Result<ServerConfig, ConfigError>` - Loaded configuration or error
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
        memory: bool,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => parse_addr("SERVER_BIND")?.map_or_else(default_bind, Ok)?,
        };

        let storage = if memory {
            StorageConfig::Memory
        } else {
            let database_url = database_url_override
                .or_else(|| std::env::var("DATABASE_URL").ok())
                .unwrap_or_else(|| DatabaseConfig::development().database_url);
            let database =
                DatabaseConfig::with_url(database_url).map_err(|e| ConfigError::Invalid {
                    var: "DB_*".to_string(),
                    reason: e.to_string(),
                })?;
            StorageConfig::Postgres(database)
        };

        let jwt_secret = std::env::var("JWT_SECRET").map_err(|_| ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Generate with: openssl rand -hex 32".to_string(),
        })?;

        let config = ServerConfig {
            bind,
            storage,
            jwt_secret,
            manager: ManagerConfig::from_env(),
            metrics_bind: parse_addr("METRICS_BIND")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// # Returns
    ///
    /// * `Result<(), ConfigError>` - Success or validation error
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET".to_string(),
                reason: format!("Must be at least {MIN_JWT_SECRET_LEN} characters"),
            });
        }

        self.manager
            .validate()
            .map_err(|reason| ConfigError::Invalid {
                var: "MATCH_LOCK_TIMEOUT_MS/BROADCAST_BUFFER".to_string(),
                reason,
            })?;

        if let StorageConfig::Postgres(database) = &self.storage
            && database.min_connections > database.max_connections
        {
            return Err(ConfigError::Invalid {
                var: "DB_MIN_CONNECTIONS".to_string(),
                reason: format!(
                    "Cannot exceed DB_MAX_CONNECTIONS ({})",
                    database.max_connections
                ),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

fn default_bind() -> Result<SocketAddr, ConfigError> {
    DEFAULT_BIND.parse().map_err(|_| ConfigError::Invalid {
        var: "SERVER_BIND".to_string(),
        reason: format!("default {DEFAULT_BIND} is not an address"),
    })
}

/// Reads an optional socket address; set but unparseable is an error.
fn parse_addr(key: &str) -> Result<Option<SocketAddr>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value.parse().map(Some).map_err(|_| ConfigError::Invalid {
            var: key.to_string(),
            reason: format!("{value:?} is not an IP:PORT address"),
        }),
        Err(_) => Ok(None),
    }
}
