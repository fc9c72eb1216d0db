//! Database and pool configuration
//!
//! Database settings come from the process environment (optionally primed
//! from an `app.env` file by the binary). Every key is required.

use std::fmt;

use thiserror::Error;

pub const DB_SERVICE: &str = "DB_SERVICE";
pub const DB_USERNAME: &str = "DB_USERNAME";
pub const DB_PASSWORD: &str = "DB_PASSWORD";
pub const DB_SERVER: &str = "DB_SERVER";
pub const DB_PORT: &str = "DB_PORT";

/// Configuration error. Always fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing configuration key {key}")]
    Missing { key: &'static str },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("invalid pool limits: {reason}")]
    Pool { reason: &'static str },
}

/// Connection settings for the backing store
#[derive(Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub service: String,
    pub username: String,
    pub password: String,
    pub server: String,
    pub port: u16,
}

impl DbConfig {
    /// Read all keys from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read all keys through `lookup`. Blank values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &'static str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing { key })
        };

        let raw_port = get(DB_PORT)?;
        let port = raw_port.parse::<u16>().map_err(|e| ConfigError::Invalid {
            key: DB_PORT,
            reason: format!("'{}' is not a port number: {}", raw_port, e),
        })?;

        Ok(Self {
            service: get(DB_SERVICE)?,
            username: get(DB_USERNAME)?,
            password: get(DB_PASSWORD)?,
            server: get(DB_SERVER)?,
            port,
        })
    }

    /// Connection string with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        format!(
            "postgres://{}:***@{}:{}/{}",
            self.username, self.server, self.port, self.service
        )
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("service", &self.service)
            .field("username", &self.username)
            .field("password", &"***")
            .field("server", &self.server)
            .field("port", &self.port)
            .finish()
    }
}

/// Default ceiling on simultaneously open connections.
pub const DEFAULT_MAX_OPEN: usize = 8;

/// Default ceiling on parked idle connections.
pub const DEFAULT_MAX_IDLE: usize = 5;

/// Connection pool limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Most connections that may exist at once, borrowed or idle
    pub max_open: usize,
    /// Most connections kept around while nobody is using them
    pub max_idle: usize,
}

impl PoolConfig {
    pub fn new(max_open: usize, max_idle: usize) -> Result<Self, ConfigError> {
        let config = Self { max_open, max_idle };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_open == 0 {
            return Err(ConfigError::Pool {
                reason: "max_open must be at least 1",
            });
        }
        if self.max_idle > self.max_open {
            return Err(ConfigError::Pool {
                reason: "max_idle cannot exceed max_open",
            });
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: DEFAULT_MAX_OPEN,
            max_idle: DEFAULT_MAX_IDLE,
        }
    }
}
