use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Runtime settings for the MCP server, read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub database_url: String,
    /// Idle interval after which an SSE stream receives a `ping` event
    pub keepalive: Duration,
    pub session_queue_capacity: usize,
    /// How long a producer waits for room in a full session queue
    pub session_send_timeout: Duration,
    pub log_capacity: usize,
    pub log_listener_capacity: usize,
    pub sql_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 8000,
            database_url: String::new(),
            keepalive: Duration::from_secs(30),
            session_queue_capacity: 100,
            session_send_timeout: Duration::from_secs(30),
            log_capacity: 100,
            log_listener_capacity: 100,
            sql_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url = env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            host: parse_var("HOST", defaults.host)?,
            port: parse_var("PORT", defaults.port)?,
            database_url,
            keepalive: secs_var("MCP_KEEPALIVE_SECS", defaults.keepalive)?,
            session_queue_capacity: positive_var(
                "MCP_SESSION_QUEUE_CAPACITY",
                defaults.session_queue_capacity,
            )?,
            session_send_timeout: secs_var(
                "MCP_SESSION_SEND_TIMEOUT_SECS",
                defaults.session_send_timeout,
            )?,
            log_capacity: positive_var("MCP_LOG_CAPACITY", defaults.log_capacity)?,
            log_listener_capacity: positive_var(
                "MCP_LOG_LISTENER_CAPACITY",
                defaults.log_listener_capacity,
            )?,
            sql_timeout: secs_var("MCP_SQL_TIMEOUT_SECS", defaults.sql_timeout)?,
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_var<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        _ => Ok(default),
    }
}

fn positive_var(key: &'static str, default: usize) -> Result<usize, ConfigError> {
    let value = parse_var(key, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
        });
    }
    Ok(value)
}

fn secs_var(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    positive_var(key, default.as_secs() as usize).map(|secs| Duration::from_secs(secs as u64))
}
