//! Process configuration, from defaults and `KANBAN_*` environment variables.
//!
//! | Variable                         | Field                                |
//! |----------------------------------|--------------------------------------|
//! | `KANBAN_BIND_ADDR`               | `server.bind_addr`                   |
//! | `KANBAN_QUEUE_CAPACITY`          | `hub.queue_capacity`                 |
//! | `KANBAN_PONG_WAIT_SECS`          | `server.connection.pong_wait`        |
//! | `KANBAN_PING_PERIOD_SECS`        | `server.connection.ping_period`      |
//! | `KANBAN_WRITE_WAIT_SECS`         | `server.connection.write_wait`       |
//! | `KANBAN_NORMALIZE_INTERVAL_SECS` | `normalizer.interval`                |
//!
//! Unset variables keep their defaults. Setting only the pong wait moves the
//! ping period along with it.

use std::time::Duration;
use thiserror::Error;

use crate::connection::ConnectionConfig;
use crate::hub::HubConfig;
use crate::normalizer::NormalizerConfig;
use crate::server::ServerConfig;

pub const BIND_ADDR: &str = "KANBAN_BIND_ADDR";
pub const QUEUE_CAPACITY: &str = "KANBAN_QUEUE_CAPACITY";
pub const PONG_WAIT_SECS: &str = "KANBAN_PONG_WAIT_SECS";
pub const PING_PERIOD_SECS: &str = "KANBAN_PING_PERIOD_SECS";
pub const WRITE_WAIT_SECS: &str = "KANBAN_WRITE_WAIT_SECS";
pub const NORMALIZE_INTERVAL_SECS: &str = "KANBAN_NORMALIZE_INTERVAL_SECS";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is not a valid number")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },

    #[error("ping period {ping:?} must be shorter than pong wait {pong:?}")]
    PingNotBeforePong { ping: Duration, pong: Duration },
}

/// Everything the collaboration layer needs to start.
#[derive(Debug, Clone, Default)]
pub struct CollabConfig {
    pub server: ServerConfig,
    pub hub: HubConfig,
    pub normalizer: NormalizerConfig,
}

impl CollabConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup(BIND_ADDR).filter(|v| !v.trim().is_empty()) {
            config.server.bind_addr = addr.trim().to_string();
        }
        if let Some(capacity) = number(&lookup, QUEUE_CAPACITY)? {
            config.hub.queue_capacity = capacity as usize;
        }

        let defaults = ConnectionConfig::default();
        let mut connection = match number(&lookup, PONG_WAIT_SECS)? {
            Some(secs) => ConnectionConfig::with_pong_wait(Duration::from_secs(secs)),
            None => defaults,
        };
        if let Some(secs) = number(&lookup, PING_PERIOD_SECS)? {
            connection.ping_period = Duration::from_secs(secs);
        }
        if let Some(secs) = number(&lookup, WRITE_WAIT_SECS)? {
            connection.write_wait = Duration::from_secs(secs);
        }
        if connection.ping_period >= connection.pong_wait {
            return Err(ConfigError::PingNotBeforePong {
                ping: connection.ping_period,
                pong: connection.pong_wait,
            });
        }
        config.server.connection = connection;

        if let Some(secs) = number(&lookup, NORMALIZE_INTERVAL_SECS)? {
            config.normalizer.interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn number<F>(lookup: &F, var: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }
    match value.parse::<u64>() {
        Ok(0) => Err(ConfigError::Zero { var }),
        Ok(n) => Ok(Some(n)),
        Err(_) => Err(ConfigError::InvalidNumber {
            var,
            value: raw.clone(),
        }),
    }
}
