//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `GRADCONNECT_APP_NAME`: Name reported by `/`. Default: `GradConnect`
//! - `GRADCONNECT_BIND_ADDR`: Listen address. Default: `0.0.0.0:8000`
//! - `GRADCONNECT_SEND_TIMEOUT_MS`: Per-connection delivery deadline. Default: `5000`
//! - `GRADCONNECT_OUTBOUND_BUFFER`: Per-socket outbound queue capacity. Default: `64`
//! - `GRADCONNECT_PING_INTERVAL_SECS`: Keepalive ping period, `0` disables, at most one day.
//!   Default: `30`
//! - `GRADCONNECT_CORS_ORIGINS`: Comma-separated allowed origins.
//!   Default: `http://localhost:5173,http://localhost:5174`
//!
//! # Examples
//!
//! ```bash
//! GRADCONNECT_BIND_ADDR=127.0.0.1:9000 GRADCONNECT_SEND_TIMEOUT_MS=2000 cargo run
//! ```

use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use gradconnect_notify::RegistryConfig;
use thiserror::Error;
use tracing::info;

const DEFAULT_APP_NAME: &str = "GradConnect";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_OUTBOUND_BUFFER: usize = 64;
const DEFAULT_PING_INTERVAL_SECS: u64 = 30;
const MAX_PING_INTERVAL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_CORS_ORIGINS: &str = "http://localhost:5173,http://localhost:5174";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is set but cannot be used
    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(name: &'static str, value: &str, reason: impl Display) -> Self {
        Self::Invalid {
            name,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Application name reported by the root endpoint
    pub app_name: String,
    /// Address the HTTP listener binds to
    pub bind_addr: SocketAddr,
    /// Deadline for handing a notification to one connection
    pub send_timeout: Duration,
    /// Capacity of each socket's outbound queue
    pub outbound_buffer: usize,
    /// Keepalive ping period (None disables pings)
    pub ping_interval: Option<Duration>,
    /// Origins allowed by CORS
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            ping_interval: Some(Duration::from_secs(DEFAULT_PING_INTERVAL_SECS)),
            cors_origins: split_origins(DEFAULT_CORS_ORIGINS),
        }
    }
}

impl ServerConfig {
    /// Load server configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let app_name = lookup("GRADCONNECT_APP_NAME").unwrap_or_else(|| DEFAULT_APP_NAME.to_string());

        let bind_addr: SocketAddr = parse_var(&lookup, "GRADCONNECT_BIND_ADDR", DEFAULT_BIND_ADDR)?;

        let send_timeout_ms: u64 = parse_var(
            &lookup,
            "GRADCONNECT_SEND_TIMEOUT_MS",
            &DEFAULT_SEND_TIMEOUT_MS.to_string(),
        )?;
        if send_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "GRADCONNECT_SEND_TIMEOUT_MS",
                "0",
                "must be greater than zero",
            ));
        }

        let outbound_buffer: usize = parse_var(
            &lookup,
            "GRADCONNECT_OUTBOUND_BUFFER",
            &DEFAULT_OUTBOUND_BUFFER.to_string(),
        )?;
        if outbound_buffer == 0 {
            return Err(ConfigError::invalid(
                "GRADCONNECT_OUTBOUND_BUFFER",
                "0",
                "must be greater than zero",
            ));
        }

        let ping_secs: u64 = parse_var(
            &lookup,
            "GRADCONNECT_PING_INTERVAL_SECS",
            &DEFAULT_PING_INTERVAL_SECS.to_string(),
        )?;
        if ping_secs > MAX_PING_INTERVAL_SECS {
            return Err(ConfigError::invalid(
                "GRADCONNECT_PING_INTERVAL_SECS",
                &ping_secs.to_string(),
                format!("must be at most {}", MAX_PING_INTERVAL_SECS),
            ));
        }
        let ping_interval = (ping_secs > 0).then(|| Duration::from_secs(ping_secs));

        let cors_origins = split_origins(
            &lookup("GRADCONNECT_CORS_ORIGINS").unwrap_or_else(|| DEFAULT_CORS_ORIGINS.to_string()),
        );

        Ok(Self {
            app_name,
            bind_addr,
            send_timeout: Duration::from_millis(send_timeout_ms),
            outbound_buffer,
            ping_interval,
            cors_origins,
        })
    }

    /// Registry settings derived from this configuration.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            send_timeout: self.send_timeout,
        }
    }

    /// Log the current server configuration.
    pub fn log_config(&self) {
        info!("Application: {}", self.app_name);
        info!("Bind address: {}", self.bind_addr);
        info!("Notification send timeout: {:?}", self.send_timeout);
        info!("Outbound buffer per connection: {}", self.outbound_buffer);
        match self.ping_interval {
            Some(interval) => info!("Keepalive ping interval: {:?}", interval),
            None => info!("Keepalive pings: disabled"),
        }
        info!("CORS origins: {}", self.cors_origins.join(", "));
    }

    /// Create a test configuration bound to an ephemeral local port.
    pub fn test_local() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            send_timeout: Duration::from_millis(500),
            ping_interval: None,
            ..Self::default()
        }
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::invalid(name, &raw, e))
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(String::from)
        .collect()
}
