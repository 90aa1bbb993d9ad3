//! Relay server configuration

use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use crate::chat::RelayService;

/// Deployment environment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Log filter used when `RUST_LOG` is unset
    pub fn default_log_filter(self) -> &'static str {
        match self {
            Environment::Development => "debug",
            Environment::Production => "info",
        }
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(anyhow::anyhow!("unknown environment '{}'", other)),
        }
    }
}

/// Allowed browser origins for the WebSocket endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

impl CorsOrigins {
    /// `*`, `all` and `true` allow every origin; anything else is a comma list.
    /// Unset means any origin in development and localhost only in production.
    pub fn parse(raw: Option<&str>, env: Environment) -> Self {
        match raw.map(str::trim) {
            Some("*") | Some("all") | Some("true") => CorsOrigins::Any,
            Some(list) if !list.is_empty() => CorsOrigins::List(
                list.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(String::from)
                    .collect(),
            ),
            _ if env.is_production() => CorsOrigins::List(vec![
                "http://localhost:3001".to_string(),
                "http://localhost:4001".to_string(),
            ]),
            _ => CorsOrigins::Any,
        }
    }
}

/// Configuration for the relay server
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Address the HTTP/WebSocket listener binds to
    pub bind_addr: SocketAddr,
    /// `sqlite://...` URL, or `memory` for a process-local store
    pub database_url: String,
    pub environment: Environment,
    pub cors_origins: CorsOrigins,
    /// Mount `/ws/developer` with the developer capability set
    pub enable_developer_api: bool,
    /// Cap (and default) for conversation history requests
    pub history_limit: usize,
    /// Cap (and default) for the developer `get-all-messages` event
    pub recent_messages_limit: usize,
    /// Minimum accepted public key length in bytes
    pub min_public_key_len: usize,
    /// Per-connection outbound queue capacity
    pub outbound_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000),
            database_url: "sqlite://relay_data/relay.sqlite".to_string(),
            environment: Environment::Development,
            cors_origins: CorsOrigins::Any,
            enable_developer_api: true,
            history_limit: 50,
            recent_messages_limit: 100,
            min_public_key_len: 32,
            outbound_buffer: 256,
        }
    }
}

impl RelayConfig {
    /// Read configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let environment = match lookup("RELAY_ENV") {
            Some(raw) => raw.parse()?,
            None => defaults.environment,
        };

        let ip: IpAddr = match lookup("BIND_ADDR") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("BIND_ADDR '{}' is not an IP address", raw))?,
            None => defaults.bind_addr.ip(),
        };
        let port = parse_or(&lookup, "PORT", defaults.bind_addr.port())?;

        let enable_developer_api = match lookup("ENABLE_DEVELOPER_API") {
            Some(raw) => parse_bool(&raw)
                .with_context(|| format!("ENABLE_DEVELOPER_API '{}' is not a boolean", raw))?,
            None => !environment.is_production(),
        };

        let config = Self {
            bind_addr: SocketAddr::new(ip, port),
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            environment,
            cors_origins: CorsOrigins::parse(lookup("CORS_ORIGIN").as_deref(), environment),
            enable_developer_api,
            history_limit: parse_or(&lookup, "HISTORY_LIMIT", defaults.history_limit)?,
            recent_messages_limit: parse_or(
                &lookup,
                "RECENT_MESSAGES_LIMIT",
                defaults.recent_messages_limit,
            )?,
            min_public_key_len: parse_or(
                &lookup,
                "MIN_PUBLIC_KEY_LEN",
                defaults.min_public_key_len,
            )?,
            outbound_buffer: parse_or(&lookup, "OUTBOUND_BUFFER", defaults.outbound_buffer)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.history_limit == 0 {
            anyhow::bail!("HISTORY_LIMIT must be at least 1");
        }
        if self.recent_messages_limit == 0 {
            anyhow::bail!("RECENT_MESSAGES_LIMIT must be at least 1");
        }
        if self.min_public_key_len == 0 {
            anyhow::bail!("MIN_PUBLIC_KEY_LEN must be at least 1");
        }
        if self.outbound_buffer == 0 {
            anyhow::bail!("OUTBOUND_BUFFER must be at least 1");
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value '{}' for {}", raw, key)),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!("expected true/false")),
    }
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub relay: Arc<RelayService>,
}
