//! Configuration data structures for Kinetix.
//!
//! These types map directly to YAML (also TOML / JSON) configuration files. Every section
//! has defaults so a minimal config only needs the auth secret. Durations are humantime
//! strings ("3s", "500ms", "1m") and are parsed through the accessor methods.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{forwarder::DEFAULT_CREDENTIAL_HEADER, service::NewService};

fn parse_duration(field: &str, value: &str) -> eyre::Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| eyre::eyre!("Invalid duration for '{}': '{}' ({})", field, value, e))
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub forwarding: ForwardingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Services registered at startup, before the first request is served.
    #[serde(default)]
    pub initial_services: Vec<NewService>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            routing: RoutingConfig::default(),
            forwarding: ForwardingConfig::default(),
            auth: AuthConfig::default(),
            schema: SchemaConfig::default(),
            status: StatusConfig::default(),
            cors: CorsConfig::default(),
            initial_services: Vec::new(),
        }
    }
}

/// Freshness policy of the routing table.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RoutingConfig {
    /// How long a built table is served before the next read rebuilds it.
    pub staleness: String,
    /// How long to keep serving the last good table after a failed rebuild.
    pub backoff: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            staleness: "3s".to_string(),
            backoff: "10s".to_string(),
        }
    }
}

impl RoutingConfig {
    pub fn staleness(&self) -> eyre::Result<Duration> {
        parse_duration("routing.staleness", &self.staleness)
    }

    pub fn backoff(&self) -> eyre::Result<Duration> {
        parse_duration("routing.backoff", &self.backoff)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Header the service credential is injected under.
    pub credential_header: String,
    pub timeout: String,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            credential_header: DEFAULT_CREDENTIAL_HEADER.to_string(),
            timeout: "30s".to_string(),
        }
    }
}

impl ForwardingConfig {
    pub fn timeout(&self) -> eyre::Result<Duration> {
        parse_duration("forwarding.timeout", &self.timeout)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret shared with the user service that issues tokens.
    pub secret: String,
}

/// The advertised OpenAPI document and how often it is refreshed.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SchemaConfig {
    pub refresh_interval: String,
    pub fetch_timeout: String,
    pub title: String,
    pub version: String,
    pub description: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            refresh_interval: "8s".to_string(),
            fetch_timeout: "5s".to_string(),
            title: "Kinetix".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Kinetix's API gateway".to_string(),
        }
    }
}

impl SchemaConfig {
    pub fn refresh_interval(&self) -> eyre::Result<Duration> {
        parse_duration("schema.refresh_interval", &self.refresh_interval)
    }

    pub fn fetch_timeout(&self) -> eyre::Result<Duration> {
        parse_duration("schema.fetch_timeout", &self.fetch_timeout)
    }
}

/// Service status probing used to annotate registry listings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StatusConfig {
    pub ttl: String,
    pub timeout: String,
    /// Path probed on every service, e.g. "/health".
    pub path: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            ttl: "4s".to_string(),
            timeout: "2s".to_string(),
            path: "/health".to_string(),
        }
    }
}

impl StatusConfig {
    pub fn ttl(&self) -> eyre::Result<Duration> {
        parse_duration("status.ttl", &self.ttl)
    }

    pub fn timeout(&self) -> eyre::Result<Duration> {
        parse_duration("status.timeout", &self.timeout)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CorsConfig {
    /// Origins matching this regex may call the gateway with credentials. `None` disables
    /// CORS headers entirely.
    pub allow_origin_regex: Option<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origin_regex: Some(r"^https?://localhost(:[0-9]+)?$".to_string()),
        }
    }
}

/// Every duration in the config, parsed once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub staleness: Duration,
    pub backoff: Duration,
    pub forward_timeout: Duration,
    pub schema_refresh: Duration,
    pub schema_fetch_timeout: Duration,
    pub status_ttl: Duration,
    pub status_timeout: Duration,
}

impl GatewayConfig {
    pub fn timings(&self) -> eyre::Result<Timings> {
        Ok(Timings {
            staleness: self.routing.staleness()?,
            backoff: self.routing.backoff()?,
            forward_timeout: self.forwarding.timeout()?,
            schema_refresh: self.schema.refresh_interval()?,
            schema_fetch_timeout: self.schema.fetch_timeout()?,
            status_ttl: self.status.ttl()?,
            status_timeout: self.status.timeout()?,
        })
    }
}
