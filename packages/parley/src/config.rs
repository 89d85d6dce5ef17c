use anyhow::{Context, Result};
use parley_core::ChatError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::warn;

// =============================================================================
// File config (figment-deserialized from defaults / parley.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   parley.toml:     [server]
//                    max_clients = 20
//
//   env var:         PARLEY_SERVER__MAX_CLIENTS=20   (double underscore = nesting)
//
// The listening port is the exception: it comes from the bare `PORT`
// variable and is validated separately (see `resolve_port`).

/// Port used when `PORT` is absent or invalid.
pub const DEFAULT_PORT: u16 = 8080;

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
}

/// Server tuning knobs (lives under `[server]` in parley.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Lines queued per peer before further broadcasts to it are dropped.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            max_clients: default_max_clients(),
            max_line_bytes: default_max_line_bytes(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_max_clients() -> usize {
    10
}
fn default_max_line_bytes() -> usize {
    parley_core::protocol::DEFAULT_MAX_LINE_BYTES
}
fn default_outbox_capacity() -> usize {
    256
}

/// Build a figment that layers: defaults → config file (if given) → PARLEY_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `PARLEY_SERVER__MAX_CLIENTS=20`  →  `server.max_clients = 20`
pub fn load_config(config_file: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("PARLEY_").split("__"))
}

/// Parse a port number, accepting only 1-65535.
pub fn parse_port(raw: &str) -> Result<u16, ChatError> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ChatError::Configuration(format!("invalid PORT format: {raw:?}")))?;
    if (1..=65535).contains(&value) {
        Ok(value as u16)
    } else {
        Err(ChatError::Configuration(format!(
            "PORT out of range (1-65535): {value}"
        )))
    }
}

/// Resolve the listening port from the raw `PORT` value, falling back to
/// `DEFAULT_PORT` with a warning when it is malformed.
pub fn resolve_port(raw: Option<&str>) -> u16 {
    match raw {
        None => DEFAULT_PORT,
        Some(raw) => parse_port(raw).unwrap_or_else(|e| {
            warn!(error = %e, "Using default port {}", DEFAULT_PORT);
            DEFAULT_PORT
        }),
    }
}

// =============================================================================
// Runtime config (derived from FileConfig + PORT)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_clients: usize,
    pub max_line_bytes: usize,
    pub outbox_capacity: usize,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig, port: u16) -> Result<Self> {
        let bind_addr = format!("{}:{}", fc.host, port)
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid bind address {}:{}", fc.host, port))?;
        Ok(Self {
            bind_addr,
            max_clients: fc.max_clients.max(1),
            max_line_bytes: fc.max_line_bytes.max(1),
            outbox_capacity: fc.outbox_capacity.max(1),
        })
    }

    /// Load from the figment layers and the process `PORT` variable.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let fc: FileConfig = load_config(config_file)
            .extract()
            .context("Failed to load configuration")?;
        let port = resolve_port(std::env::var("PORT").ok().as_deref());
        Self::from_file(&fc.server, port)
    }
}
