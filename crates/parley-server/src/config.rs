//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use parley_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_TOKEN_TTL_DAYS};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3001`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./parley.db`
    pub database_path: PathBuf,

    /// Ed25519 seed used to sign session tokens (hex-encoded, 64 chars).
    /// Env: `SESSION_SIGNING_KEY`
    /// Default: none, a random key is generated at startup and every token
    /// is invalidated on restart.
    pub session_signing_key: Option<[u8; 32]>,

    /// Session token lifetime.
    /// Env: `TOKEN_TTL_DAYS`
    /// Default: `7`
    pub token_ttl: chrono::Duration,

    /// How often the gateway pings each live connection.
    /// Env: `HEARTBEAT_INTERVAL_SECS`
    /// Default: `25`
    pub heartbeat_interval: Duration,

    /// A connection that sends nothing for this long is closed.
    /// Env: `IDLE_TIMEOUT_SECS`
    /// Default: `60`
    pub idle_timeout: Duration,

    /// Per-connection outbound event queue capacity.
    /// Env: `OUTBOUND_QUEUE`
    /// Default: `64`
    pub outbound_queue: usize,

    /// Maximum concurrent connections per user (0 = unlimited).
    /// Env: `MAX_CONNECTIONS_PER_USER`
    /// Default: `0`
    pub max_connections_per_user: usize,

    /// Browser origin allowed to make credentialed requests.
    /// Env: `CORS_ORIGIN`
    /// Default: `http://localhost:3000`
    pub cors_origin: String,

    /// Directory holding a built single-page client, served as a fallback.
    /// Env: `STATIC_DIR`
    /// Default: unset (no static serving).
    pub static_dir: Option<PathBuf>,
}

// The signing key must never end up in logs.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("session_signing_key", &self.session_signing_key.map(|_| "<redacted>"))
            .field("token_ttl_days", &self.token_ttl.num_days())
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("idle_timeout", &self.idle_timeout)
            .field("outbound_queue", &self.outbound_queue)
            .field("max_connections_per_user", &self.max_connections_per_user)
            .field("cors_origin", &self.cors_origin)
            .field("static_dir", &self.static_dir)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./parley.db"),
            session_signing_key: None,
            token_ttl: chrono::Duration::days(DEFAULT_TOKEN_TTL_DAYS),
            heartbeat_interval: Duration::from_secs(25),
            idle_timeout: Duration::from_secs(60),
            outbound_queue: 64,
            max_connections_per_user: 0,
            cors_origin: "http://localhost:3000".to_string(),
            static_dir: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(hex_key) = lookup("SESSION_SIGNING_KEY") {
            match parse_hex_key(&hex_key) {
                Ok(key) => config.session_signing_key = Some(key),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid SESSION_SIGNING_KEY, a random key will be generated"
                    );
                }
            }
        }

        if let Some(days) = parse_positive(&lookup, "TOKEN_TTL_DAYS") {
            config.token_ttl = chrono::Duration::days(days as i64);
        }

        if let Some(secs) = parse_positive(&lookup, "HEARTBEAT_INTERVAL_SECS") {
            config.heartbeat_interval = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_positive(&lookup, "IDLE_TIMEOUT_SECS") {
            config.idle_timeout = Duration::from_secs(secs);
        }

        if let Some(n) = parse_positive(&lookup, "OUTBOUND_QUEUE") {
            config.outbound_queue = n as usize;
        }

        if let Some(val) = lookup("MAX_CONNECTIONS_PER_USER") {
            match val.parse::<usize>() {
                Ok(n) => config.max_connections_per_user = n,
                Err(_) => tracing::warn!(value = %val, "Invalid MAX_CONNECTIONS_PER_USER, using default"),
            }
        }

        if let Some(origin) = lookup("CORS_ORIGIN") {
            config.cors_origin = origin;
        }

        if let Some(dir) = lookup("STATIC_DIR") {
            if !dir.is_empty() {
                config.static_dir = Some(PathBuf::from(dir));
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let val = lookup(key)?;
    match val.parse::<u64>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(key, value = %val, "Invalid value, using default");
            None
        }
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_key(hex: &str) -> Result<[u8; 32], String> {
    let hex = hex.trim();
    if hex.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", hex.len()));
    }

    let mut bytes = [0u8; 32];
    hex::decode_to_slice(hex, &mut bytes).map_err(|e| e.to_string())?;
    Ok(bytes)
}
