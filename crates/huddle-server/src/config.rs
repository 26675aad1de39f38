//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use huddle_shared::constants::{APP_NAME, DEFAULT_HTTP_PORT, MAX_FILE_SIZE};

/// Value of `DATABASE_PATH` that selects the in-memory store.
pub const MEMORY_DATABASE: &str = ":memory:";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API and the WebSocket gateway.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file, or `:memory:` for a process-local store.
    /// Env: `DATABASE_PATH`
    /// Default: `./huddle.db`
    pub database_path: String,

    /// Filesystem path where uploaded attachment blobs are stored.
    /// Env: `BLOB_STORAGE_PATH`
    /// Default: `./uploads`
    pub blob_storage_path: PathBuf,

    /// Prefix for attachment URLs handed back by the upload endpoint.
    /// Env: `PUBLIC_BASE_URL`
    /// Default: empty (URLs are relative, `/api/uploads/<key>`).
    pub public_base_url: String,

    /// Maximum size of a single uploaded file in bytes.
    /// Env: `MAX_UPLOAD_SIZE`
    /// Default: 50 MiB
    pub max_upload_size: usize,

    /// Deadline for every persistent / object store call.
    /// Env: `STORE_TIMEOUT_SECS`
    /// Default: 5 seconds
    pub store_timeout: Duration,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Huddle"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: "./huddle.db".to_string(),
            blob_storage_path: PathBuf::from("./uploads"),
            public_base_url: String::new(),
            max_upload_size: MAX_FILE_SIZE,
            store_timeout: Duration::from_secs(5),
            instance_name: APP_NAME.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = path;
        }

        if let Some(path) = lookup("BLOB_STORAGE_PATH") {
            config.blob_storage_path = PathBuf::from(path);
        }

        if let Some(url) = lookup("PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(val) = lookup("MAX_UPLOAD_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_upload_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_UPLOAD_SIZE, using default"),
            }
        }

        if let Some(val) = lookup("STORE_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.store_timeout = Duration::from_secs(n),
                _ => tracing::warn!(value = %val, "Invalid STORE_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME").filter(|n| !n.is_empty()) {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_path == MEMORY_DATABASE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.store_timeout, Duration::from_secs(5));
        assert!(!config.uses_memory_store());
        assert!(config.public_base_url.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", ":memory:"),
            ("PUBLIC_BASE_URL", "https://chat.example.org/"),
            ("STORE_TIMEOUT_SECS", "2"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert!(config.uses_memory_store());
        assert_eq!(config.store_timeout, Duration::from_secs(2));
        assert_eq!(config.public_base_url, "https://chat.example.org");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = load(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("MAX_UPLOAD_SIZE", "-3"),
            ("STORE_TIMEOUT_SECS", "0"),
        ]);
        let default = ServerConfig::default();
        assert_eq!(config.http_addr, default.http_addr);
        assert_eq!(config.max_upload_size, default.max_upload_size);
        assert_eq!(config.store_timeout, default.store_timeout);
    }
}
