//! # huddle-server
//!
//! Realtime chat server.
//!
//! This binary provides:
//! - **WebSocket gateway** carrying room presence, typing indicators and the
//!   message lifecycle (create, edit, delete with undo grace, reactions)
//! - **REST API** (axum) for chat history, published public keys, key backups
//!   and attachment upload/download
//! - **Attachment storage** on the local filesystem (ciphertext for encrypted
//!   chats, the server never sees plaintext)
//!
//! Messages are end-to-end encrypted by clients; the server stores and relays
//! ciphertext and nonces as opaque strings.

mod api;
mod blob_store;
mod config;
mod error;
mod gateway;
mod hub;
mod lifecycle;
mod pending;
mod presence;
mod room;

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use huddle_store::{ChatStore, Database, MemoryStore, SqliteStore};

use crate::api::AppState;
use crate::blob_store::FsObjectStore;
use crate::config::ServerConfig;
use crate::hub::Hub;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,huddle_server=debug")),
        )
        .init();

    info!("Starting Huddle server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let store: Arc<dyn ChatStore> = if config.uses_memory_store() {
        info!("Using in-memory store, data is lost on restart");
        Arc::new(MemoryStore::new())
    } else {
        let db = Database::open_at(Path::new(&config.database_path))?;
        info!(path = %config.database_path, "Opened database");
        Arc::new(SqliteStore::new(db))
    };

    // Attachment store (creates directories if missing)
    let objects = FsObjectStore::new(
        config.blob_storage_path.clone(),
        config.max_upload_size,
        config.public_base_url.clone(),
    )
    .await?;
    info!(
        path = %config.blob_storage_path.display(),
        max_size = objects.max_size(),
        "Attachment storage ready"
    );

    let hub = Hub::new(store.clone(), config.store_timeout);

    let http_addr = config.http_addr;
    let app_state = AppState {
        hub,
        store,
        objects: Arc::new(objects),
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
