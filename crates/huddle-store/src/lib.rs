//! # huddle-store
//!
//! Persistent state for the Huddle chat server: users, messages with their
//! attachment metadata, reactions, published public keys and passphrase key
//! backups.
//!
//! [`Database`] is the synchronous SQLite handle with typed CRUD helpers.
//! The realtime engine talks to the async [`ChatStore`] trait instead, which
//! is implemented by [`SqliteStore`] and by the in-process [`MemoryStore`].

pub mod database;
pub mod memory;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod reactions;
pub mod store;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use models::*;
pub use store::{ChatStore, SqliteStore};
