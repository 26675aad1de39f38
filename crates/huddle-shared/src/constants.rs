/// Wire protocol version advertised by `/info`
pub const PROTOCOL_VERSION: &str = "huddle/1";

/// Application name
pub const APP_NAME: &str = "Huddle";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// X25519 public / private key size in bytes
pub const KEY_SIZE: usize = 32;

/// Argon2id salt size in bytes
pub const SALT_SIZE: usize = 16;

/// Argon2id cost parameters for key backups (19 MiB, 2 passes, 1 lane)
pub const ARGON2_MEMORY_KIB: u32 = 19 * 1024;
pub const ARGON2_ITERATIONS: u32 = 2;
pub const ARGON2_LANES: u32 = 1;

/// Maximum message content size in bytes (256 KiB)
pub const MAX_MESSAGE_SIZE: usize = 262_144;

/// Maximum attachment size in bytes (50 MiB)
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// Identifier limits
pub const MAX_ID_LEN: usize = 64;
pub const MAX_USERNAME_LEN: usize = 64;
pub const MAX_EMOJI_LEN: usize = 32;

/// A message can be edited by its sender for this long after creation
pub const EDIT_WINDOW_SECS: i64 = 10 * 60;

/// Grace period between a delete request and the destructive delete
pub const DELETE_GRACE_SECS: i64 = 30;

/// Receiving clients clear a typing indicator after this long without a refresh
pub const TYPING_EXPIRY_MS: i64 = 3_000;

/// Sending clients emit at most one typing signal per this interval
pub const TYPING_DEBOUNCE_MS: i64 = 2_000;

/// Default HTTP / WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 8080;
