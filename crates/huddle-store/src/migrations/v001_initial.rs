//! v001 -- Initial schema: `users`, `messages`, `attachments`, `reactions`.
//!
//! Rooms and membership live with the external account service; a message
//! only records the `chat_id` it was posted to.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,
    username   TEXT NOT NULL,
    public_key TEXT,                          -- base64 X25519 public key
    created_at TEXT NOT NULL                  -- RFC-3339, millisecond precision
);

CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    chat_id    TEXT NOT NULL,
    sender_id  TEXT NOT NULL,
    content    TEXT NOT NULL,                 -- ciphertext (base64) or plaintext
    nonce      TEXT,                          -- base64, present iff encrypted
    created_at TEXT NOT NULL,
    edited_at  TEXT,

    FOREIGN KEY (sender_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_id, created_at ASC);

CREATE TABLE IF NOT EXISTS attachments (
    key          TEXT NOT NULL,
    message_id   TEXT NOT NULL,
    position     INTEGER NOT NULL,
    url          TEXT NOT NULL,
    filename     TEXT NOT NULL,
    content_type TEXT NOT NULL,
    size         INTEGER NOT NULL,
    nonce        TEXT,

    PRIMARY KEY (message_id, position),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- No uniqueness on (message_id, user_id, emoji): repeated reactions accumulate.
CREATE TABLE IF NOT EXISTS reactions (
    id         TEXT PRIMARY KEY NOT NULL,
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    emoji      TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (message_id) REFERENCES messages(id),
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_reactions_message ON reactions(message_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
