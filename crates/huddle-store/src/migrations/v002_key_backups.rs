use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS key_backups (
    user_id       TEXT PRIMARY KEY NOT NULL,  -- FK -> users(id)
    salt          TEXT NOT NULL,              -- base64 Argon2id salt
    nonce         TEXT NOT NULL,              -- base64 XChaCha20 nonce
    encrypted_key TEXT NOT NULL,              -- base64 sealed private key
    updated_at    TEXT NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
