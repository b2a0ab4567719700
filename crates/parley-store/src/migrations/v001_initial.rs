//! v001: accounts and direct messages.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    email         TEXT NOT NULL,               -- lower-cased
    full_name     TEXT NOT NULL,
    password_hash TEXT NOT NULL,               -- Argon2id PHC string
    profile_pic   TEXT NOT NULL,
    created_at    TEXT NOT NULL,               -- ISO-8601 / RFC-3339
    updated_at    TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users(email);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    sender_id   TEXT NOT NULL,                 -- FK -> users(id)
    receiver_id TEXT NOT NULL,                 -- FK -> users(id)
    text        TEXT,
    image       TEXT,                          -- external image reference
    created_at  TEXT NOT NULL,

    CHECK (text IS NOT NULL OR image IS NOT NULL),
    FOREIGN KEY (sender_id)   REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (receiver_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender_id, receiver_id, created_at);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
