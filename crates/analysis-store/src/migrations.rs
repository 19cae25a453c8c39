use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS credentials (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL,
            provider        TEXT NOT NULL,
            access_token    BLOB NOT NULL,
            refresh_token   BLOB,
            scope           TEXT,
            token_type      TEXT,
            expires_in      INTEGER,
            updated_at      INTEGER NOT NULL,
            UNIQUE(user_id, provider)
        );

        -- post_id is nullable; NULLs never collide in UNIQUE
        CREATE TABLE IF NOT EXISTS analyses (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL,
            source          TEXT NOT NULL,
            post_id         TEXT,
            author_id       TEXT NOT NULL,
            lang            TEXT,
            text            TEXT NOT NULL,
            label           TEXT NOT NULL,
            score           REAL NOT NULL,
            post_created_at TEXT,
            created_at      TEXT NOT NULL,
            UNIQUE(user_id, source, post_id)
        );

        CREATE INDEX IF NOT EXISTS idx_analyses_user_created
            ON analyses(user_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_analyses_user_author
            ON analyses(user_id, author_id);

        CREATE TABLE IF NOT EXISTS handshakes (
            token       TEXT PRIMARY KEY,
            verifier    TEXT NOT NULL,
            user_id     INTEGER NOT NULL,
            created_at  INTEGER NOT NULL
        );
        ",
    )?;

    info!("database migrations complete");
    Ok(())
}
