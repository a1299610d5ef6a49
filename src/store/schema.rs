use anyhow::Result;
use rusqlite::Connection;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch("
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS policies (
            policy_id    TEXT PRIMARY KEY,
            country      TEXT NOT NULL,
            region       TEXT NOT NULL,
            year         INTEGER,
            language     TEXT,
            content_hash TEXT NOT NULL,
            ingested_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_policies_region ON policies(region);

        CREATE TABLE IF NOT EXISTS chunks (
            id          TEXT PRIMARY KEY,  -- '<policy_id>_chunk_0000'
            policy_id   TEXT NOT NULL REFERENCES policies(policy_id) ON DELETE CASCADE,
            chunk_index INTEGER NOT NULL,
            content     TEXT NOT NULL,
            UNIQUE(policy_id, chunk_index)
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_policy ON chunks(policy_id);

        -- One vector per chunk per model, stored as little-endian f32.
        CREATE TABLE IF NOT EXISTS embeddings (
            chunk_id TEXT NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
            model    TEXT NOT NULL,
            dims     INTEGER NOT NULL,
            vector   BLOB NOT NULL,
            PRIMARY KEY (chunk_id, model)
        );
    ")?;

    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
