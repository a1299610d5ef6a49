use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::path::Path;

use super::schema;
use crate::corpus::PolicyMeta;
use crate::corpus::chunker::ChunkInsert;

const DB_FILE: &str = "vectors.db";

pub struct Store {
    conn: Connection,
}

/// A chunk with its embedding under one model.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: String,
    pub policy_id: String,
    pub index: usize,
    pub content: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub policy_count: i64,
    pub chunk_count: i64,
    pub embedding_count: i64,
    pub db_size_bytes: u64,
    pub regions: Vec<(String, i64)>,
    pub models: Vec<(String, i64)>,
}

impl StoreStats {
    pub fn empty() -> Self {
        Self {
            policy_count: 0,
            chunk_count: 0,
            embedding_count: 0,
            db_size_bytes: 0,
            regions: Vec::new(),
            models: Vec::new(),
        }
    }
}

pub fn encode_vector(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

impl Store {
    pub fn open(storage_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(storage_dir)
            .with_context(|| format!("creating storage dir {}", storage_dir.display()))?;
        let db_path = storage_dir.join(DB_FILE);
        let conn = Connection::open(&db_path)
            .with_context(|| format!("opening database at {}", db_path.display()))?;
        schema::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Open the store only if it has been created already.
    pub fn open_if_exists(storage_dir: &Path) -> Result<Option<Self>> {
        if storage_dir.join(DB_FILE).exists() {
            Self::open(storage_dir).map(Some)
        } else {
            Ok(None)
        }
    }

    /// In-memory store for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Content hash recorded at the last ingestion of a policy.
    pub fn policy_hash(&self, policy_id: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT content_hash FROM policies WHERE policy_id = ?1",
                params![policy_id],
                |r| r.get(0),
            )
            .optional()?)
    }

    pub fn upsert_policy(&self, policy: &PolicyMeta, content_hash: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO policies (policy_id, country, region, year, language, content_hash, ingested_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(policy_id) DO UPDATE SET
                country = excluded.country,
                region = excluded.region,
                year = excluded.year,
                language = excluded.language,
                content_hash = excluded.content_hash,
                ingested_at = excluded.ingested_at",
            params![
                policy.policy_id,
                policy.country,
                policy.region,
                policy.year,
                policy.language,
                content_hash,
                now
            ],
        )?;
        Ok(())
    }

    /// Replace all chunks of a policy. Embeddings of the old chunks cascade away.
    pub fn replace_chunks(&self, policy_id: &str, chunks: &[ChunkInsert]) -> Result<()> {
        self.conn
            .execute("DELETE FROM chunks WHERE policy_id = ?1", params![policy_id])?;
        let mut stmt = self.conn.prepare(
            "INSERT INTO chunks (id, policy_id, chunk_index, content) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for chunk in chunks {
            stmt.execute(params![chunk.id, policy_id, chunk.index as i64, chunk.content])?;
        }
        Ok(())
    }

    /// Remove a policy and, through the cascade, its chunks and vectors.
    pub fn delete_policy(&self, policy_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM policies WHERE policy_id = ?1", params![policy_id])?;
        Ok(())
    }

    pub fn begin_transaction(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(())
    }

    pub fn commit_transaction(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback_transaction(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// Chunks with no vector under `model`, in policy then chunk order.
    pub fn chunks_needing_embedding(&self, model: &str) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.content FROM chunks c
             LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model = ?1
             WHERE e.chunk_id IS NULL
             ORDER BY c.policy_id, c.chunk_index",
        )?;
        let rows = stmt.query_map(params![model], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn upsert_embeddings_batch(&self, entries: &[(&str, &str, &[f32])]) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "INSERT OR REPLACE INTO embeddings (chunk_id, model, dims, vector) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (chunk_id, model, vector) in entries {
            stmt.execute(params![chunk_id, model, vector.len() as i64, encode_vector(vector)])?;
        }
        Ok(())
    }

    /// All embedded chunks of one policy, in chunk order.
    pub fn policy_chunks(&self, policy_id: &str, model: &str) -> Result<Vec<StoredChunk>> {
        self.query_chunks(
            "SELECT c.id, c.policy_id, c.chunk_index, c.content, e.vector
             FROM chunks c JOIN embeddings e ON e.chunk_id = c.id
             WHERE e.model = ?1 AND c.policy_id = ?2
             ORDER BY c.chunk_index",
            params![model, policy_id],
        )
    }

    /// Every embedded chunk in the store under `model`.
    pub fn all_chunks(&self, model: &str) -> Result<Vec<StoredChunk>> {
        self.query_chunks(
            "SELECT c.id, c.policy_id, c.chunk_index, c.content, e.vector
             FROM chunks c JOIN embeddings e ON e.chunk_id = c.id
             WHERE e.model = ?1
             ORDER BY c.policy_id, c.chunk_index",
            params![model],
        )
    }

    fn query_chunks(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<StoredChunk>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            let index: i64 = row.get(2)?;
            let blob: Vec<u8> = row.get(4)?;
            Ok(StoredChunk {
                id: row.get(0)?,
                policy_id: row.get(1)?,
                index: index as usize,
                content: row.get(3)?,
                embedding: decode_vector(&blob),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn policy_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT policy_id FROM policies ORDER BY policy_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    pub fn chunk_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?)
    }

    pub fn embedding_count(&self, model: &str) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM embeddings WHERE model = ?1",
            params![model],
            |r| r.get(0),
        )?)
    }

    /// Collect store statistics.
    pub fn stats(&self, storage_dir: &Path) -> Result<StoreStats> {
        let policy_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM policies", [], |r| r.get(0))?;
        let chunk_count = self.chunk_count()?;
        let embedding_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM embeddings", [], |r| r.get(0))?;

        let db_size_bytes = std::fs::metadata(storage_dir.join(DB_FILE))
            .map(|m| m.len())
            .unwrap_or(0);

        let mut stmt = self.conn.prepare(
            "SELECT region, COUNT(*) FROM policies GROUP BY region ORDER BY COUNT(*) DESC, region",
        )?;
        let regions = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, i64)>>>()?;

        let mut stmt = self
            .conn
            .prepare("SELECT model, COUNT(*) FROM embeddings GROUP BY model ORDER BY model")?;
        let models = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, i64)>>>()?;

        Ok(StoreStats {
            policy_count,
            chunk_count,
            embedding_count,
            db_size_bytes,
            regions,
            models,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::chunker::chunk_policy;

    fn policy(id: &str, region: &str) -> PolicyMeta {
        PolicyMeta {
            policy_id: id.into(),
            country: id.split('_').next().unwrap().into(),
            region: region.into(),
            year: Some(2020),
            language: Some("es".into()),
            title: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn vector_blob_round_trip() {
        let v = vec![0.25f32, -1.5, 3.0e-7];
        assert_eq!(decode_vector(&encode_vector(&v)), v);
    }

    #[test]
    fn replacing_chunks_drops_old_embeddings() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_policy(&policy("chile_ia", "americas"), "h1").unwrap();
        let chunks = chunk_policy("chile_ia", "uno dos tres cuatro", 8, 0).unwrap();
        store.replace_chunks("chile_ia", &chunks).unwrap();

        let pending = store.chunks_needing_embedding("m").unwrap();
        assert_eq!(pending.len(), chunks.len());
        let unit = [1.0f32, 0.0];
        let entries: Vec<(&str, &str, &[f32])> = pending
            .iter()
            .map(|(id, _)| (id.as_str(), "m", unit.as_slice()))
            .collect();
        store.upsert_embeddings_batch(&entries).unwrap();
        assert!(store.chunks_needing_embedding("m").unwrap().is_empty());
        assert_eq!(store.chunks_needing_embedding("other").unwrap().len(), chunks.len());

        let stored = store.policy_chunks("chile_ia", "m").unwrap();
        assert_eq!(stored.len(), chunks.len());
        assert_eq!(stored[0].embedding, vec![1.0, 0.0]);

        store.replace_chunks("chile_ia", &chunks[..1]).unwrap();
        assert_eq!(store.embedding_count("m").unwrap(), 0);
        assert_eq!(store.chunk_count().unwrap(), 1);
    }

    #[test]
    fn policy_hash_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        assert_eq!(store.policy_hash("eu_ai_act").unwrap(), None);
        store.upsert_policy(&policy("eu_ai_act", "europa"), "abc").unwrap();
        store.upsert_policy(&policy("espana_enia", "europa"), "def").unwrap();
        store.upsert_policy(&policy("japon_ai", "asia_pacifico"), "ghi").unwrap();
        assert_eq!(store.policy_hash("eu_ai_act").unwrap().as_deref(), Some("abc"));

        let stats = store.stats(dir.path()).unwrap();
        assert_eq!(stats.policy_count, 3);
        assert_eq!(stats.regions[0], ("europa".to_string(), 2));

        store.delete_policy("eu_ai_act").unwrap();
        assert_eq!(store.policy_ids().unwrap(), vec!["espana_enia", "japon_ai"]);
        assert!(Store::open_if_exists(dir.path()).unwrap().is_some());
        assert!(Store::open_if_exists(&dir.path().join("none")).unwrap().is_none());
    }
}
