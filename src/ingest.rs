use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::corpus::{Metadata, chunker, hasher};
use crate::embed::Embedder;
use crate::store::sqlite::Store;

#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    pub ingested: Vec<String>,
    pub unchanged: Vec<String>,
    /// Policies listed in metadata.json without a processed text file
    pub missing: Vec<String>,
    /// Stored policies no longer listed in metadata.json, deleted with their chunks
    pub removed: Vec<String>,
    pub chunks_created: usize,
    pub newly_embedded: usize,
    pub embed_failures: usize,
}

pub struct IngestOptions<'a> {
    /// Re-chunk even when the text hash is unchanged
    pub force: bool,
    /// Restrict ingestion to a single policy id
    pub only: Option<&'a str>,
}

/// Chunk every processed policy text into the store, then embed whatever is
/// missing a vector for the embedder's model.
pub fn ingest_corpus(
    root: &Path,
    config: &Config,
    metadata: &Metadata,
    store: &Store,
    embedder: &dyn Embedder,
    opts: &IngestOptions,
) -> Result<IngestReport> {
    if let Some(id) = opts.only.filter(|id| metadata.get(id).is_none()) {
        bail!("policy {id} not found in metadata.json");
    }
    let mut report = IngestReport::default();

    store.begin_transaction()?;
    if let Err(e) = sync_policies(root, config, metadata, store, opts, &mut report) {
        store.rollback_transaction()?;
        return Err(e);
    }
    store.commit_transaction()?;

    let (embedded, failures) = embed_pending(store, embedder, config.embed.batch_size)?;
    report.newly_embedded = embedded;
    report.embed_failures = failures;
    Ok(report)
}

fn sync_policies(
    root: &Path,
    config: &Config,
    metadata: &Metadata,
    store: &Store,
    opts: &IngestOptions,
    report: &mut IngestReport,
) -> Result<()> {
    if opts.only.is_none() {
        prune_removed(metadata, store, report)?;
    }
    chunk_policies(root, config, metadata, store, opts, report)
}

/// Drop stored policies that metadata.json no longer lists, so their chunks
/// stop showing up in analysis and claim verification.
fn prune_removed(metadata: &Metadata, store: &Store, report: &mut IngestReport) -> Result<()> {
    for id in store.policy_ids()? {
        if metadata.get(&id).is_none() {
            store.delete_policy(&id)?;
            info!(policy_id = %id, "removed from store");
            report.removed.push(id);
        }
    }
    Ok(())
}

fn chunk_policies(
    root: &Path,
    config: &Config,
    metadata: &Metadata,
    store: &Store,
    opts: &IngestOptions,
    report: &mut IngestReport,
) -> Result<()> {
    for policy in &metadata.policies {
        if opts.only.is_some_and(|id| id != policy.policy_id) {
            continue;
        }
        let path = config.processed_path(root, &policy.policy_id);
        if !path.exists() {
            debug!(policy_id = %policy.policy_id, "no processed file");
            report.missing.push(policy.policy_id.clone());
            continue;
        }

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let content_hash = hasher::hash_text(&text);

        if !opts.force && store.policy_hash(&policy.policy_id)?.as_deref() == Some(content_hash.as_str()) {
            report.unchanged.push(policy.policy_id.clone());
            continue;
        }

        let chunks = chunker::chunk_policy(
            &policy.policy_id,
            &text,
            config.chunking.size,
            config.chunking.overlap,
        )?;
        store.upsert_policy(policy, &content_hash)?;
        store.replace_chunks(&policy.policy_id, &chunks)?;
        info!(policy_id = %policy.policy_id, chunks = chunks.len(), "chunked");
        report.chunks_created += chunks.len();
        report.ingested.push(policy.policy_id.clone());
    }
    Ok(())
}

/// Generate embeddings for all chunks that don't have one yet under the
/// embedder's model. Returns (embedded, failed).
pub fn embed_pending(store: &Store, embedder: &dyn Embedder, batch_size: usize) -> Result<(usize, usize)> {
    let model = embedder.model_name();
    let pending = store.chunks_needing_embedding(model)?;
    if pending.is_empty() {
        return Ok((0, 0));
    }
    info!(model, pending = pending.len(), "embedding chunks");

    let mut newly_embedded = 0;
    let mut failures = 0;

    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<&str> = batch.iter().map(|(_, content)| content.as_str()).collect();
        let vectors: Vec<Option<Vec<f32>>> = match embedder.embed_batch(&texts) {
            Ok(vectors) => vectors.into_iter().map(Some).collect(),
            // Fall back to one-by-one so a single bad chunk doesn't sink the batch
            Err(e) => {
                debug!("batch embedding failed, retrying per chunk: {e:#}");
                batch
                    .iter()
                    .map(|(id, content)| match embedder.embed(content) {
                        Ok(v) => Some(v),
                        Err(e) => {
                            warn!(chunk_id = %id, "skipping chunk: {e:#}");
                            None
                        }
                    })
                    .collect()
            }
        };

        let entries: Vec<(&str, &str, &[f32])> = batch
            .iter()
            .zip(&vectors)
            .filter_map(|((id, _), v)| v.as_ref().map(|v| (id.as_str(), model, v.as_slice())))
            .collect();
        failures += batch.len() - entries.len();

        store.upsert_embeddings_batch(&entries)?;
        newly_embedded += entries.len();
    }

    Ok((newly_embedded, failures))
}
