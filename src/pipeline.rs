//! Stage runners shared by the CLI subcommands and `run`.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::analysis::{self, chunk_pairs};
use crate::config::Config;
use crate::corpus::Metadata;
use crate::corpus::extract::{self, ExtractOptions, ExtractReport, TextExtractor};
use crate::corpus::fetch::{self, FetchReport, Manifest};
use crate::embed::{self, Embedder};
use crate::export;
use crate::ingest::{self, IngestOptions, IngestReport};
use crate::store::sqlite::{Store, StoreStats};
use crate::verify::{self, Verdict, VerifyOptions};

const FETCH_DELAY: Duration = Duration::from_millis(500);

/// A project root and its loaded configuration.
pub struct Project {
    pub root: PathBuf,
    pub config: Config,
}

impl Project {
    pub fn open(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("resolving path {}", root.display()))?;
        let config = Config::load(&root)?;
        Ok(Self { root, config })
    }

    pub fn path(&self, p: &Path) -> PathBuf {
        self.config.resolve(&self.root, p)
    }

    pub fn metadata(&self) -> Result<Metadata> {
        Metadata::load(&self.path(&self.config.paths.metadata_file))
    }

    pub fn store(&self) -> Result<Store> {
        Store::open(&self.config.storage_dir(&self.root))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path(&self.config.paths.output_dir)
    }
}

pub fn banner(step: usize, title: &str) {
    let rule = "=".repeat(50);
    println!("\n{rule}\nSTEP {step}: {title}\n{rule}");
}

pub fn fetch(project: &Project) -> Result<FetchReport> {
    let manifest = Manifest::load(&project.path(&project.config.paths.manifest_file))?;
    let raw_dir = project.path(&project.config.paths.raw_dir);
    let report = fetch::fetch_all(&manifest, &raw_dir, FETCH_DELAY)?;
    println!(
        "  downloaded: {}  manual: {}  failed: {}",
        report.downloaded.len(),
        report.manual.len(),
        report.failed.len()
    );
    for entry in &report.manual {
        println!("    manual: {}/{} ({})", entry.country, entry.file, entry.status);
    }
    for entry in &report.failed {
        println!("    failed: {}/{} ({})", entry.country, entry.file, entry.status);
    }
    Ok(report)
}

pub fn extract(
    project: &Project,
    extractor: &dyn TextExtractor,
    force: bool,
    single: Option<&Path>,
) -> Result<ExtractReport> {
    let raw_dir = project.path(&project.config.paths.raw_dir);
    let processed_dir = project.path(&project.config.paths.processed_dir);
    let opts = ExtractOptions {
        raw_dir: &raw_dir,
        processed_dir: &processed_dir,
        aliases: &project.config.dir_aliases,
        min_chars: project.config.extract.min_chars,
        force,
    };

    let report = match single {
        Some(pdf) => {
            // Relative paths name a file under the raw dir, e.g. spain/enia_2020.pdf
            let pdf = raw_dir.join(pdf);
            let (id, len) = extract::extract_one(&pdf, &opts, extractor)?;
            println!("  {id}: {len} chars");
            ExtractReport {
                processed: vec![id],
                ..Default::default()
            }
        }
        None => extract::extract_all(&opts, extractor)?,
    };
    println!(
        "  processed: {}  skipped: {}  failed: {}",
        report.processed.len(),
        report.skipped.len(),
        report.failed.len()
    );
    for (id, reason) in &report.failed {
        println!("    {id}: {reason}");
    }
    Ok(report)
}

pub fn ingest(
    project: &Project,
    store: &Store,
    embedder: &dyn Embedder,
    opts: &IngestOptions,
) -> Result<IngestReport> {
    let metadata = project.metadata()?;
    if metadata.policies.is_empty() {
        bail!(
            "no policies listed in {}",
            project.path(&project.config.paths.metadata_file).display()
        );
    }
    let report = ingest::ingest_corpus(&project.root, &project.config, &metadata, store, embedder, opts)?;
    println!(
        "  ingested: {}  unchanged: {}  missing text: {}  removed: {}",
        report.ingested.len(),
        report.unchanged.len(),
        report.missing.len(),
        report.removed.len()
    );
    println!(
        "  chunks created: {}  embedded: {}  embed failures: {}",
        report.chunks_created, report.newly_embedded, report.embed_failures
    );
    Ok(report)
}

/// Similarity, clustering, projections and results.json.
pub fn analyze(project: &Project, store: &Store, embedder: &dyn Embedder) -> Result<PathBuf> {
    let metadata = project.metadata()?;
    let result = analysis::analyze(&project.root, &project.config, &metadata, store, embedder)?;

    println!("  policies analysed: {}", result.ids.len());
    println!("  clusters: {}", result.clustering.groups.len());
    for (label, members) in &result.clustering.groups {
        let coherence = match result.validation.get(label) {
            Some(v) if v.region_coherence => "coherent",
            _ => "mixed",
        };
        println!("    cluster {label} ({coherence}): {}", members.join(", "));
    }
    if result.tsne.is_some() {
        println!("  t-SNE projection computed");
    }
    if result.umap.is_some() {
        println!("  UMAP projection computed");
    }
    println!("  network edges: {}", result.network_edges.len());

    let results = export::build_results(&result, &metadata, &project.config);
    let path = export::write_results(&project.output_dir(), &results)?;
    println!("  results: {}", path.display());
    Ok(path)
}

/// Chunk-level evidence for the pairs in an existing results.json.
pub fn chunk_pairs(project: &Project, store: &Store, embedder: &dyn Embedder) -> Result<PathBuf> {
    let output_dir = project.output_dir();
    let (ids, similarity) = export::read_similarity(&output_dir)?;
    let ac = &project.config.analysis;
    let params = chunk_pairs::PairParams {
        threshold: ac.pair_threshold,
        top_k: ac.pair_top_k,
        max_chunks: ac.pair_max_chunks,
        snippet_chars: ac.snippet_chars,
    };

    let dimension_vectors = analysis::similarity::dimension_vectors(embedder, &project.config.dimensions)?;
    let pairs = chunk_pairs::chunk_pairs(
        store,
        embedder.model_name(),
        &ids,
        &similarity,
        &project.config.dimensions,
        &dimension_vectors,
        &params,
    )?;
    let total: usize = pairs.iter().map(|p| p.top_chunks.len()).sum();
    println!("  pairs: {}  chunk matches: {total}", pairs.len());

    let path = export::write_chunk_pairs(&output_dir, pairs, params.threshold, params.top_k)?;
    println!("  chunk pairs: {}", path.display());
    Ok(path)
}

pub struct RunOptions {
    pub skip_extract: bool,
    pub skip_ingest: bool,
    pub force: bool,
}

/// extract -> ingest -> analyze/export -> chunk pairs
pub fn run(
    project: &Project,
    extractor: &dyn TextExtractor,
    embedder: &dyn Embedder,
    opts: &RunOptions,
) -> Result<PathBuf> {
    if !opts.skip_extract {
        banner(1, "PDF EXTRACTION");
        let report = extract(project, extractor, opts.force, None)?;
        info!(ready = report.ready(), "extraction done");
    }

    let store = project.store()?;
    if !opts.skip_ingest {
        banner(2, "INGEST (CHUNK + EMBED)");
        ingest(
            project,
            &store,
            embedder,
            &IngestOptions {
                force: opts.force,
                only: None,
            },
        )?;
    }

    banner(3, "SIMILARITY, CLUSTERING & EXPORT");
    let results = analyze(project, &store, embedder)?;

    banner(4, "CHUNK PAIRS");
    chunk_pairs(project, &store, embedder)?;

    let rule = "=".repeat(50);
    println!("\n{rule}\nPIPELINE COMPLETE\n{rule}");
    Ok(results)
}

pub fn verify_chapter(
    project: &Project,
    store: &Store,
    embedder: &dyn Embedder,
    chapter: &str,
    opts: &VerifyOptions,
) -> Result<Vec<Verdict>> {
    let chapters_dir = project.path(&project.config.paths.chapters_dir);
    let tex_path = verify::find_chapter(&chapters_dir, chapter)?;
    let tex = std::fs::read_to_string(&tex_path)
        .with_context(|| format!("reading {}", tex_path.display()))?;
    let claims = verify::extract_claims(&tex);
    info!(file = %tex_path.display(), claims = claims.len(), "claims extracted");

    let verdicts = verify::verify_claims(store, embedder, &claims, opts)?;
    print!("{}", verify::render_report(&verdicts, chapter, opts));
    Ok(verdicts)
}

pub fn status(project: &Project) -> Result<StoreStats> {
    let storage_dir = project.config.storage_dir(&project.root);
    let stats = match Store::open_if_exists(&storage_dir)? {
        Some(store) => store.stats(&storage_dir)?,
        None => StoreStats::empty(),
    };
    let metadata = project.metadata()?;
    let ready = analysis::candidate_ids(&project.root, &project.config, &metadata).len();

    println!("project: {}", project.root.display());
    match embed::configured_model(&project.config.embed) {
        Some(model) => println!("embedding model: {model}"),
        None => println!("embedding model: none configured"),
    }
    println!("policies in metadata: {}  with processed text: {ready}", metadata.policies.len());
    println!(
        "store: {} policies, {} chunks, {} embeddings ({:.1} MB)",
        stats.policy_count,
        stats.chunk_count,
        stats.embedding_count,
        stats.db_size_bytes as f64 / (1024.0 * 1024.0)
    );
    for (region, count) in &stats.regions {
        println!("  {region}: {count}");
    }
    for (model, count) in &stats.models {
        println!("  model {model}: {count} vectors");
    }
    Ok(stats)
}
