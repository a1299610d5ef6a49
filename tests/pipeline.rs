mod common;

use common::{FlakyEmbedder, HashEmbedder, two_topic_corpus, write_corpus};
use polisim::analysis;
use polisim::config::Config;
use polisim::corpus::extract::TextExtractor;
use polisim::export::{CHUNK_PAIRS_FILE, RESULTS_FILE};
use polisim::ingest::{IngestOptions, ingest_corpus};
use polisim::pipeline::{self, Project};
use polisim::store::sqlite::Store;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

const ALL: IngestOptions<'static> = IngestOptions { force: false, only: None };

fn topic_of(id: &str) -> u8 {
    if ["chile", "colombia", "mexico"].iter().any(|c| id.starts_with(c)) { 0 } else { 1 }
}

#[test]
fn ingest_is_incremental() {
    let dir = TempDir::new().unwrap();
    let metadata = write_corpus(dir.path(), &two_topic_corpus());
    let config = Config::default();
    let store = Store::open_in_memory().unwrap();
    let embedder = HashEmbedder::default();

    let first = ingest_corpus(dir.path(), &config, &metadata, &store, &embedder, &ALL).unwrap();
    assert_eq!(first.ingested.len(), 6);
    assert_eq!(first.chunks_created, 6);
    assert_eq!(first.newly_embedded, 6);

    let second = ingest_corpus(dir.path(), &config, &metadata, &store, &embedder, &ALL).unwrap();
    assert!(second.ingested.is_empty());
    assert_eq!(second.unchanged.len(), 6);
    assert_eq!(second.newly_embedded, 0);

    let only = IngestOptions { force: true, only: Some("chile_politica_ia") };
    let forced = ingest_corpus(dir.path(), &config, &metadata, &store, &embedder, &only).unwrap();
    assert_eq!(forced.ingested, vec!["chile_politica_ia"]);
    assert_eq!(forced.newly_embedded, 1);
}

#[test]
fn unknown_single_policy_is_an_error() {
    let dir = TempDir::new().unwrap();
    let metadata = write_corpus(dir.path(), &two_topic_corpus());
    let store = Store::open_in_memory().unwrap();
    let only = IngestOptions { force: false, only: Some("chile_typo") };
    let err = ingest_corpus(
        dir.path(),
        &Config::default(),
        &metadata,
        &store,
        &HashEmbedder::default(),
        &only,
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("chile_typo not found"));
    assert_eq!(store.chunk_count().unwrap(), 0);
}

#[test]
fn policies_dropped_from_metadata_leave_the_store() {
    let dir = TempDir::new().unwrap();
    let mut metadata = write_corpus(dir.path(), &two_topic_corpus());
    let config = Config::default();
    let store = Store::open_in_memory().unwrap();
    let embedder = HashEmbedder::default();
    ingest_corpus(dir.path(), &config, &metadata, &store, &embedder, &ALL).unwrap();

    metadata.policies.retain(|p| p.policy_id != "japon_society5");
    let only = IngestOptions { force: false, only: Some("chile_politica_ia") };
    let single = ingest_corpus(dir.path(), &config, &metadata, &store, &embedder, &only).unwrap();
    assert!(single.removed.is_empty());
    assert_eq!(store.policy_ids().unwrap().len(), 6);

    let report = ingest_corpus(dir.path(), &config, &metadata, &store, &embedder, &ALL).unwrap();
    assert_eq!(report.removed, vec!["japon_society5"]);
    assert_eq!(report.unchanged.len(), 5);
    assert_eq!(store.chunk_count().unwrap(), 5);
    assert!(store.all_chunks("hash-bow").unwrap().iter().all(|c| c.policy_id != "japon_society5"));
}

#[test]
fn missing_text_is_reported() {
    let dir = TempDir::new().unwrap();
    let mut metadata = write_corpus(dir.path(), &two_topic_corpus()[..2]);
    metadata.policies.push(polisim::corpus::PolicyMeta {
        policy_id: "francia_plan".into(),
        country: "francia".into(),
        region: "europa".into(),
        year: None,
        language: None,
        title: None,
        extra: Default::default(),
    });
    let store = Store::open_in_memory().unwrap();
    let report = ingest_corpus(
        dir.path(),
        &Config::default(),
        &metadata,
        &store,
        &HashEmbedder::default(),
        &ALL,
    )
    .unwrap();
    assert_eq!(report.missing, vec!["francia_plan"]);
    assert_eq!(report.ingested.len(), 2);
}

#[test]
fn failing_chunks_are_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let metadata = write_corpus(dir.path(), &two_topic_corpus());
    let store = Store::open_in_memory().unwrap();
    let embedder = FlakyEmbedder {
        inner: HashEmbedder::default(),
        poison: "Japan",
    };
    let report = ingest_corpus(dir.path(), &Config::default(), &metadata, &store, &embedder, &ALL).unwrap();
    assert_eq!(report.newly_embedded, 5);
    assert_eq!(report.embed_failures, 1);
    assert_eq!(store.chunks_needing_embedding("hash-bow").unwrap().len(), 1);
}

struct StubExtractor;

impl TextExtractor for StubExtractor {
    fn extract(&self, _pdf: &Path) -> anyhow::Result<String> {
        Ok("Estrategia nacional de inteligencia artificial en educación. ".repeat(20))
    }
}

#[test]
fn single_pdf_path_is_relative_to_raw_dir() {
    let dir = TempDir::new().unwrap();
    let project = Project::open(dir.path()).unwrap();
    let raw = project.path(&project.config.paths.raw_dir);
    std::fs::create_dir_all(raw.join("spain")).unwrap();
    std::fs::write(raw.join("spain").join("enia_2020.pdf"), b"%PDF").unwrap();

    let report =
        pipeline::extract(&project, &StubExtractor, false, Some(Path::new("spain/enia_2020.pdf"))).unwrap();
    assert_eq!(report.processed, vec!["espana_enia_2020"]);
    assert!(project.config.processed_path(&project.root, "espana_enia_2020").exists());

    let absolute = raw.join("spain").join("enia_2020.pdf");
    let again = pipeline::extract(&project, &StubExtractor, true, Some(&absolute)).unwrap();
    assert_eq!(again.processed, vec!["espana_enia_2020"]);
}

#[test]
fn analysis_separates_topics() {
    let dir = TempDir::new().unwrap();
    let metadata = write_corpus(dir.path(), &two_topic_corpus());
    let config = Config::default();
    let store = Store::open_in_memory().unwrap();
    let embedder = HashEmbedder::default();
    ingest_corpus(dir.path(), &config, &metadata, &store, &embedder, &ALL).unwrap();

    let result = analysis::analyze(dir.path(), &config, &metadata, &store, &embedder).unwrap();
    assert_eq!(result.ids.len(), 6);
    assert_eq!(result.similarity.dim(), (6, 6));
    assert_eq!(result.clustering.groups.len(), 2);
    for members in result.clustering.groups.values() {
        let topic = topic_of(&members[0]);
        assert!(members.iter().all(|m| topic_of(m) == topic));
    }
    assert!(result.validation.values().all(|v| v.region_coherence));
    assert_eq!(result.clustering.linkage.len(), 5);
    assert_eq!(result.tsne.as_ref().map(Vec::len), Some(6));
    assert_eq!(result.umap.as_ref().map(Vec::len), Some(6));
    assert_eq!(result.network_edges.len(), 6);
    assert!(result.network_edges.iter().all(|e| topic_of(&e.source) == topic_of(&e.target)));
    assert_eq!(result.dimension_scores.len(), 6);
    assert!(result.dimension_scores.values().all(|row| row.len() == config.dimensions.len()));
}

#[test]
fn analysis_needs_two_embedded_policies() {
    let dir = TempDir::new().unwrap();
    let metadata = write_corpus(dir.path(), &two_topic_corpus()[..1]);
    let store = Store::open_in_memory().unwrap();
    let err = analysis::analyze(
        dir.path(),
        &Config::default(),
        &metadata,
        &store,
        &HashEmbedder::default(),
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("at least 2"));
}

#[test]
fn small_corpus_skips_tsne() {
    let dir = TempDir::new().unwrap();
    let docs = two_topic_corpus();
    let metadata = write_corpus(dir.path(), &docs[..3]);
    let config = Config::default();
    let store = Store::open_in_memory().unwrap();
    let embedder = HashEmbedder::default();
    ingest_corpus(dir.path(), &config, &metadata, &store, &embedder, &ALL).unwrap();

    let result = analysis::analyze(dir.path(), &config, &metadata, &store, &embedder).unwrap();
    assert!(result.tsne.is_none());
    assert!(result.umap.is_some());
}

#[test]
fn end_to_end_exports_results_and_chunk_pairs() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path(), &two_topic_corpus());
    Config::default().save(dir.path()).unwrap();

    let project = Project::open(dir.path()).unwrap();
    let store = project.store().unwrap();
    let embedder = HashEmbedder::default();

    pipeline::ingest(&project, &store, &embedder, &ALL).unwrap();
    let results_path = pipeline::analyze(&project, &store, &embedder).unwrap();
    assert!(results_path.ends_with(RESULTS_FILE));

    let results: Value = serde_json::from_str(&std::fs::read_to_string(&results_path).unwrap()).unwrap();
    for key in [
        "policies",
        "similarity_matrix",
        "policy_ids",
        "dimension_scores",
        "dimension_labels",
        "clusters",
        "cluster_validation",
        "region_colors",
        "metadata",
        "tsne",
        "umap",
        "dendrogram",
        "dimension_correlations",
        "network_edges",
        "sankey",
    ] {
        assert!(results.get(key).is_some(), "missing {key}");
    }
    assert_eq!(results["metadata"]["num_policies"], 6);
    assert_eq!(results["metadata"]["embedding_model"], "hash-bow");
    assert_eq!(results["policies"][0]["country"], "Chile");
    assert_eq!(results["policies"][0]["region_color"], "#388e3c");
    assert_eq!(results["policies"][0]["year"], 2023);
    let labels: Vec<&str> = results["dimension_labels"]
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(labels.len(), 7);
    assert_eq!(results["dendrogram"]["linkage_matrix"].as_array().unwrap().len(), 5);
    assert_eq!(results["sankey"]["nodes"].as_array().unwrap().len(), 4);
    assert!(results["clusters"].get("1").is_some());

    let pairs_path = pipeline::chunk_pairs(&project, &store, &embedder).unwrap();
    assert!(pairs_path.ends_with(CHUNK_PAIRS_FILE));
    let pairs: Value = serde_json::from_str(&std::fs::read_to_string(&pairs_path).unwrap()).unwrap();
    assert_eq!(pairs["metadata"]["num_pairs"], 6);
    assert_eq!(pairs["metadata"]["top_k"], 5);
    let first = &pairs["pairs"][0];
    assert_eq!(first["top_chunks"].as_array().unwrap().len(), 1);
    assert_eq!(first["top_chunks"][0]["chunk_a"]["index"], 0);
}

#[test]
fn verify_flags_unsupported_claims() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path(), &two_topic_corpus());
    let project = Project::open(dir.path()).unwrap();
    let store = project.store().unwrap();
    let embedder = HashEmbedder::default();
    pipeline::ingest(&project, &store, &embedder, &ALL).unwrap();

    let chapters = project.path(&project.config.paths.chapters_dir);
    std::fs::create_dir_all(&chapters).unwrap();
    std::fs::write(
        chapters.join("cap01-planteamiento.tex"),
        r"\chapter{Planteamiento}

La estrategia nacional promueve la formación docente en inteligencia artificial y la alfabetización digital de estudiantes en escuelas públicas \cite{mineduc2023}. Los volcanes submarinos emiten gases sulfurosos durante erupciones prolongadas.
",
    )
    .unwrap();

    let opts = polisim::verify::VerifyOptions {
        threshold: 0.35,
        strong_threshold: 0.5,
        n_results: 3,
    };
    let verdicts = pipeline::verify_chapter(&project, &store, &embedder, "cap01", &opts).unwrap();
    assert_eq!(verdicts.len(), 2);
    assert_eq!(verdicts[0].support, polisim::verify::Support::Strong);
    assert_eq!(verdicts[0].claim.cite_keys, vec!["mineduc2023"]);
    assert_eq!(verdicts[0].matches.len(), 3);
    assert_eq!(verdicts[1].support, polisim::verify::Support::Weak);
}
