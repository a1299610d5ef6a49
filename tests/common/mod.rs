#![allow(dead_code)]

use anyhow::{Result, bail};
use std::path::Path;

use polisim::config::Config;
use polisim::corpus::{Metadata, PolicyMeta};
use polisim::embed::Embedder;

/// Bag-of-words vectors with tokens hashed into a fixed number of buckets.
pub struct HashEmbedder {
    pub dims: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dims: 256 }
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() > 2)
        {
            let hash = blake3::hash(token.to_lowercase().as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&hash.as_bytes()[..8]);
            v[(u64::from_le_bytes(bytes) % self.dims as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "hash-bow"
    }
}

/// Fails whole batches, and any single text containing `poison`.
pub struct FlakyEmbedder {
    pub inner: HashEmbedder,
    pub poison: &'static str,
}

impl Embedder for FlakyEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains(self.poison) {
            bail!("refused");
        }
        self.inner.embed(text)
    }

    fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        bail!("batch endpoint unavailable")
    }

    fn dimensions(&self) -> usize {
        self.inner.dims
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

pub const EDUCATION: &str = "La estrategia nacional promueve la formación docente en inteligencia \
artificial, la actualización del currículo escolar y la alfabetización digital de estudiantes en \
todas las escuelas públicas del país.";

pub const INDUSTRY: &str = "The industrial robotics roadmap funds semiconductor fabrication plants, \
supercomputing clusters and autonomous manufacturing lines for export oriented factories.";

/// Metadata entry plus its processed text.
pub struct Doc {
    pub id: &'static str,
    pub country: &'static str,
    pub region: &'static str,
    pub title: &'static str,
    pub text: String,
}

pub fn doc(id: &'static str, country: &'static str, region: &'static str, base: &str, extra: &str) -> Doc {
    Doc {
        id,
        country,
        region,
        title: id,
        text: format!("{base} {extra}"),
    }
}

/// Two topical groups of three documents each.
pub fn two_topic_corpus() -> Vec<Doc> {
    vec![
        doc("chile_politica_ia", "chile", "americas", EDUCATION, "Chile prioriza regiones rurales."),
        doc("colombia_conpes", "colombia", "americas", EDUCATION, "Colombia crea observatorios locales."),
        doc("mexico_agenda", "mexico", "americas", EDUCATION, "México amplía becas tecnológicas."),
        doc("japon_society5", "japon", "asia_pacifico", INDUSTRY, "Japan invests in sensors."),
        doc("corea_ai_strategy", "corea", "asia_pacifico", INDUSTRY, "Korea expands memory chips."),
        doc("china_next_gen", "china", "asia_pacifico", INDUSTRY, "China builds data centres."),
    ]
}

/// Write metadata.json and the processed texts under the default config paths.
pub fn write_corpus(root: &Path, docs: &[Doc]) -> Metadata {
    let config = Config::default();
    let metadata = Metadata {
        policies: docs
            .iter()
            .map(|d| PolicyMeta {
                policy_id: d.id.into(),
                country: d.country.into(),
                region: d.region.into(),
                year: Some(2023),
                language: Some("es".into()),
                title: Some(d.title.into()),
                extra: Default::default(),
            })
            .collect(),
    };

    let meta_path = config.resolve(root, &config.paths.metadata_file);
    std::fs::create_dir_all(meta_path.parent().unwrap()).unwrap();
    std::fs::write(&meta_path, serde_json::to_string_pretty(&metadata).unwrap()).unwrap();

    for d in docs {
        let path = config.processed_path(root, d.id);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, &d.text).unwrap();
    }
    metadata
}
