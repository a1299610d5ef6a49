use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "polisim.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub storage: StorageConfig,
    pub embed: EmbedConfig,
    pub chunking: ChunkConfig,
    pub extract: ExtractConfig,
    pub analysis: AnalysisConfig,
    pub verify: VerifyConfig,
    pub dimensions: Vec<Dimension>,
    pub countries: BTreeMap<String, Country>,
    pub region_colors: BTreeMap<String, String>,
    pub region_names: BTreeMap<String, String>,
    /// Raw directory name -> country key (e.g. "spain" -> "espana")
    pub dir_aliases: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub metadata_file: PathBuf,
    pub output_dir: PathBuf,
    pub chapters_dir: PathBuf,
    pub manifest_file: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Where the .polisim store directory lives (default: inside the project root)
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    pub backend: EmbedBackend,
    /// Chunks embedded per store commit
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EmbedBackend {
    #[serde(rename = "ollama")]
    Ollama { model: String, url: String },
    #[serde(rename = "openai")]
    OpenAi { model: String },
    #[serde(rename = "none")]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Window length in characters
    pub size: usize,
    /// Characters shared between consecutive windows
    pub overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Cleaned texts shorter than this are treated as failed extractions
    pub min_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub cluster_threshold: f64,
    pub tsne_perplexity: f64,
    pub tsne_min_points: usize,
    pub umap_neighbors: usize,
    pub umap_min_dist: f64,
    pub seed: u64,
    pub network_threshold: f64,
    pub pair_threshold: f64,
    pub pair_top_k: usize,
    pub pair_max_chunks: usize,
    pub snippet_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub threshold: f32,
    pub strong_threshold: f32,
    pub n_results: usize,
}

/// An analytical dimension scored by similarity against its query text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dimension {
    pub key: String,
    pub label: String,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Country {
    pub name: String,
    pub region: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("policies/raw"),
            processed_dir: PathBuf::from("policies/processed"),
            metadata_file: PathBuf::from("policies/metadata.json"),
            output_dir: PathBuf::from("web/data"),
            chapters_dir: PathBuf::from("document/chapters"),
            manifest_file: PathBuf::from("policies/sources.toml"),
        }
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            backend: EmbedBackend::Ollama {
                model: "nomic-embed-text".into(),
                url: "http://localhost:11434".into(),
            },
            batch_size: 32,
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self { size: 800, overlap: 200 }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self { min_chars: 500 }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            cluster_threshold: 0.5,
            tsne_perplexity: 5.0,
            tsne_min_points: 4,
            umap_neighbors: 5,
            umap_min_dist: 0.3,
            seed: 42,
            network_threshold: 0.70,
            pair_threshold: 0.70,
            pair_top_k: 5,
            pair_max_chunks: 200,
            snippet_chars: 500,
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            threshold: 0.35,
            strong_threshold: 0.5,
            n_results: 5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            storage: StorageConfig::default(),
            embed: EmbedConfig::default(),
            chunking: ChunkConfig::default(),
            extract: ExtractConfig::default(),
            analysis: AnalysisConfig::default(),
            verify: VerifyConfig::default(),
            dimensions: default_dimensions(),
            countries: default_countries(),
            region_colors: string_map(&[
                ("europa", "#1976d2"),
                ("americas", "#388e3c"),
                ("asia_pacifico", "#d32f2f"),
                ("internacional", "#7b1fa2"),
            ]),
            region_names: string_map(&[
                ("europa", "Europa"),
                ("americas", "Américas"),
                ("asia_pacifico", "Asia-Pacífico"),
                ("internacional", "Internacional"),
            ]),
            dir_aliases: string_map(&[
                ("brazil", "brasil"),
                ("finland", "finlandia"),
                ("france", "francia"),
                ("germany", "alemania"),
                ("japan", "japon"),
                ("korea", "corea"),
                ("oecd", "ocde"),
                ("singapore", "singapur"),
                ("spain", "espana"),
                ("usa", "eeuu"),
                ("worldbank", "banco_mundial"),
            ]),
        }
    }
}

impl Config {
    /// Load config from a polisim.toml at the project root, falling back to defaults.
    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(CONFIG_FILE);
        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading config from {}", config_path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("parsing config from {}", config_path.display()))
        } else {
            Ok(Self::default())
        }
    }

    /// Write current config to disk (for `polisim init`).
    pub fn save(&self, project_root: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(project_root)
            .with_context(|| format!("creating project dir {}", project_root.display()))?;
        let config_path = project_root.join(CONFIG_FILE);
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, contents)
            .with_context(|| format!("writing config to {}", config_path.display()))?;
        Ok(config_path)
    }

    /// Resolve the actual storage directory path.
    pub fn storage_dir(&self, project_root: &Path) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| project_root.join(".polisim"))
    }

    /// Resolve a configured path against the project root unless already absolute.
    pub fn resolve(&self, project_root: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            project_root.join(path)
        }
    }

    pub fn processed_path(&self, project_root: &Path, policy_id: &str) -> PathBuf {
        self.resolve(project_root, &self.paths.processed_dir)
            .join(format!("{policy_id}.txt"))
    }

    pub fn region_color(&self, region: &str) -> &str {
        self.region_colors
            .get(region)
            .map(String::as_str)
            .unwrap_or("#666")
    }
}

fn string_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn default_dimensions() -> Vec<Dimension> {
    let dims = [
        (
            "gobernanza",
            "Gobernanza y regulación",
            "Regulación gubernamental, marcos legales, gobernanza de inteligencia artificial en educación, leyes, normativas, supervisión estatal, políticas de implementación",
        ),
        (
            "curriculo",
            "Currículo e integración educativa",
            "Currículo escolar, integración de inteligencia artificial en planes de estudio, competencias digitales, contenidos educativos, alfabetización en IA, programas académicos",
        ),
        (
            "formacion_docente",
            "Formación docente",
            "Formación de profesores en inteligencia artificial, capacitación docente, desarrollo profesional, competencias pedagógicas digitales, preparación del profesorado",
        ),
        (
            "infraestructura",
            "Infraestructura y acceso",
            "Infraestructura tecnológica educativa, acceso a internet, equipamiento escolar, conectividad, recursos digitales, inversión en tecnología educativa",
        ),
        (
            "etica",
            "Ética y valores",
            "Ética de la inteligencia artificial en educación, privacidad de datos estudiantiles, sesgo algorítmico, transparencia, responsabilidad, valores humanos",
        ),
        (
            "investigacion",
            "Investigación e innovación",
            "Investigación en inteligencia artificial educativa, innovación pedagógica, desarrollo de tecnología educativa, centros de investigación, financiamiento de I+D",
        ),
        (
            "equidad",
            "Equidad e inclusión",
            "Equidad educativa, inclusión digital, brecha digital, acceso igualitario a IA en educación, diversidad, poblaciones vulnerables, género en tecnología",
        ),
    ];
    dims.iter()
        .map(|(key, label, query)| Dimension {
            key: key.to_string(),
            label: label.to_string(),
            query: query.to_string(),
        })
        .collect()
}

fn default_countries() -> BTreeMap<String, Country> {
    let entries = [
        ("eu", "Unión Europea", "europa"),
        ("espana", "España", "europa"),
        ("francia", "Francia", "europa"),
        ("alemania", "Alemania", "europa"),
        ("finlandia", "Finlandia", "europa"),
        ("estonia", "Estonia", "europa"),
        ("eeuu", "Estados Unidos", "americas"),
        ("canada", "Canadá", "americas"),
        ("mexico", "México", "americas"),
        ("brasil", "Brasil", "americas"),
        ("chile", "Chile", "americas"),
        ("colombia", "Colombia", "americas"),
        ("china", "China", "asia_pacifico"),
        ("japon", "Japón", "asia_pacifico"),
        ("corea", "Corea del Sur", "asia_pacifico"),
        ("singapur", "Singapur", "asia_pacifico"),
        ("india", "India", "asia_pacifico"),
        ("australia", "Australia", "asia_pacifico"),
        ("unesco", "UNESCO", "internacional"),
        ("ocde", "OCDE", "internacional"),
        ("wef", "Foro Económico Mundial", "internacional"),
        ("banco_mundial", "Banco Mundial", "internacional"),
    ];
    entries
        .iter()
        .map(|(key, name, region)| {
            (
                key.to_string(),
                Country {
                    name: name.to_string(),
                    region: region.to_string(),
                },
            )
        })
        .collect()
}
