use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use polisim::config::{CONFIG_FILE, Config};
use polisim::corpus::extract::PdfExtractor;
use polisim::embed;
use polisim::ingest::IngestOptions;
use polisim::pipeline::{self, Project, RunOptions};
use polisim::verify::VerifyOptions;

#[derive(Parser)]
#[command(name = "polisim", version, about = "Similarity analysis of AI-in-education policies")]
struct Cli {
    /// Project root (where polisim.toml lives)
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default polisim.toml and create the data directories
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
    /// Download corpus documents listed in the sources manifest
    Fetch,
    /// Extract text from policy PDFs
    Extract {
        /// Re-extract even when the text file exists
        #[arg(long)]
        force: bool,
        /// Extract a single PDF, relative to the raw dir (e.g. spain/enia_2020.pdf)
        #[arg(long)]
        policy: Option<PathBuf>,
    },
    /// Chunk processed texts and embed them into the vector store
    Ingest {
        /// Re-chunk unchanged texts
        #[arg(long)]
        force: bool,
        /// Only this policy id
        #[arg(long)]
        policy: Option<String>,
    },
    /// Similarity, dimension scores, clustering and projections into results.json
    Analyze,
    /// Top matching chunk pairs for strongly similar policies
    ChunkPairs,
    /// Full pipeline: extract, ingest, analyze, chunk pairs
    Run {
        #[arg(long)]
        skip_extract: bool,
        #[arg(long)]
        skip_ingest: bool,
        #[arg(long)]
        force: bool,
    },
    /// Check a thesis chapter's cited claims against the corpus
    Verify {
        /// Chapter identifier, e.g. cap01
        #[arg(long)]
        chapter: String,
        /// Minimum similarity for moderate support
        #[arg(long)]
        threshold: Option<f32>,
        /// Matches per claim
        #[arg(long)]
        n_results: Option<usize>,
    },
    /// Show corpus and store statistics
    Status,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "polisim=debug" } else { "polisim=info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Init { force } => init(&cli.root, force),
        command => execute(&Project::open(&cli.root)?, command),
    }
}

fn execute(project: &Project, command: Commands) -> Result<()> {
    match command {
        Commands::Init { .. } => bail!("init runs before a project exists"),
        Commands::Fetch => {
            pipeline::fetch(project)?;
        }
        Commands::Extract { force, policy } => {
            pipeline::extract(project, &PdfExtractor, force, policy.as_deref())?;
        }
        Commands::Ingest { force, policy } => {
            let embedder = embed::from_config(&project.config.embed)?;
            let store = project.store()?;
            let opts = IngestOptions {
                force,
                only: policy.as_deref(),
            };
            pipeline::ingest(project, &store, embedder.as_ref(), &opts)?;
        }
        Commands::Analyze => {
            let embedder = embed::from_config(&project.config.embed)?;
            let store = project.store()?;
            pipeline::analyze(project, &store, embedder.as_ref())?;
        }
        Commands::ChunkPairs => {
            let embedder = embed::from_config(&project.config.embed)?;
            let store = project.store()?;
            pipeline::chunk_pairs(project, &store, embedder.as_ref())?;
        }
        Commands::Run {
            skip_extract,
            skip_ingest,
            force,
        } => {
            let embedder = embed::from_config(&project.config.embed)?;
            let opts = RunOptions {
                skip_extract,
                skip_ingest,
                force,
            };
            pipeline::run(project, &PdfExtractor, embedder.as_ref(), &opts)?;
        }
        Commands::Verify {
            chapter,
            threshold,
            n_results,
        } => {
            let embedder = embed::from_config(&project.config.embed)?;
            let store = project.store()?;
            let vc = &project.config.verify;
            let opts = VerifyOptions {
                threshold: threshold.unwrap_or(vc.threshold),
                strong_threshold: vc.strong_threshold,
                n_results: n_results.unwrap_or(vc.n_results),
            };
            pipeline::verify_chapter(project, &store, embedder.as_ref(), &chapter, &opts)?;
        }
        Commands::Status => {
            pipeline::status(project)?;
        }
    }

    Ok(())
}

fn init(root: &std::path::Path, force: bool) -> Result<()> {
    if root.join(CONFIG_FILE).exists() && !force {
        bail!("{} already exists (use --force to overwrite)", root.join(CONFIG_FILE).display());
    }
    let config = Config::default();
    let path = config.save(root)?;
    for dir in [
        &config.paths.raw_dir,
        &config.paths.processed_dir,
        &config.paths.output_dir,
        &config.paths.chapters_dir,
    ] {
        let dir = config.resolve(root, dir);
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    println!("wrote {}", path.display());
    Ok(())
}
