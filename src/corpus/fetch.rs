use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Marker used in the manifest for documents that must be downloaded by hand.
pub const MANUAL: &str = "MANUAL";

/// Anything smaller than this is almost certainly an error page, not a policy PDF.
const MIN_DOCUMENT_BYTES: usize = 1024;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) Thesis-Research/1.0";

/// `sources.toml`: where each corpus document comes from.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Manifest {
    #[serde(default)]
    pub documents: Vec<SourceDocument>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceDocument {
    /// Country folder under the raw directory
    pub dir: String,
    pub file: String,
    pub url: String,
    #[serde(default)]
    pub bib_key: String,
    #[serde(default)]
    pub notes: String,
}

impl SourceDocument {
    pub fn is_manual(&self) -> bool {
        self.url == MANUAL
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchEntry {
    pub country: String,
    pub file: String,
    pub bib_key: String,
    pub status: String,
}

#[derive(Debug, Default, Serialize)]
pub struct FetchReport {
    pub downloaded: Vec<FetchEntry>,
    pub manual: Vec<FetchEntry>,
    pub failed: Vec<FetchEntry>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing manifest {}", path.display()))
    }
}

/// Download a single URL. Returns the number of bytes written.
pub fn download(url: &str, dest: &Path) -> Result<usize> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(Duration::from_secs(30)))
        .build()
        .into();

    let result = agent.get(url).header("User-Agent", USER_AGENT).call();
    let mut response = match result {
        Ok(r) => r,
        Err(ureq::Error::StatusCode(code)) => bail!("HTTP {code}"),
        Err(e) => return Err(anyhow::anyhow!(e).context("request failed")),
    };

    let mut body = Vec::new();
    response
        .body_mut()
        .as_reader()
        .read_to_end(&mut body)
        .context("reading response body")?;

    if body.len() < MIN_DOCUMENT_BYTES {
        bail!("file too small ({} bytes), likely error page", body.len());
    }

    std::fs::write(dest, &body).with_context(|| format!("writing {}", dest.display()))?;
    Ok(body.len())
}

fn already_present(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.len() > MIN_DOCUMENT_BYTES as u64)
}

/// Fetch every manifest entry into `<raw_dir>/<dir>/<file>`, then write
/// `download_status.json` next to the raw directory.
pub fn fetch_all(manifest: &Manifest, raw_dir: &Path, delay: Duration) -> Result<FetchReport> {
    let mut report = FetchReport::default();

    for doc in &manifest.documents {
        let dest_dir = raw_dir.join(&doc.dir);
        std::fs::create_dir_all(&dest_dir)
            .with_context(|| format!("creating {}", dest_dir.display()))?;
        let dest = dest_dir.join(&doc.file);
        let entry = |status: String| FetchEntry {
            country: doc.dir.clone(),
            file: doc.file.clone(),
            bib_key: doc.bib_key.clone(),
            status,
        };

        if already_present(&dest) {
            report.downloaded.push(entry("already existed".into()));
            continue;
        }
        if doc.is_manual() {
            info!(file = %dest.display(), "manual download required: {}", doc.notes);
            report.manual.push(entry(doc.notes.clone()));
            continue;
        }

        match download(&doc.url, &dest) {
            Ok(bytes) => {
                let mb = bytes as f64 / (1024.0 * 1024.0);
                info!(file = %dest.display(), "downloaded {mb:.1} MB");
                report.downloaded.push(entry(format!("downloaded ({mb:.1} MB)")));
            }
            Err(e) => {
                warn!(file = %dest.display(), "download failed: {e:#}");
                report.failed.push(entry(format!("{e:#} | URL: {}", doc.url)));
            }
        }

        std::thread::sleep(delay);
    }

    let status_path = status_path(raw_dir);
    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(&status_path, json)
        .with_context(|| format!("writing {}", status_path.display()))?;

    Ok(report)
}

pub fn status_path(raw_dir: &Path) -> PathBuf {
    raw_dir
        .parent()
        .unwrap_or(raw_dir)
        .join("download_status.json")
}
