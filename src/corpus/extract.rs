use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use super::walker::{parent_dir_name, walk_pdfs};
use super::{build_policy_id, country_key_for_dir};

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static PAGE_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{1,3}\s*\|\s*").unwrap());
static PAGE_OF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)Page \d+ of \d+").unwrap());
static DOT_LEADERS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.{4,}").unwrap());
static CONTROL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f]").unwrap());

/// Turns a PDF into raw text. Swappable so tests never need a real PDF.
pub trait TextExtractor {
    fn extract(&self, pdf: &Path) -> Result<String>;
}

/// Default extractor backed by the `pdf-extract` crate.
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, pdf: &Path) -> Result<String> {
        // pdf-extract panics on some malformed fonts; treat that as a failed document.
        let result = std::panic::catch_unwind(|| pdf_extract::extract_text(pdf));
        match result {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(anyhow!("{e:?}")).with_context(|| format!("extracting {}", pdf.display())),
            Err(_) => bail!("pdf parser panicked on {}", pdf.display()),
        }
    }
}

/// Normalise extracted PDF text for embedding.
pub fn clean_text(raw: &str) -> String {
    let text = WHITESPACE.replace_all(raw, " ");
    let text = PAGE_NUMBER.replace_all(&text, "");
    let text = PAGE_OF.replace_all(&text, "");
    let text = DOT_LEADERS.replace_all(&text, " ");
    let text = CONTROL.replace_all(&text, "");
    text.trim().to_string()
}

#[derive(Debug, Default, Serialize)]
pub struct ExtractReport {
    pub processed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl ExtractReport {
    pub fn ready(&self) -> usize {
        self.processed.len() + self.skipped.len()
    }
}

pub struct ExtractOptions<'a> {
    pub raw_dir: &'a Path,
    pub processed_dir: &'a Path,
    pub aliases: &'a BTreeMap<String, String>,
    pub min_chars: usize,
    pub force: bool,
}

/// Policy id and output path for a raw PDF, derived from its country folder.
pub fn output_for(
    pdf: &Path,
    processed_dir: &Path,
    aliases: &BTreeMap<String, String>,
) -> Result<(String, PathBuf)> {
    let dir = parent_dir_name(pdf)
        .with_context(|| format!("{} has no country folder", pdf.display()))?;
    let file_name = pdf
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no file name", pdf.display()))?;
    let policy_id = build_policy_id(country_key_for_dir(dir, aliases), file_name);
    let output = processed_dir.join(format!("{policy_id}.txt"));
    Ok((policy_id, output))
}

/// Extract, clean and write one PDF. Returns the policy id and cleaned length.
pub fn extract_one(
    pdf: &Path,
    opts: &ExtractOptions,
    extractor: &dyn TextExtractor,
) -> Result<(String, usize)> {
    let (policy_id, output) = output_for(pdf, opts.processed_dir, opts.aliases)?;
    let raw = extractor.extract(pdf)?;
    let cleaned = clean_text(&raw);
    let len = cleaned.chars().count();
    if len < opts.min_chars {
        bail!("extracted text too short: {len} chars");
    }
    std::fs::create_dir_all(opts.processed_dir)
        .with_context(|| format!("creating {}", opts.processed_dir.display()))?;
    std::fs::write(&output, cleaned)
        .with_context(|| format!("writing {}", output.display()))?;
    Ok((policy_id, len))
}

/// Extract every PDF under the raw directory into `<processed>/<policy_id>.txt`.
pub fn extract_all(opts: &ExtractOptions, extractor: &dyn TextExtractor) -> Result<ExtractReport> {
    let mut report = ExtractReport::default();

    for pdf in walk_pdfs(opts.raw_dir)? {
        let (policy_id, output) = match output_for(&pdf, opts.processed_dir, opts.aliases) {
            Ok(pair) => pair,
            Err(e) => {
                warn!("skipping {}: {e:#}", pdf.display());
                continue;
            }
        };

        if output.exists() && !opts.force {
            debug!(policy_id = %policy_id, "already processed");
            report.skipped.push(policy_id);
            continue;
        }

        match extract_one(&pdf, opts, extractor) {
            Ok((id, len)) => {
                info!(policy_id = %id, chars = len, "extracted");
                report.processed.push(id);
            }
            Err(e) => {
                warn!(policy_id = %policy_id, "extraction failed: {e:#}");
                report.failed.push((policy_id, format!("{e:#}")));
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeExtractor;

    impl TextExtractor for FakeExtractor {
        fn extract(&self, pdf: &Path) -> Result<String> {
            let name = pdf.file_name().unwrap().to_str().unwrap();
            if name.starts_with("short") {
                Ok("tiny".into())
            } else if name.starts_with("broken") {
                bail!("corrupt xref table")
            } else {
                Ok("Inteligencia artificial en educación. ".repeat(30))
            }
        }
    }

    #[test]
    fn clean_collapses_whitespace_and_artifacts() {
        let raw = "Estrategia\n\n nacional 12 | de IA\tPage 3 of 40 Índice.......... 7\u{0}";
        assert_eq!(clean_text(raw), "Estrategia nacional de IA  Índice  7");
    }

    #[test]
    fn clean_is_case_insensitive_for_page_footers() {
        assert_eq!(clean_text("a PAGE 1 OF 2 b"), "a  b");
    }

    #[test]
    fn extract_all_reports_each_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        let processed = dir.path().join("processed");
        for (folder, file) in [
            ("spain", "enia_2020.pdf"),
            ("chile", "short_2021.pdf"),
            ("japan", "broken_2019.pdf"),
        ] {
            std::fs::create_dir_all(raw.join(folder)).unwrap();
            std::fs::write(raw.join(folder).join(file), b"%PDF").unwrap();
        }
        let mut aliases = BTreeMap::new();
        aliases.insert("spain".into(), "espana".into());

        let opts = ExtractOptions {
            raw_dir: &raw,
            processed_dir: &processed,
            aliases: &aliases,
            min_chars: 500,
            force: false,
        };
        let report = extract_all(&opts, &FakeExtractor).unwrap();
        assert_eq!(report.processed, vec!["espana_enia_2020"]);
        assert_eq!(report.failed.len(), 2);
        assert!(processed.join("espana_enia_2020.txt").exists());

        let again = extract_all(&opts, &FakeExtractor).unwrap();
        assert_eq!(again.skipped, vec!["espana_enia_2020"]);
        assert!(again.processed.is_empty());
    }
}
