//! Check cited claims in thesis chapters against the policy corpus.

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::embed::{Embedder, cosine_similarity};
use crate::store::sqlite::{Store, StoredChunk};

const MIN_CLAIM_CHARS: usize = 30;
const MIN_BLOCK_CHARS: usize = 40;
const MAX_QUERY_CHARS: usize = 500;
const SNIPPET_CHARS: usize = 120;

static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)%.*$").unwrap());
static ENVIRONMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\\(?:begin|end)\{[^}]+\}").unwrap());
static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\(?:text(?:it|bf|tt|sc)|emph)\{([^}]*)\}").unwrap());
static CITATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"~?\\cite[pt]?\{([^}]*)\}").unwrap());
static STRUCTURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\(?:label|ref|section|subsection|chapter|footnote)\{[^}]*\}").unwrap()
});
static ITEM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\\item(?:\[[^\]]*\])?").unwrap());
static COMMAND_WITH_ARG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\[a-zA-Z]+\*?(?:\[[^\]]*\])?\{([^}]*)\}").unwrap());
static COMMAND: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\\[a-zA-Z]+").unwrap());
static QUOTES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"``|''").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static BLOCK_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n|\n\\(?:section|subsection)").unwrap());
static STRUCTURAL_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[%\\]*(?:label|begin|end|chapter|section)").unwrap());
static CITE_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[CITE:([^\]]+)\]").unwrap());
static CITE_MARKER_STRIP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\[CITE:[^\]]+\]").unwrap());

/// Reduce LaTeX source to readable text, turning citations into `[CITE:keys]`.
pub fn strip_latex(text: &str) -> String {
    let text = COMMENT.replace_all(text, "");
    let text = ENVIRONMENT.replace_all(&text, "");
    let text = EMPHASIS.replace_all(&text, "$1");
    let text = CITATION.replace_all(&text, " [CITE:$1]");
    let text = STRUCTURE.replace_all(&text, "");
    let text = ITEM.replace_all(&text, "");
    let text = COMMAND_WITH_ARG.replace_all(&text, "$1");
    let text = COMMAND.replace_all(&text, "");
    let text = text.replace(['{', '}'], "");
    let text = QUOTES.replace_all(&text, "\"");
    let text = text.replace('~', " ");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

fn split_keys(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',').map(|k| k.trim().to_string()).filter(|k| !k.is_empty())
}

/// Split after `.`, `!` or `?` when followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?')
            && chars.peek().is_some_and(|(_, next)| next.is_whitespace())
        {
            out.push(&text[start..i + c.len_utf8()]);
            while chars.peek().is_some_and(|(_, next)| next.is_whitespace()) {
                chars.next();
            }
            start = chars.peek().map_or(text.len(), |(j, _)| *j);
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Claim {
    pub text: String,
    pub cite_keys: Vec<String>,
    pub paragraph: usize,
}

/// Sentences with substance from every paragraph, tagged with the citation
/// keys they carry (or their paragraph's, when the sentence has none).
pub fn extract_claims(tex: &str) -> Vec<Claim> {
    let mut claims = Vec::new();
    for (paragraph, block) in BLOCK_SPLIT.split(tex).enumerate() {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        if STRUCTURAL_BLOCK.is_match(block) && !block.contains("\\cite") {
            continue;
        }

        let block_keys: Vec<String> = CITATION
            .captures_iter(block)
            .flat_map(|c| split_keys(c.get(1).map_or("", |m| m.as_str())).collect::<Vec<_>>())
            .collect();

        let plain = strip_latex(block);
        if plain.chars().count() < MIN_BLOCK_CHARS {
            continue;
        }

        for sentence in split_sentences(&plain) {
            let sentence = sentence.trim();
            if sentence.chars().count() < MIN_CLAIM_CHARS {
                continue;
            }
            let keys: Vec<String> = CITE_MARKER
                .captures_iter(sentence)
                .flat_map(|c| split_keys(c.get(1).map_or("", |m| m.as_str())).collect::<Vec<_>>())
                .collect();
            let clean = CITE_MARKER_STRIP.replace_all(sentence, "").trim().to_string();
            if clean.chars().count() < MIN_CLAIM_CHARS {
                continue;
            }
            claims.push(Claim {
                text: clean,
                cite_keys: if keys.is_empty() { block_keys.clone() } else { keys },
                paragraph,
            });
        }
    }
    claims
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Support {
    Strong,
    Moderate,
    Weak,
    Error,
}

impl Support {
    pub fn mark(self) -> char {
        match self {
            Support::Strong => '+',
            Support::Moderate => '~',
            Support::Weak => '!',
            Support::Error => 'X',
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimMatch {
    pub policy_id: String,
    pub chunk_index: usize,
    pub similarity: f32,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    #[serde(flatten)]
    pub claim: Claim,
    pub matches: Vec<ClaimMatch>,
    pub best_score: f32,
    pub support: Support,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub threshold: f32,
    pub strong_threshold: f32,
    pub n_results: usize,
}

pub fn classify(best: f32, opts: &VerifyOptions) -> Support {
    if best >= opts.strong_threshold {
        Support::Strong
    } else if best >= opts.threshold {
        Support::Moderate
    } else {
        Support::Weak
    }
}

fn snippet(text: &str) -> String {
    if text.chars().count() > SNIPPET_CHARS {
        let head: String = text.chars().take(SNIPPET_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

fn nearest(query: &[f32], chunks: &[StoredChunk], n: usize) -> Vec<ClaimMatch> {
    let mut scored: Vec<(usize, f32)> = chunks
        .iter()
        .enumerate()
        .map(|(i, c)| (i, cosine_similarity(query, &c.embedding)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(n);
    scored
        .into_iter()
        .map(|(i, sim)| ClaimMatch {
            policy_id: chunks[i].policy_id.clone(),
            chunk_index: chunks[i].index,
            similarity: (sim * 1000.0).round() / 1000.0,
            snippet: snippet(&chunks[i].content),
        })
        .collect()
}

/// Score each claim against its nearest corpus chunks.
pub fn verify_claims(
    store: &Store,
    embedder: &dyn Embedder,
    claims: &[Claim],
    opts: &VerifyOptions,
) -> Result<Vec<Verdict>> {
    let chunks = store.all_chunks(embedder.model_name())?;
    if chunks.is_empty() {
        bail!(
            "no chunks embedded with {} (run ingest first)",
            embedder.model_name()
        );
    }
    debug!(chunks = chunks.len(), claims = claims.len(), "verifying");

    let verdicts = claims
        .iter()
        .map(|claim| {
            let query: String = claim.text.chars().take(MAX_QUERY_CHARS).collect();
            match embedder.embed(&query) {
                Ok(v) => {
                    let matches = nearest(&v, &chunks, opts.n_results);
                    let best = matches.first().map_or(0.0, |m| m.similarity);
                    Verdict {
                        claim: claim.clone(),
                        support: classify(best, opts),
                        best_score: best,
                        matches,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("claim in paragraph {} not embedded: {e:#}", claim.paragraph);
                    Verdict {
                        claim: claim.clone(),
                        matches: Vec::new(),
                        best_score: 0.0,
                        support: Support::Error,
                        error: Some(format!("{e:#}")),
                    }
                }
            }
        })
        .collect();
    Ok(verdicts)
}

/// `<chapter>-planteamiento.tex`, else the first `<chapter>*.tex` by name.
pub fn find_chapter(chapters_dir: &Path, chapter: &str) -> Result<PathBuf> {
    let preferred = chapters_dir.join(format!("{chapter}-planteamiento.tex"));
    if preferred.exists() {
        return Ok(preferred);
    }
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(chapters_dir)
        .with_context(|| format!("reading {}", chapters_dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension().is_some_and(|e| e == "tex")
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(chapter))
        })
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .with_context(|| format!("no .tex file for chapter '{chapter}' in {}", chapters_dir.display()))
}

fn shorten(text: &str, width: usize) -> String {
    let flat = WHITESPACE.replace_all(text, " ");
    if flat.chars().count() <= width {
        return flat.into_owned();
    }
    let head: String = flat.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", head.trim_end())
}

/// Human-readable report, weakest claims listed again at the end.
pub fn render_report(verdicts: &[Verdict], chapter: &str, opts: &VerifyOptions) -> String {
    let count = |s: Support| verdicts.iter().filter(|v| v.support == s).count();
    let rule = "=".repeat(70);
    let mut out = String::new();

    let _ = writeln!(out, "{rule}\n  Semantic verification: {chapter}\n{rule}");
    let _ = writeln!(out, "  Claims analysed: {}", verdicts.len());
    let _ = writeln!(out, "  Strong (>= {:.2}): {}", opts.strong_threshold, count(Support::Strong));
    let _ = writeln!(out, "  Moderate (>= {:.2}): {}", opts.threshold, count(Support::Moderate));
    let _ = writeln!(out, "  Weak (< {:.2}): {}", opts.threshold, count(Support::Weak));
    let errors = count(Support::Error);
    if errors > 0 {
        let _ = writeln!(out, "  Errors: {errors}");
    }
    let _ = writeln!(out, "{rule}\n");

    let cites = |v: &Verdict| {
        if v.claim.cite_keys.is_empty() {
            "(no citation)".to_string()
        } else {
            v.claim.cite_keys.join(", ")
        }
    };

    for (i, v) in verdicts.iter().enumerate() {
        let _ = writeln!(out, "[{}] #{}: {}", v.support.mark(), i + 1, shorten(&v.claim.text, 90));
        let _ = writeln!(out, "    Citations: {}", cites(v));
        let _ = writeln!(out, "    Score: {:.3} ({:?})", v.best_score, v.support);
        if let Some(top) = v.matches.first() {
            let _ = writeln!(
                out,
                "    -> {} (chunk {}): {:.3}\n      \"{}\"",
                top.policy_id,
                top.chunk_index,
                top.similarity,
                shorten(&top.snippet, 80)
            );
        }
        if v.support == Support::Weak {
            let _ = writeln!(out, "    weak semantic support, check the source");
        }
        let _ = writeln!(out);
    }

    let weak: Vec<&Verdict> = verdicts.iter().filter(|v| v.support == Support::Weak).collect();
    if weak.is_empty() {
        let _ = writeln!(out, "All claims have acceptable semantic support.");
    } else {
        let _ = writeln!(out, "{rule}\n  Weakly supported claims ({})\n{rule}", weak.len());
        for (i, v) in weak.iter().enumerate() {
            let _ = writeln!(out, "  {}. {}", i + 1, shorten(&v.claim.text, 80));
            let _ = writeln!(out, "     Citations: {} | Score: {:.3}", cites(v), v.best_score);
        }
    }
    out
}
