pub mod chunker;
pub mod extract;
pub mod fetch;
pub mod hasher;
pub mod walker;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Contents of `metadata.json`: the curated list of policies in the corpus.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub policies: Vec<PolicyMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyMeta {
    pub policy_id: String,
    pub country: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Anything else the curator recorded; passed through to the export untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Metadata {
    /// Load `metadata.json`. A missing file is an empty corpus, not an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading metadata from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parsing metadata from {}", path.display()))
    }

    pub fn get(&self, policy_id: &str) -> Option<&PolicyMeta> {
        self.policies.iter().find(|p| p.policy_id == policy_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.policies.iter().map(|p| p.policy_id.clone()).collect()
    }
}

/// `("australia", "ai_action_plan_2021.pdf")` -> `"australia_ai_action_plan_2021"`.
pub fn build_policy_id(country_key: &str, file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    format!("{country_key}_{stem}")
}

/// Map a raw folder name to its country key, falling back to the folder name itself.
pub fn country_key_for_dir<'a>(dir: &'a str, aliases: &'a BTreeMap<String, String>) -> &'a str {
    aliases.get(dir).map(String::as_str).unwrap_or(dir)
}
