//! Application settings storage
//!
//! Settings live in a JSON file in the user config directory
//! (`<config_dir>/trendmap/settings.json`) or at an explicit path. Every field
//! has a default, so a missing file or a partial one is fine. Environment
//! variables take precedence over stored values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::types::DEFAULT_MAX_TEXTS;

/// Which generative model answers idea requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    Gemini,
    Anthropic,
    Disabled,
}

impl FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(LlmBackend::Gemini),
            "anthropic" => Ok(LlmBackend::Anthropic),
            "disabled" | "none" | "off" => Ok(LlmBackend::Disabled),
            other => Err(format!("Unknown LLM backend: {}", other)),
        }
    }
}

impl fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LlmBackend::Gemini => "gemini",
            LlmBackend::Anthropic => "anthropic",
            LlmBackend::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Address the HTTP server binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_llm_backend")]
    pub llm_backend: LlmBackend,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    #[serde(default = "default_anthropic_model")]
    pub anthropic_model: String,
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_secs: u64,
    /// Hugging Face repo of the sentence-transformer used for embeddings
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Let the whole batch form one cluster when nothing splits
    #[serde(default = "default_true")]
    pub allow_single_cluster: bool,
    /// Clusters forwarded to the model (clamped to 3..=5)
    #[serde(default = "default_max_payload_clusters")]
    pub max_payload_clusters: usize,
    #[serde(default = "default_keyword_count")]
    pub keyword_count: usize,
    #[serde(default = "default_example_max_len")]
    pub example_max_len: usize,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Largest batch a single request may carry
    #[serde(default = "default_max_texts")]
    pub max_texts: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_llm_backend() -> LlmBackend {
    LlmBackend::Gemini
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_anthropic_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_payload_clusters() -> usize {
    5
}

fn default_keyword_count() -> usize {
    6
}

fn default_example_max_len() -> usize {
    140
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_max_texts() -> usize {
    DEFAULT_MAX_TEXTS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            llm_backend: default_llm_backend(),
            gemini_model: default_gemini_model(),
            anthropic_model: default_anthropic_model(),
            gemini_api_key: None,
            anthropic_api_key: None,
            llm_timeout_secs: default_llm_timeout(),
            embedding_model: default_embedding_model(),
            allow_single_cluster: true,
            max_payload_clusters: default_max_payload_clusters(),
            keyword_count: default_keyword_count(),
            example_max_len: default_example_max_len(),
            max_body_bytes: default_max_body_bytes(),
            max_texts: default_max_texts(),
        }
    }
}

impl Settings {
    /// Default settings file location, if the platform has a config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("trendmap").join("settings.json"))
    }

    /// Load settings from disk; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Settings::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read settings {}: {}", path.display(), e))?;
        serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse settings {}: {}", path.display(), e))
    }

    /// Load from `path` (or the default location), then apply the environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self, String> {
        let mut settings = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(p) => Self::load(&p)?,
            None => Settings::default(),
        };
        settings.apply_env()?;
        Ok(settings)
    }

    /// Environment variables take precedence over stored values.
    pub fn apply_env(&mut self) -> Result<(), String> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), String> {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(key) = var("GEMINI_API_KEY") {
            self.gemini_api_key = Some(key);
        }
        if let Some(key) = var("ANTHROPIC_API_KEY") {
            self.anthropic_api_key = Some(key);
        }
        if let Some(addr) = var("TRENDMAP_BIND") {
            self.bind_addr = addr;
        }
        if let Some(backend) = var("TRENDMAP_LLM_BACKEND") {
            self.llm_backend = backend.parse()?;
        }
        Ok(())
    }

    /// API key for the configured backend, masked for display.
    pub fn masked_api_key(&self) -> Option<String> {
        let key = match self.llm_backend {
            LlmBackend::Gemini => self.gemini_api_key.as_deref(),
            LlmBackend::Anthropic => self.anthropic_api_key.as_deref(),
            LlmBackend::Disabled => None,
        }?;
        Some(mask(key))
    }
}

/// Show first 8 / last 4 chars of long keys, stars otherwise.
fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 12 {
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "*".repeat(chars.len())
    }
}
