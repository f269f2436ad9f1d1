//! Idea generation: prompt drafting, the model call with one truncation
//! retry, and JSON recovery from whatever text comes back.
//!
//! The flow is `Drafting -> Sent -> Received`, then either parsed, retried once
//! on truncation, or reported as empty/malformed. Model transport failures are
//! returned as [`ModelError`]; the pipeline decides how to degrade.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::ai_client::{Completion, GenerationConfig, GenerativeModel};
use crate::error::ModelError;
use crate::payload::LlmPayload;
use crate::types::{IdeaAnalysis, IdeaOutcome};

/// First call: a roomy budget.
pub const FIRST_ATTEMPT: GenerationConfig = GenerationConfig {
    temperature: 0.2,
    max_output_tokens: 4096,
    json_response: true,
};

/// Single retry after truncation: smaller budget, more conservative sampling.
pub const RETRY_ATTEMPT: GenerationConfig = GenerationConfig {
    temperature: 0.1,
    max_output_tokens: 3072,
    json_response: true,
};

/// Candidate start positions tried when searching text for embedded JSON.
const MAX_JSON_CANDIDATES: usize = 64;

/// Result of reading model text as JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(Value),
    Malformed(String),
    Empty,
}

/// Drives one idea-generation exchange with a model.
pub struct IdeaOrchestrator {
    model: Arc<dyn GenerativeModel>,
}

impl IdeaOrchestrator {
    pub fn new(model: Arc<dyn GenerativeModel>) -> Self {
        Self { model }
    }

    /// Ask the model for one idea per payload cluster.
    ///
    /// An empty payload is skipped without calling the model.
    pub fn run(&self, payload: &LlmPayload) -> Result<IdeaOutcome, ModelError> {
        if payload.clusters.is_empty() {
            debug!("no clusters to send, skipping idea generation");
            return Ok(IdeaOutcome::Skipped);
        }

        let prompt = build_prompt(payload);
        let completion = self.send(&prompt)?;

        match parse_model_text(&completion.text) {
            ParseOutcome::Empty => {
                warn!(model = self.model.name(), "model returned empty response");
                Ok(IdeaOutcome::Empty)
            }
            ParseOutcome::Malformed(raw_text) => {
                warn!(
                    model = self.model.name(),
                    chars = raw_text.len(),
                    "model output malformed, returning raw text"
                );
                Ok(IdeaOutcome::Malformed { raw_text })
            }
            ParseOutcome::Parsed(value) => match analyses_from_value(value) {
                Some(analyses) => {
                    info!(
                        analyses = analyses.len(),
                        truncated = completion.truncated,
                        "parsed idea analyses"
                    );
                    Ok(IdeaOutcome::Parsed {
                        analyses,
                        raw_text: completion.text,
                    })
                }
                None => {
                    warn!(
                        model = self.model.name(),
                        truncated = completion.truncated,
                        "model JSON holds no readable analysis, returning raw text"
                    );
                    Ok(IdeaOutcome::Malformed {
                        raw_text: completion.text,
                    })
                }
            },
        }
    }

    fn send(&self, prompt: &str) -> Result<Completion, ModelError> {
        info!(
            model = self.model.name(),
            temperature = FIRST_ATTEMPT.temperature,
            max_output_tokens = FIRST_ATTEMPT.max_output_tokens,
            prompt_chars = prompt.len(),
            "requesting ideas"
        );
        let first = self.model.generate(prompt, &FIRST_ATTEMPT)?;
        debug!(raw = %first.text, truncated = first.truncated, "model output");

        if !first.truncated {
            return Ok(first);
        }

        warn!(
            max_output_tokens = RETRY_ATTEMPT.max_output_tokens,
            "model output truncated, retrying once"
        );
        let retry = self.model.generate(prompt, &RETRY_ATTEMPT)?;
        debug!(raw = %retry.text, truncated = retry.truncated, "model output after retry");
        if retry.truncated {
            warn!("retry was truncated too, parsing what came back");
        }
        Ok(retry)
    }
}

/// Render the fixed-structure prompt for a payload.
pub fn build_prompt(payload: &LlmPayload) -> String {
    let clusters = serde_json::to_string_pretty(&payload.clusters).unwrap_or_default();
    let outliers = if payload.outliers_sample.is_empty() {
        String::new()
    } else {
        format!(
            "\nUnclustered samples (context only, no ideas needed):\n{}\n",
            serde_json::to_string(&payload.outliers_sample).unwrap_or_default()
        )
    };

    format!(
        r#"You are an elite YouTube Shorts trend analyst.

User query: "{query}"

For EACH cluster, generate exactly ONE scroll-stopping Shorts idea.
Your job is to find CONTENT GAPS creators are NOT doing yet.

STRICT RULES:
- Output must be VALID JSON ONLY (no markdown, no commentary)
- Exactly 1 idea per cluster
- Description max 8 words
- Title max 12 words; catchy and YouTube-attractive
- Every string on a single line, no unfinished quotes
- Do NOT suggest:
  - testing viral hacks
  - reviewing weird tools
  - generic transformations
  - reaction videos
- Each idea must target a clear audience (teen girls, Indian creators, beginners, etc.)

Clusters:
{clusters}
{outliers}
Return ONLY valid JSON:

{{
  "cluster_analysis": [
    {{
      "cluster_id": 0,
      "theme": "...",
      "gaps": ["..."],
      "ideas": [
        {{
          "title": "...",
          "description": "...",
          "format": "...",
          "noveltyScore": "1-10"
        }}
      ]
    }}
  ]
}}"#,
        query = payload.query,
        clusters = clusters,
        outliers = outliers,
    )
}

/// Classify raw model text as parsed JSON, malformed text, or nothing.
pub fn parse_model_text(text: &str) -> ParseOutcome {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ParseOutcome::Empty;
    }
    match extract_json(trimmed) {
        Some(value) => ParseOutcome::Parsed(value),
        None => ParseOutcome::Malformed(trimmed.to_string()),
    }
}

/// Recover a JSON object or array from model text.
///
/// Tries the whole text (markdown fences removed) first, then each balanced
/// `{...}` / `[...]` substring in order of its opening bracket.
pub fn extract_json(text: &str) -> Option<Value> {
    let text = strip_code_fence(text.trim());

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        if value.is_object() || value.is_array() {
            return Some(value);
        }
    }

    text.char_indices()
        .filter(|(_, c)| *c == '{' || *c == '[')
        .take(MAX_JSON_CANDIDATES)
        .filter_map(|(start, _)| balanced_end(text, start).map(|end| &text[start..end]))
        .find_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
}

/// Body of a ```-fenced block, or the text unchanged.
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json") on the opening line
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.rfind("```").map(|end| &body[..end]).unwrap_or(body).trim()
}

/// Byte index just past the bracket closing the one at `start`.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(start + offset + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Analyses from `{"cluster_analysis": [...]}`, a bare array, or a lone
/// analysis object (what survives of a reply cut off mid-list).
///
/// Unreadable entries are skipped. `None` when the value has no recognisable
/// analysis at all.
fn analyses_from_value(value: Value) -> Option<Vec<IdeaAnalysis>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("cluster_analysis") {
            Some(Value::Array(items)) => items,
            Some(_) => return None,
            None if map.contains_key("cluster_id") => vec![Value::Object(map)],
            None => return None,
        },
        _ => return None,
    };

    let submitted = items.len();
    let analyses: Vec<IdeaAnalysis> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<IdeaAnalysis>(item) {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                debug!(error = %e, "skipping unreadable analysis entry");
                None
            }
        })
        .collect();

    if submitted > 0 && analyses.is_empty() {
        return None;
    }
    Some(analyses)
}
