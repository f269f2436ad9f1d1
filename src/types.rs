//! Shared data model: request, cluster entities, and the wire response.
//!
//! Inside the crate cluster ids are always [`ClusterId`] and noise is `None`.
//! The `-1` noise sentinel only exists in [`ClusterResponse`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Wire value for points that belong to no cluster.
pub const NOISE: i64 = -1;

/// Default request size cap; clustering memory grows with the square of it.
pub const DEFAULT_MAX_TEXTS: usize = 2000;

/// Canonical cluster identifier used end-to-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub u32);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incoming clustering request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRequest {
    pub texts: Vec<String>,
    pub query: String,
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

fn default_min_cluster_size() -> usize {
    2
}

fn default_min_samples() -> usize {
    1
}

impl ClusterRequest {
    pub fn new(texts: Vec<String>, query: impl Into<String>) -> Self {
        Self {
            texts,
            query: query.into(),
            min_cluster_size: default_min_cluster_size(),
            min_samples: default_min_samples(),
        }
    }

    /// Reject requests before any computation happens.
    pub fn validate(&self, max_texts: usize) -> Result<(), PipelineError> {
        if self.texts.len() < 2 {
            return Err(PipelineError::Validation(
                "at least 2 text items are required for clustering".into(),
            ));
        }
        if self.texts.len() > max_texts {
            return Err(PipelineError::Validation(format!(
                "too many text items: {} (limit {})",
                self.texts.len(),
                max_texts
            )));
        }
        if self.query.trim().is_empty() {
            return Err(PipelineError::Validation("query is required".into()));
        }
        if let Some(i) = self.texts.iter().position(|t| t.trim().is_empty()) {
            return Err(PipelineError::Validation(format!(
                "texts must not be empty (item {} is blank)",
                i
            )));
        }
        if self.min_cluster_size == 0 {
            return Err(PipelineError::Validation(
                "min_cluster_size must be at least 1".into(),
            ));
        }
        if self.min_samples == 0 {
            return Err(PipelineError::Validation(
                "min_samples must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// One label per input item: `Some(cluster)` or `None` for noise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAssignment {
    labels: Vec<Option<ClusterId>>,
}

impl ClusterAssignment {
    pub fn new(labels: Vec<Option<ClusterId>>) -> Self {
        Self { labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<ClusterId> {
        self.labels.get(index).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<ClusterId>> + '_ {
        self.labels.iter().copied()
    }

    /// Indices labeled as noise, ascending.
    pub fn outliers(&self) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    /// Wire form with `-1` for noise.
    pub fn to_wire(&self) -> Vec<i64> {
        self.labels
            .iter()
            .map(|l| l.map(|c| c.0 as i64).unwrap_or(NOISE))
            .collect()
    }
}

/// Members of one non-noise cluster, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterGroup {
    pub id: ClusterId,
    pub members: Vec<usize>,
}

impl ClusterGroup {
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// Human-readable description of a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterLabel {
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub examples: Vec<String>,
}

/// A detected content deficiency.
#[derive(Debug, Clone, PartialEq)]
pub enum GapFinding {
    NoStructure,
    TooManyOutliers { outliers: usize, total: usize },
    WeakCluster { id: ClusterId, size: usize },
}

impl fmt::Display for GapFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GapFinding::NoStructure => {
                write!(f, "Content too diverse: no cluster structure found")
            }
            GapFinding::TooManyOutliers { outliers, total } => write!(
                f,
                "Too many outliers ({} of {} items): query likely too broad",
                outliers, total
            ),
            GapFinding::WeakCluster { id, size } => {
                write!(f, "Cluster {} weak, only {} items", id, size)
            }
        }
    }
}

/// One proposed piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawIdea")]
pub struct Idea {
    pub title: String,
    pub hook_or_description: String,
    pub format: String,
    pub novelty_or_reason: String,
}

/// Idea as models actually write it: field names drift between replies and
/// several of them may appear at once.
#[derive(Deserialize)]
struct RawIdea {
    #[serde(default)]
    title: Option<serde_json::Value>,
    #[serde(default)]
    hook_or_description: Option<serde_json::Value>,
    #[serde(default)]
    hook: Option<serde_json::Value>,
    #[serde(default)]
    description: Option<serde_json::Value>,
    #[serde(default)]
    format: Option<serde_json::Value>,
    #[serde(default)]
    novelty_or_reason: Option<serde_json::Value>,
    #[serde(default)]
    novelty: Option<serde_json::Value>,
    #[serde(default, rename = "noveltyScore")]
    novelty_score: Option<serde_json::Value>,
    #[serde(default)]
    reason: Option<serde_json::Value>,
}

impl From<RawIdea> for Idea {
    fn from(raw: RawIdea) -> Self {
        Idea {
            title: first_text([raw.title]),
            hook_or_description: first_text([raw.hook_or_description, raw.hook, raw.description]),
            format: first_text([raw.format]),
            novelty_or_reason: first_text([
                raw.novelty_or_reason,
                raw.novelty,
                raw.novelty_score,
                raw.reason,
            ]),
        }
    }
}

/// First non-null candidate as text; numbers (`"noveltyScore": 8`) are rendered.
fn first_text<const N: usize>(candidates: [Option<serde_json::Value>; N]) -> String {
    candidates
        .into_iter()
        .flatten()
        .find_map(|value| match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
        .unwrap_or_default()
}

/// Model-produced analysis for one submitted cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdeaAnalysis {
    #[serde(deserialize_with = "lenient_cluster_id")]
    pub cluster_id: ClusterId,
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub ideas: Vec<Idea>,
}

/// Accepts `0` as well as `"0"`.
fn lenient_cluster_id<'de, D>(deserializer: D) -> Result<ClusterId, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(ClusterId)
            .ok_or_else(|| D::Error::custom(format!("invalid cluster id {}", n))),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<u32>()
            .map(ClusterId)
            .map_err(|_| D::Error::custom(format!("invalid cluster id {:?}", s))),
        other => Err(D::Error::custom(format!("invalid cluster id {}", other))),
    }
}

/// How the idea-generation stage ended.
#[derive(Debug, Clone, PartialEq)]
pub enum IdeaOutcome {
    /// Model output parsed; analyses may still be empty.
    Parsed {
        analyses: Vec<IdeaAnalysis>,
        raw_text: String,
    },
    /// Model answered but no JSON could be recovered.
    Malformed { raw_text: String },
    /// Model answered with nothing.
    Empty,
    /// Model call itself failed; the request still succeeds.
    Unavailable { reason: String },
    /// No clusters, so nothing was sent.
    Skipped,
}

/// Everything one request produced.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub assignment: ClusterAssignment,
    pub groups: Vec<ClusterGroup>,
    pub labels: BTreeMap<ClusterId, ClusterLabel>,
    pub gaps: Vec<GapFinding>,
    pub ideas: IdeaOutcome,
}

/// Serialized response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterResponse {
    pub labels: Vec<i64>,
    pub outliers: Vec<usize>,
    pub clusters: BTreeMap<ClusterId, usize>,
    pub cluster_texts: BTreeMap<ClusterId, Vec<usize>>,
    pub unified_labels: BTreeMap<ClusterId, ClusterLabel>,
    pub gaps: Vec<String>,
    pub idea_analysis: Option<Vec<IdeaAnalysis>>,
    pub raw_model_text: String,
    pub idea_error: Option<String>,
}

impl From<PipelineResult> for ClusterResponse {
    fn from(result: PipelineResult) -> Self {
        let (idea_analysis, raw_model_text, idea_error) = match result.ideas {
            IdeaOutcome::Parsed { analyses, raw_text } => (Some(analyses), raw_text, None),
            IdeaOutcome::Malformed { raw_text } => (
                Some(Vec::new()),
                raw_text,
                Some("model output malformed, returning raw text".to_string()),
            ),
            IdeaOutcome::Empty => (
                Some(Vec::new()),
                String::new(),
                Some("model returned empty response".to_string()),
            ),
            IdeaOutcome::Unavailable { reason } => {
                (None, String::new(), Some(format!("model unavailable: {}", reason)))
            }
            IdeaOutcome::Skipped => (Some(Vec::new()), String::new(), None),
        };

        ClusterResponse {
            labels: result.assignment.to_wire(),
            outliers: result.assignment.outliers(),
            clusters: result.groups.iter().map(|g| (g.id, g.size())).collect(),
            cluster_texts: result
                .groups
                .into_iter()
                .map(|g| (g.id, g.members))
                .collect(),
            unified_labels: result.labels,
            gaps: result.gaps.iter().map(|g| g.to_string()).collect(),
            idea_analysis,
            raw_model_text,
            idea_error,
        }
    }
}
