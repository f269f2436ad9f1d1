//! Compact, sanitized view of the clustering result sent to the generative model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{ClusterGroup, ClusterId, ClusterLabel};

pub const MAX_PAYLOAD_KEYWORDS: usize = 6;
pub const MAX_PAYLOAD_EXAMPLES: usize = 2;
pub const MAX_OUTLIER_SAMPLES: usize = 3;

/// Bounds for the number of clusters forwarded.
pub const MIN_PAYLOAD_CLUSTERS: usize = 3;
pub const MAX_PAYLOAD_CLUSTERS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadCluster {
    pub cluster_id: ClusterId,
    pub title: String,
    pub keywords: Vec<String>,
    pub examples: Vec<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmPayload {
    pub query: String,
    pub clusters: Vec<PayloadCluster>,
    pub outliers_sample: Vec<String>,
}

/// Strip characters that tend to break strict single-line JSON output.
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '"' | '\u{201C}' | '\u{201D}'))
        .map(|c| match c {
            '\n' | '\r' => ' ',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Build the payload.
///
/// Clusters are forwarded largest first (ties by id) and capped at
/// `max_clusters`, itself clamped to 3..=5. `outlier_texts` are the raw texts of
/// noise items in input order.
pub fn build_payload(
    query: &str,
    groups: &[ClusterGroup],
    labels: &BTreeMap<ClusterId, ClusterLabel>,
    outlier_texts: &[&str],
    max_clusters: usize,
) -> LlmPayload {
    let cap = max_clusters.clamp(MIN_PAYLOAD_CLUSTERS, MAX_PAYLOAD_CLUSTERS);

    let mut ordered: Vec<&ClusterGroup> = groups.iter().collect();
    ordered.sort_by(|a, b| b.size().cmp(&a.size()).then(a.id.cmp(&b.id)));

    let clusters = ordered
        .into_iter()
        .filter_map(|g| labels.get(&g.id).map(|label| (g.id, label)))
        .take(cap)
        .map(|(id, label)| PayloadCluster {
            cluster_id: id,
            title: sanitize_text(&label.title),
            keywords: label
                .keywords
                .iter()
                .take(MAX_PAYLOAD_KEYWORDS)
                .map(|k| sanitize_text(k))
                .collect(),
            examples: label
                .examples
                .iter()
                .filter(|e| !e.is_empty())
                .take(MAX_PAYLOAD_EXAMPLES)
                .map(|e| sanitize_text(e))
                .collect(),
            description: sanitize_text(&label.description),
        })
        .collect();

    let outliers_sample = outlier_texts
        .iter()
        .map(|t| sanitize_text(t))
        .filter(|t| !t.is_empty())
        .take(MAX_OUTLIER_SAMPLES)
        .collect();

    LlmPayload {
        query: sanitize_text(query),
        clusters,
        outliers_sample,
    }
}
