//! Gap heuristics over cluster sizes and the outlier ratio.

use crate::types::{ClusterGroup, GapFinding};

/// Outlier share above which the query is considered too broad.
pub const OUTLIER_RATIO_THRESHOLD: f64 = 0.4;

/// Clusters smaller than this are flagged as weak, whatever `min_cluster_size` was.
pub const WEAK_CLUSTER_SIZE: usize = 3;

/// Run every heuristic in order; findings are not exclusive.
pub fn analyze(groups: &[ClusterGroup], outlier_count: usize, total: usize) -> Vec<GapFinding> {
    let mut findings = Vec::new();

    if groups.is_empty() {
        findings.push(GapFinding::NoStructure);
    }

    if total > 0 && outlier_count as f64 / total as f64 > OUTLIER_RATIO_THRESHOLD {
        findings.push(GapFinding::TooManyOutliers {
            outliers: outlier_count,
            total,
        });
    }

    for g in groups {
        if g.size() < WEAK_CLUSTER_SIZE {
            findings.push(GapFinding::WeakCluster {
                id: g.id,
                size: g.size(),
            });
        }
    }

    findings
}
