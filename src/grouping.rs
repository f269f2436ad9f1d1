//! Inverts a cluster assignment into per-cluster member lists.

use std::collections::BTreeMap;

use crate::types::{ClusterAssignment, ClusterGroup, ClusterId};

/// Groups ordered by cluster id, plus the noise indices.
pub fn group(assignment: &ClusterAssignment) -> (Vec<ClusterGroup>, Vec<usize>) {
    let mut members: BTreeMap<ClusterId, Vec<usize>> = BTreeMap::new();
    let mut outliers = Vec::new();

    for (index, label) in assignment.iter().enumerate() {
        match label {
            Some(id) => members.entry(id).or_default().push(index),
            None => outliers.push(index),
        }
    }

    let groups = members
        .into_iter()
        .map(|(id, members)| ClusterGroup { id, members })
        .collect();

    (groups, outliers)
}
