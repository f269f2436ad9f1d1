//! HDBSCAN: Hierarchical Density-Based Spatial Clustering of Applications with Noise.
//!
//! Partitions preprocessed embedding vectors into clusters plus a noise set.
//!
//! # Algorithm Outline
//!
//! 1. **Core distance**: distance to the `min_samples`-th nearest neighbour
//!    (the point itself excluded). Estimates local density.
//!
//! 2. **Mutual reachability distance**:
//!    `mrd(i, j) = max(core[i], core[j], dist(i, j))`.
//!
//! 3. **MST** over mutual reachability with Prim's algorithm (O(n^2)), edges
//!    sorted ascending, folded into a single-linkage tree.
//!
//! 4. **Condensed tree**: walk the single-linkage tree from the root. A split
//!    where both sides have at least `min_cluster_size` points creates two
//!    child clusters; otherwise the small side's points "fall out" of the
//!    current cluster at `lambda = 1 / distance`.
//!
//! 5. **Excess-of-mass selection**: stability(c) = sum over fallouts of
//!    `(lambda_p - lambda_birth(c)) * size`. Bottom-up, a cluster is kept when
//!    its stability beats the summed stability of its selected descendants.
//!
//! 6. **Labeling**: points under a selected cluster take its label, everything
//!    else is noise. When the root itself is selected (single-cluster mode)
//!    only points that persist until its last split keep the label.
//!
//! Everything is deterministic: Prim ties resolve by index and sorts are stable.
//!
//! # References
//!
//! Campello, R. J. G. B., Moulavi, D., Sander, J. (2013). "Density-Based Clustering
//! Based on Hierarchical Density Estimates." PAKDD 2013.

use crate::error::ClusterError;
use crate::types::{ClusterAssignment, ClusterId};

/// Distances below this are treated as this, keeping lambdas finite.
const MIN_DISTANCE: f64 = 1e-10;

/// HDBSCAN clusterer.
#[derive(Debug, Clone)]
pub struct Hdbscan {
    min_cluster_size: usize,
    min_samples: usize,
    allow_single_cluster: bool,
}

impl Hdbscan {
    /// Defaults: `min_cluster_size = 2`, `min_samples = 1`, single-cluster mode on.
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimum points for a cluster to persist. Values below 2 behave as 2.
    pub fn with_min_cluster_size(mut self, min_cluster_size: usize) -> Self {
        self.min_cluster_size = min_cluster_size;
        self
    }

    /// Neighbour rank used for core distances.
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    /// Whether the root of the hierarchy may be selected as the only cluster.
    pub fn with_allow_single_cluster(mut self, allow: bool) -> Self {
        self.allow_single_cluster = allow;
        self
    }

    /// Cluster `data`, returning one label per row.
    pub fn fit(&self, data: &[Vec<f32>]) -> Result<ClusterAssignment, ClusterError> {
        let n = data.len();
        if n == 0 {
            return Err(ClusterError::EmptyInput);
        }
        if self.min_samples == 0 {
            return Err(ClusterError::InvalidParameter {
                name: "min_samples",
                message: "must be at least 1",
            });
        }
        if self.min_cluster_size == 0 {
            return Err(ClusterError::InvalidParameter {
                name: "min_cluster_size",
                message: "must be at least 1",
            });
        }

        let d = data[0].len();
        if d == 0 {
            return Err(ClusterError::InvalidParameter {
                name: "dimension",
                message: "must be at least 1",
            });
        }
        for (i, point) in data.iter().enumerate() {
            if point.len() != d {
                return Err(ClusterError::DimensionMismatch {
                    expected: d,
                    found: point.len(),
                });
            }
            if point.iter().any(|x| !x.is_finite()) {
                return Err(ClusterError::NonFinite { index: i });
            }
        }

        if n == 1 {
            return Ok(ClusterAssignment::new(vec![None]));
        }

        let min_cluster_size = self.min_cluster_size.max(2);
        let dists = pairwise_distances(data);
        let core = core_distances(&dists, n, self.min_samples);

        let mut mst = prim_mst(n, |i, j| mutual_reachability(dists[i * n + j], core[i], core[j]));
        mst.sort_by(|a, b| a.2.total_cmp(&b.2));

        let merges = single_linkage(&mst, n);
        let condensed = condense(&merges, n, min_cluster_size);
        let allow_root = self.allow_single_cluster && n >= min_cluster_size;

        Ok(ClusterAssignment::new(extract_labels(&condensed, n, allow_root)))
    }
}

impl Default for Hdbscan {
    fn default() -> Self {
        Self {
            min_cluster_size: 2,
            min_samples: 1,
            allow_single_cluster: true,
        }
    }
}

fn pairwise_distances(data: &[Vec<f32>]) -> Vec<f64> {
    let n = data.len();
    let mut dists = vec![0.0f64; n * n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = squared_euclidean(&data[i], &data[j]).sqrt();
            dists[i * n + j] = d;
            dists[j * n + i] = d;
        }
    }
    dists
}

#[inline]
fn squared_euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum()
}

fn core_distances(dists: &[f64], n: usize, min_samples: usize) -> Vec<f64> {
    let k = min_samples.min(n - 1).max(1);
    (0..n)
        .map(|i| {
            let mut row: Vec<f64> = (0..n)
                .filter(|&j| j != i)
                .map(|j| dists[i * n + j])
                .collect();
            row.sort_by(|a, b| a.total_cmp(b));
            row[k - 1]
        })
        .collect()
}

#[inline]
fn mutual_reachability(dist: f64, core_i: f64, core_j: f64) -> f64 {
    dist.max(core_i).max(core_j)
}

/// Prim's MST over a dense complete graph; returns edges `(u, v, weight)`.
fn prim_mst(n: usize, weight: impl Fn(usize, usize) -> f64) -> Vec<(usize, usize, f64)> {
    if n <= 1 {
        return Vec::new();
    }

    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut parent = vec![usize::MAX; n];
    best[0] = 0.0;

    for _ in 0..n {
        let mut u = usize::MAX;
        let mut best_val = f64::INFINITY;
        for i in 0..n {
            if !in_tree[i] && (u == usize::MAX || best[i] < best_val) {
                best_val = best[i];
                u = i;
            }
        }
        if u == usize::MAX {
            break;
        }
        in_tree[u] = true;

        for v in 0..n {
            if in_tree[v] {
                continue;
            }
            let w = weight(u, v);
            if w < best[v] {
                best[v] = w;
                parent[v] = u;
            }
        }
    }

    (1..n)
        .filter(|&v| parent[v] != usize::MAX)
        .map(|v| (parent[v], v, best[v]))
        .collect()
}

// ---------------------------------------------------------------------------
// Single-linkage tree
// ---------------------------------------------------------------------------

/// Node `n + i` of the single-linkage tree; leaves are point indices `0..n`.
#[derive(Debug, Clone)]
struct Merge {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

struct LinkageUnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl LinkageUnionFind {
    fn new(n: usize) -> Self {
        let total = 2 * n - 1;
        Self {
            parent: (0..total).collect(),
            size: (0..total).map(|i| if i < n { 1 } else { 0 }).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn link(&mut self, a: usize, b: usize, node: usize) {
        self.parent[a] = node;
        self.parent[b] = node;
        self.size[node] = self.size[a] + self.size[b];
    }
}

/// Fold ascending MST edges into merge nodes `n..2n-1`.
fn single_linkage(mst: &[(usize, usize, f64)], n: usize) -> Vec<Merge> {
    let mut uf = LinkageUnionFind::new(n);
    let mut merges = Vec::with_capacity(n.saturating_sub(1));

    for (i, &(a, b, distance)) in mst.iter().enumerate() {
        let ra = uf.find(a);
        let rb = uf.find(b);
        let node = n + i;
        merges.push(Merge {
            left: ra,
            right: rb,
            distance,
            size: uf.size[ra] + uf.size[rb],
        });
        uf.link(ra, rb, node);
    }
    merges
}

/// Nodes of the subtree under `start`, level by level.
fn subtree(merges: &[Merge], n: usize, start: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut frontier = vec![start];
    while !frontier.is_empty() {
        out.extend_from_slice(&frontier);
        frontier = frontier
            .iter()
            .filter(|&&node| node >= n)
            .flat_map(|&node| {
                let m = &merges[node - n];
                [m.left, m.right]
            })
            .collect();
    }
    out
}

// ---------------------------------------------------------------------------
// Condensed cluster tree
// ---------------------------------------------------------------------------

/// One row of the condensed tree.
///
/// `child < n` is a point falling out of `parent`; otherwise `child` is a
/// cluster id (ids start at `n`, the root is `n`).
#[derive(Debug, Clone)]
struct CondensedEdge {
    parent: usize,
    child: usize,
    lambda: f64,
    child_size: usize,
}

#[inline]
fn lambda_of(distance: f64) -> f64 {
    1.0 / distance.max(MIN_DISTANCE)
}

fn condense(merges: &[Merge], n: usize, min_cluster_size: usize) -> Vec<CondensedEdge> {
    let root = 2 * n - 2;
    let size_of = |node: usize| if node < n { 1 } else { merges[node - n].size };

    let mut relabel = vec![0usize; 2 * n - 1];
    relabel[root] = n;
    let mut next_label = n + 1;
    let mut ignore = vec![false; 2 * n - 1];
    let mut condensed = Vec::new();

    for node in subtree(merges, n, root) {
        if node < n || ignore[node] {
            continue;
        }

        let merge = &merges[node - n];
        let lambda = lambda_of(merge.distance);
        let parent = relabel[node];
        let (left, right) = (merge.left, merge.right);
        let (left_size, right_size) = (size_of(left), size_of(right));
        let left_big = left_size >= min_cluster_size;
        let right_big = right_size >= min_cluster_size;

        if left_big && right_big {
            // Genuine split into two child clusters.
            for (child, child_size) in [(left, left_size), (right, right_size)] {
                relabel[child] = next_label;
                next_label += 1;
                condensed.push(CondensedEdge {
                    parent,
                    child: relabel[child],
                    lambda,
                    child_size,
                });
            }
        } else {
            // The big side (if any) carries on as the same cluster.
            let mut falling = Vec::with_capacity(2);
            match (left_big, right_big) {
                (true, false) => {
                    relabel[left] = parent;
                    falling.push(right);
                }
                (false, true) => {
                    relabel[right] = parent;
                    falling.push(left);
                }
                _ => falling.extend([left, right]),
            }

            for side in falling {
                for sub in subtree(merges, n, side) {
                    if sub < n {
                        condensed.push(CondensedEdge {
                            parent,
                            child: sub,
                            lambda,
                            child_size: 1,
                        });
                    }
                    ignore[sub] = true;
                }
            }
        }
    }

    condensed
}

// ---------------------------------------------------------------------------
// Excess-of-mass selection and labeling
// ---------------------------------------------------------------------------

fn extract_labels(condensed: &[CondensedEdge], n: usize, allow_root: bool) -> Vec<Option<ClusterId>> {
    let num_clusters = condensed
        .iter()
        .map(|e| e.parent.max(e.child))
        .max()
        .map(|max_id| max_id.saturating_sub(n) + 1)
        .unwrap_or(1);
    let root = 0usize;

    let mut birth = vec![0.0f64; num_clusters];
    let mut parent_of: Vec<Option<usize>> = vec![None; num_clusters];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); num_clusters];
    let mut point_parent = vec![root; n];
    let mut point_lambda = vec![0.0f64; n];

    for e in condensed {
        let p = e.parent - n;
        if e.child >= n {
            let c = e.child - n;
            birth[c] = e.lambda;
            parent_of[c] = Some(p);
            children[p].push(c);
        } else {
            point_parent[e.child] = p;
            point_lambda[e.child] = e.lambda;
        }
    }

    let mut stability = vec![0.0f64; num_clusters];
    for e in condensed {
        let p = e.parent - n;
        stability[p] += (e.lambda - birth[p]) * e.child_size as f64;
    }

    // Children always carry larger ids than their parent, so descending id
    // order is bottom-up.
    let lowest = if allow_root { 0 } else { 1 };
    let mut selected = vec![false; num_clusters];
    for c in lowest..num_clusters {
        selected[c] = true;
    }

    let mut subtree_stability = stability.clone();
    for c in (lowest..num_clusters).rev() {
        let child_sum: f64 = children[c].iter().map(|&ch| subtree_stability[ch]).sum();
        if child_sum > subtree_stability[c] {
            selected[c] = false;
            subtree_stability[c] = child_sum;
        } else {
            deselect_descendants(&children, c, &mut selected);
        }
    }

    let mut label_of = vec![None; num_clusters];
    let mut next = 0u32;
    for (c, &sel) in selected.iter().enumerate() {
        if sel {
            label_of[c] = Some(ClusterId(next));
            next += 1;
        }
    }

    let root_max_lambda = condensed
        .iter()
        .filter(|e| e.parent == n)
        .map(|e| e.lambda)
        .fold(0.0f64, f64::max);

    (0..n)
        .map(|p| {
            let mut c = point_parent[p];
            while !selected[c] {
                match parent_of[c] {
                    Some(up) => c = up,
                    None => return None,
                }
            }
            if c == root && point_lambda[p] < root_max_lambda {
                return None;
            }
            label_of[c]
        })
        .collect()
}

fn deselect_descendants(children: &[Vec<usize>], node: usize, selected: &mut [bool]) {
    for &child in &children[node] {
        selected[child] = false;
        deselect_descendants(children, child, selected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::{HashMap, HashSet};

    fn make_cluster(center: &[f32], n: usize, spread: f32) -> Vec<Vec<f32>> {
        let dim = center.len();
        let mut points = Vec::with_capacity(n);
        for i in 0..n {
            let mut p = Vec::with_capacity(dim);
            for (d, &c) in center.iter().enumerate() {
                let offset = spread * ((i * 7 + d * 13) % 11) as f32 / 11.0 - spread / 2.0;
                p.push(c + offset);
            }
            points.push(p);
        }
        points
    }

    fn non_noise(labels: &ClusterAssignment) -> HashSet<ClusterId> {
        labels.iter().flatten().collect()
    }

    #[test]
    fn test_two_well_separated_clusters() {
        let mut data = make_cluster(&[0.0, 0.0], 20, 0.5);
        data.extend(make_cluster(&[20.0, 20.0], 20, 0.5));

        let labels = Hdbscan::new()
            .with_min_samples(3)
            .with_min_cluster_size(10)
            .fit(&data)
            .unwrap();

        assert_eq!(labels.len(), 40);
        let l0 = labels.get(0).expect("first group should be clustered");
        let l20 = labels.get(20).expect("second group should be clustered");
        for i in 1..20 {
            assert_eq!(labels.get(i), Some(l0));
        }
        for i in 21..40 {
            assert_eq!(labels.get(i), Some(l20));
        }
        assert_ne!(l0, l20);
    }

    #[test]
    fn test_labels_are_dense_from_zero() {
        let mut data = make_cluster(&[0.0, 0.0], 10, 0.3);
        data.extend(make_cluster(&[15.0, 0.0], 10, 0.3));
        data.extend(make_cluster(&[0.0, 15.0], 10, 0.3));

        let labels = Hdbscan::new().with_min_cluster_size(5).fit(&data).unwrap();
        let ids: HashSet<u32> = non_noise(&labels).into_iter().map(|c| c.0).collect();
        assert_eq!(ids, (0..ids.len() as u32).collect());
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_single_dense_group_with_stragglers() {
        // Two near-identical points plus two unrelated ones.
        let data = vec![
            vec![1.0, 0.05, 0.0, 0.0],
            vec![1.0, 0.0, 0.05, 0.0],
            vec![0.0, 1.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0, 1.0],
        ];

        let labels = Hdbscan::new().fit(&data).unwrap();
        assert_eq!(labels.get(0), Some(ClusterId(0)));
        assert_eq!(labels.get(1), Some(ClusterId(0)));
        assert_eq!(labels.outliers(), vec![2, 3]);
    }

    #[test]
    fn test_single_group_is_noise_without_single_cluster_mode() {
        let data = vec![
            vec![1.0, 0.05, 0.0, 0.0],
            vec![1.0, 0.0, 0.05, 0.0],
            vec![0.0, 1.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0, 1.0],
        ];

        let labels = Hdbscan::new()
            .with_allow_single_cluster(false)
            .fit(&data)
            .unwrap();
        assert_eq!(labels.outliers(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_noise_points_between_clusters() {
        let mut data = make_cluster(&[0.0, 0.0], 15, 0.3);
        data.extend(make_cluster(&[20.0, 20.0], 15, 0.3));
        data.push(vec![10.0, 10.0]);
        data.push(vec![8.0, 12.0]);
        data.push(vec![12.0, 8.0]);

        let labels = Hdbscan::new()
            .with_min_samples(3)
            .with_min_cluster_size(5)
            .fit(&data)
            .unwrap();

        assert!(non_noise(&labels).len() >= 2, "should find at least 2 clusters");
        // The off-diagonal bridge points join only after both groups have met.
        assert_eq!(labels.get(31), None);
        assert_eq!(labels.get(32), None);
    }

    #[test]
    fn test_too_few_points_for_min_cluster_size_is_all_noise() {
        let data = vec![vec![0.0, 0.0], vec![10.0, 10.0], vec![20.0, 20.0]];

        let labels = Hdbscan::new()
            .with_min_samples(2)
            .with_min_cluster_size(100)
            .fit(&data)
            .unwrap();

        assert_eq!(labels.outliers(), vec![0, 1, 2]);
    }

    #[test]
    fn test_min_cluster_size_one_behaves_as_two() {
        let data = make_cluster(&[0.0, 0.0], 6, 0.5);
        let a = Hdbscan::new().with_min_cluster_size(1).fit(&data).unwrap();
        let b = Hdbscan::new().with_min_cluster_size(2).fit(&data).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_large_min_samples_relative_to_data() {
        let data = make_cluster(&[0.0, 0.0], 10, 0.5);
        let labels = Hdbscan::new()
            .with_min_samples(100)
            .with_min_cluster_size(3)
            .fit(&data)
            .unwrap();
        assert_eq!(labels.len(), 10);
    }

    #[test]
    fn test_non_noise_labels_meet_min_cluster_size() {
        let mut data = make_cluster(&[0.0, 0.0], 25, 0.5);
        data.extend(make_cluster(&[30.0, 30.0], 25, 0.5));
        data.push(vec![15.0, 15.0]);

        let min_cluster_size = 5;
        let labels = Hdbscan::new()
            .with_min_samples(3)
            .with_min_cluster_size(min_cluster_size)
            .fit(&data)
            .unwrap();

        let mut counts: HashMap<ClusterId, usize> = HashMap::new();
        for l in labels.iter().flatten() {
            *counts.entry(l).or_insert(0) += 1;
        }
        for (label, count) in counts {
            assert!(
                count >= min_cluster_size,
                "label {label} has {count} points, expected at least {min_cluster_size}"
            );
        }
    }

    #[test]
    fn test_identical_points_do_not_break_stability() {
        let mut data = vec![vec![1.0, 1.0]; 4];
        data.extend(vec![vec![-5.0, 3.0]; 4]);
        let labels = Hdbscan::new().fit(&data).unwrap();
        assert_eq!(labels.len(), 8);
        assert_eq!(labels.get(0), labels.get(3));
        assert_eq!(labels.get(4), labels.get(7));
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let mut data = make_cluster(&[0.0, 0.0, 1.0], 12, 0.4);
        data.extend(make_cluster(&[3.0, 3.0, 0.0], 9, 0.4));
        let h = Hdbscan::new().with_min_cluster_size(3);
        assert_eq!(h.fit(&data).unwrap(), h.fit(&data).unwrap());
    }

    #[test]
    fn test_two_points() {
        let data = vec![vec![0.0, 0.0], vec![1.0, 0.0]];
        let labels = Hdbscan::new().fit(&data).unwrap();
        assert_eq!(labels.outliers(), Vec::<usize>::new());
        let labels = Hdbscan::new()
            .with_allow_single_cluster(false)
            .fit(&data)
            .unwrap();
        assert_eq!(labels.outliers(), vec![0, 1]);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(Hdbscan::new().fit(&[]), Err(ClusterError::EmptyInput)));
        assert!(Hdbscan::new().with_min_samples(0).fit(&[vec![0.0]]).is_err());
        assert!(Hdbscan::new().with_min_cluster_size(0).fit(&[vec![0.0]]).is_err());
        assert!(matches!(
            Hdbscan::new().fit(&[vec![0.0, 0.0], vec![1.0]]),
            Err(ClusterError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            Hdbscan::new().fit(&[vec![0.0], vec![f32::INFINITY]]),
            Err(ClusterError::NonFinite { index: 1 })
        ));
    }

    proptest! {
        #[test]
        fn test_prop_labels_cover_input_and_stay_dense(
            data in prop::collection::vec(prop::collection::vec(-10.0f32..10.0, 3), 1..30),
            min_cluster_size in 1usize..8,
            min_samples in 1usize..6,
        ) {
            let h = Hdbscan::new()
                .with_min_cluster_size(min_cluster_size)
                .with_min_samples(min_samples);
            let labels = h.fit(&data).unwrap();

            prop_assert_eq!(labels.len(), data.len());
            let ids: HashSet<u32> = non_noise(&labels).into_iter().map(|c| c.0).collect();
            prop_assert_eq!(ids.clone(), (0..ids.len() as u32).collect::<HashSet<u32>>());
            prop_assert_eq!(labels, h.fit(&data).unwrap());
        }
    }
}
