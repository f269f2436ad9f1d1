//! Vector similarity helpers shared by preprocessing and labeling.

/// Cosine similarity between two vectors.
/// Returns a value between -1.0 and 1.0 (1.0 = identical direction, 0.0 = orthogonal)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = magnitude(a);
    let norm_b = magnitude(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Euclidean (L2) length of a vector.
pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = magnitude(v);
    if norm > 1e-12 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

/// Compute the centroid (average) of multiple vectors
/// Returns a normalized centroid vector
pub fn compute_centroid(vectors: &[&[f32]]) -> Option<Vec<f32>> {
    if vectors.is_empty() {
        return None;
    }

    let dim = vectors[0].len();
    if dim == 0 {
        return None;
    }

    let mut centroid = vec![0.0f32; dim];
    for v in vectors {
        if v.len() != dim {
            continue; // Skip mismatched dimensions
        }
        for (i, &val) in v.iter().enumerate() {
            centroid[i] += val;
        }
    }

    let n = vectors.len() as f32;
    for val in &mut centroid {
        *val /= n;
    }

    Some(l2_normalize(&centroid))
}

/// Order cluster members by closeness to their centroid.
///
/// `members` are item indices into `vectors`. Returns the same indices sorted by
/// cosine similarity to the centroid, most central first; equal scores keep
/// input order.
pub fn rank_by_centrality(members: &[usize], vectors: &[Vec<f32>]) -> Vec<usize> {
    let member_vectors: Vec<&[f32]> = members
        .iter()
        .filter_map(|&i| vectors.get(i).map(|v| v.as_slice()))
        .collect();

    let Some(centroid) = compute_centroid(&member_vectors) else {
        return members.to_vec();
    };

    let mut scored: Vec<(usize, f32)> = members
        .iter()
        .map(|&i| {
            let sim = vectors
                .get(i)
                .map(|v| cosine_similarity(v, &centroid))
                .unwrap_or(f32::NEG_INFINITY);
            (i, sim)
        })
        .collect();

    // Stable sort keeps index order on ties
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.into_iter().map(|(i, _)| i).collect()
}
