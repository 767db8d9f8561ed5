//! Vector similarity and nearest-neighbour ranking.

use std::cmp::Ordering;

use ndarray::ArrayView1;

/// Cosine similarity of two f32 slices.
///
/// Returns `0.0` for empty slices, mismatched lengths, or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (a, b) = (ArrayView1::from(a), ArrayView1::from(b));
    let norms = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    if norms == 0.0 {
        return 0.0;
    }
    a.dot(&b) / norms
}

/// Rank `candidates` against `query`, keeping those scoring at least
/// `threshold`, best first, at most `limit` of them.
///
/// Ties keep the input order, so results are deterministic for a given store
/// iteration order.
pub fn rank_by_similarity<'a, K, I>(
    query: &[f32],
    candidates: I,
    threshold: f32,
    limit: usize,
) -> Vec<(K, f32)>
where
    I: IntoIterator<Item = (K, &'a [f32])>,
{
    let mut scored: Vec<(K, f32)> = candidates
        .into_iter()
        .map(|(key, vector)| (key, cosine_similarity(query, vector)))
        .filter(|(_, score)| *score >= threshold)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored.truncate(limit);
    scored
}
