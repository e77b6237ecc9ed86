//! Vector math and brute-force nearest-neighbour selection.
//!
//! The portable fallback behind the native ANN path: an `O(n * d)`
//! scan with cosine similarity accumulated in f64, and a selection
//! sort for top-k (k is small). The networked engine answers KNN
//! server-side instead; both paths report similarity in `(-1, 1)`.

/// Normalize a vector to unit length in place.
///
/// Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| f64::from(*v) * f64::from(*v)).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v = (f64::from(*v) / norm) as f32;
        }
    }
}

/// Cosine similarity between two vectors.
///
/// Accumulates in f64 for numerical stability. Returns 0.0 for
/// mismatched lengths or zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Brute-force top-k by cosine similarity.
///
/// Returns `(candidate index, similarity)` pairs, best first, at most
/// `k` of them. Selection sort: k is a handful, n can be thousands.
pub fn brute_force_top_k(
    query: &[f32],
    candidates: &[Vec<f32>],
    k: usize,
) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = candidates
        .iter()
        .enumerate()
        .map(|(idx, v)| (idx, cosine_similarity(query, v)))
        .collect();

    let take = k.min(scored.len());
    for i in 0..take {
        let mut best = i;
        for j in (i + 1)..scored.len() {
            if scored[j].1 > scored[best].1 {
                best = j;
            }
        }
        scored.swap(i, best);
    }
    scored.truncate(take);
    scored
}
