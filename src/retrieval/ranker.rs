use crate::retrieval::store::VectorStore;
use std::cmp::Ordering;

/// Cosine similarity accumulated in `f64`.
///
/// Vectors of different length, empty vectors and zero-norm vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
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

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    let score = dot / denom;
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

/// The `top_k` records most similar to `query`, best first.
///
/// Ties are broken by name so the order is fully deterministic.
pub fn rank(query: &[f32], store: &VectorStore, top_k: i64) -> Vec<(String, f64)> {
    if top_k <= 0 {
        return Vec::new();
    }
    if store.is_empty() {
        tracing::warn!("Ranking against an empty vector store");
        return Vec::new();
    }

    let mut scored: Vec<(String, f64)> = store
        .records()
        .map(|record| (record.name.clone(), cosine_similarity(query, &record.vector)))
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(usize::try_from(top_k).unwrap_or(usize::MAX));
    scored
}
