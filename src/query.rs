//! Query engine helpers: keyword filtering and similarity ranking

use crate::types::QueryHit;
use std::collections::HashMap;

/// Keep only candidates containing every keyword as a literal substring.
pub(crate) fn filter_by_keywords(mut candidates: Vec<String>, keywords: &[String]) -> Vec<String> {
    candidates.retain(|text| keywords.iter().all(|keyword| text.contains(keyword.as_str())));
    candidates
}

/// Squared Euclidean distance between two vectors.
pub(crate) fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Rank candidates by ascending distance from the clue embedding.
pub(crate) fn rank_by_distance(
    entries: &HashMap<String, Vec<f32>>,
    candidates: Vec<String>,
    clue: &[f32],
) -> Vec<QueryHit> {
    let mut hits: Vec<QueryHit> = candidates
        .into_iter()
        .filter_map(|text| {
            entries.get(&text).map(|vector| QueryHit {
                distance: Some(squared_distance(vector, clue)),
                text,
            })
        })
        .collect();
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits
}
