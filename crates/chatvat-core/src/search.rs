//! Deterministic nearest-neighbour ranking over knowledge entries.
//!
//! Every [`KnowledgeStore`](crate::store::KnowledgeStore) backend funnels
//! its candidates through [`rank_entries`], so all backends order results
//! identically:
//!
//! 1. Distance ascending (cosine distance `1 - cos` or Euclidean).
//! 2. `last_confirmed_at` descending.
//! 3. Fingerprint ascending.
//!
//! Candidates whose dimensionality differs from the query (e.g. written by
//! a previous embedding model) are skipped.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::embedding::{cosine_similarity, l2_distance};
use crate::models::KnowledgeEntry;

/// Distance function used to compare embeddings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    L2,
}

impl DistanceMetric {
    /// Distance between two vectors; smaller is more similar.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        let d = match self {
            DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
            DistanceMetric::L2 => l2_distance(a, b),
        };
        if d.is_nan() {
            f32::INFINITY
        } else {
            d
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::Cosine => f.write_str("cosine"),
            DistanceMetric::L2 => f.write_str("l2"),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(DistanceMetric::Cosine),
            "l2" => Ok(DistanceMetric::L2),
            other => Err(format!(
                "unknown distance metric: '{}'. Use cosine or l2.",
                other
            )),
        }
    }
}

/// Total order used for search results: distance, then recency, then
/// fingerprint.
pub fn compare_ranked(a: (&KnowledgeEntry, f32), b: (&KnowledgeEntry, f32)) -> Ordering {
    a.1.total_cmp(&b.1)
        .then_with(|| b.0.last_confirmed_at.cmp(&a.0.last_confirmed_at))
        .then_with(|| a.0.fingerprint.cmp(&b.0.fingerprint))
}

/// Rank `candidates` against `query` and keep the `k` closest.
pub fn rank_entries<T: Borrow<KnowledgeEntry>>(
    candidates: Vec<T>,
    query: &[f32],
    k: usize,
    metric: DistanceMetric,
) -> Vec<(T, f32)> {
    if k == 0 || query.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(T, f32)> = candidates
        .into_iter()
        .filter(|c| c.borrow().embedding.len() == query.len())
        .map(|c| {
            let d = metric.distance(query, &c.borrow().embedding);
            (c, d)
        })
        .collect();

    scored.sort_by(|a, b| compare_ranked((a.0.borrow(), a.1), (b.0.borrow(), b.1)));
    scored.truncate(k);
    scored
}
