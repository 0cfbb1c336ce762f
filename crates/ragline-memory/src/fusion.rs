//! Merging ranked candidate lists from several prefetch branches.

use std::cmp::Ordering;
use std::collections::HashMap;

use ragline_core::{FusionMethod, SearchResult};

/// RRF constant. Higher values smooth out rank differences.
pub const RRF_K: f32 = 60.0;

/// Fuses `branches` with `method` and keeps the best `limit` results.
///
/// Every branch must be ordered best-first with higher scores better.
pub fn fuse(branches: &[Vec<SearchResult>], method: FusionMethod, limit: usize) -> Vec<SearchResult> {
    match method {
        FusionMethod::Rrf => reciprocal_rank_fusion(branches, limit),
        FusionMethod::Dbsf => distribution_based_fusion(branches, limit),
    }
}

/// Reciprocal Rank Fusion: `score = Σ 1 / (k + rank)` with 1-based ranks.
pub fn reciprocal_rank_fusion(branches: &[Vec<SearchResult>], limit: usize) -> Vec<SearchResult> {
    accumulate(branches, limit, |_, rank| 1.0 / (RRF_K + (rank + 1) as f32))
}

/// Distribution-Based Score Fusion.
///
/// Each branch's scores are normalized to `[0, 1]` between `mean - 3σ` and
/// `mean + 3σ` (clamped) and the normalized scores are summed per point.
pub fn distribution_based_fusion(branches: &[Vec<SearchResult>], limit: usize) -> Vec<SearchResult> {
    let bounds: Vec<(f32, f32)> = branches.iter().map(|b| three_sigma_bounds(b)).collect();
    accumulate(branches, limit, |branch, rank| {
        let (lower, upper) = bounds[branch];
        let score = branches[branch][rank].score;
        if upper > lower {
            ((score - lower) / (upper - lower)).clamp(0.0, 1.0)
        } else {
            0.5
        }
    })
}

fn three_sigma_bounds(branch: &[SearchResult]) -> (f32, f32) {
    if branch.is_empty() {
        return (0.0, 0.0);
    }
    let n = branch.len() as f32;
    let mean = branch.iter().map(|r| r.score).sum::<f32>() / n;
    let variance = branch.iter().map(|r| (r.score - mean).powi(2)).sum::<f32>() / n;
    let sigma = variance.sqrt();
    (mean - 3.0 * sigma, mean + 3.0 * sigma)
}

fn accumulate(
    branches: &[Vec<SearchResult>],
    limit: usize,
    contribution: impl Fn(usize, usize) -> f32,
) -> Vec<SearchResult> {
    let mut order: Vec<u64> = Vec::new();
    let mut fused: HashMap<u64, SearchResult> = HashMap::new();

    for (b, branch) in branches.iter().enumerate() {
        for (rank, result) in branch.iter().enumerate() {
            let add = contribution(b, rank);
            fused
                .entry(result.id)
                .and_modify(|r| r.score += add)
                .or_insert_with(|| {
                    order.push(result.id);
                    SearchResult {
                        id: result.id,
                        score: add,
                        payload: result.payload.clone(),
                    }
                });
        }
    }

    let mut results: Vec<SearchResult> = order.iter().filter_map(|id| fused.remove(id)).collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    results.truncate(limit);
    results
}
