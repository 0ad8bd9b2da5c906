//! Hybrid search: vector similarity and keyword matching fused by
//! Reciprocal Rank Fusion.
//!
//! The algorithm operates entirely through the [`Store`] trait. The caller
//! embeds the question and derives terms and policy from the query
//! analysis.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Fetch semantic candidates: `2 × count` when fusion is enabled,
//!    `count` otherwise, applying the similarity floor.
//! 2. If fusion is disabled, return the semantic list truncated to `count`.
//! 3. Fetch `2 × count` keyword candidates for primary plus expanded terms.
//! 4. RRF: each list adds `1 / (k + rank + 1)` to a unit's score; the
//!    keyword contribution is multiplied by `keyword_boost`.
//! 5. Sort descending (ties by id), divide by the top score, truncate to
//!    `count`.

use anyhow::Result;
use std::collections::HashMap;

use crate::models::RankedResult;
use crate::store::{SearchFilters, Store};

/// Fusion tuning, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    /// When false only the semantic pass runs.
    pub use_hybrid: bool,
    pub rrf_k: f64,
    /// Multiplier on the keyword list's RRF contribution.
    pub keyword_boost: f64,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            use_hybrid: true,
            rrf_k: 60.0,
            keyword_boost: 1.1,
        }
    }
}

/// Bundles all inputs for one hybrid search.
#[derive(Debug, Clone)]
pub struct HybridRequest<'a> {
    pub query_vec: &'a [f32],
    /// Keyword terms (primary followed by expanded).
    pub terms: &'a [String],
    pub count: usize,
    pub filters: &'a SearchFilters,
    pub similarity_floor: f32,
    pub params: FusionParams,
}

/// Run a hybrid search against a [`Store`] backend.
pub async fn hybrid_search(store: &dyn Store, req: &HybridRequest<'_>) -> Result<Vec<RankedResult>> {
    if req.count == 0 {
        return Ok(Vec::new());
    }
    let semantic_k = if req.params.use_hybrid {
        req.count * 2
    } else {
        req.count
    };
    let mut semantic = store
        .search(req.query_vec, semantic_k, req.filters, req.similarity_floor)
        .await?;

    if !req.params.use_hybrid {
        semantic.truncate(req.count);
        tracing::debug!(semantic = semantic.len(), "semantic-only search");
        return Ok(semantic);
    }

    let keyword = store
        .keyword_search(req.terms, req.count * 2, req.filters)
        .await?;
    tracing::debug!(
        semantic = semantic.len(),
        keyword = keyword.len(),
        "hybrid search candidates"
    );

    Ok(rrf_fuse(&semantic, &keyword, &req.params, req.count))
}

/// Raw (unnormalized) RRF scores, sorted descending with ties by id.
pub fn rrf_scores(
    semantic: &[RankedResult],
    keyword: &[RankedResult],
    params: &FusionParams,
) -> Vec<RankedResult> {
    let mut fused: HashMap<&str, RankedResult> = HashMap::new();
    let lists = [(semantic, 1.0), (keyword, params.keyword_boost)];
    for (list, weight) in lists {
        for (rank, r) in list.iter().enumerate() {
            let contribution = weight / (params.rrf_k + rank as f64 + 1.0);
            fused
                .entry(r.unit.id.as_str())
                .or_insert_with(|| RankedResult {
                    unit: r.unit.clone(),
                    score: 0.0,
                })
                .score += contribution;
        }
    }

    let mut results: Vec<RankedResult> = fused.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.unit.id.cmp(&b.unit.id))
    });
    results
}

/// Fuse, normalize by the top score, and truncate to `limit`.
pub fn rrf_fuse(
    semantic: &[RankedResult],
    keyword: &[RankedResult],
    params: &FusionParams,
    limit: usize,
) -> Vec<RankedResult> {
    let mut results = rrf_scores(semantic, keyword, params);
    if let Some(top) = results.first().map(|r| r.score) {
        if top > 0.0 {
            for r in &mut results {
                r.score /= top;
            }
        }
    }
    results.truncate(limit);
    results
}
