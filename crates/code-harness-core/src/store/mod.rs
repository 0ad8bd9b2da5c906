//! Storage abstraction for retrieval units.
//!
//! The [`Store`] trait covers everything the retriever and the indexing
//! pipeline need from a backend: idempotent upsert by unit id, vector
//! nearest-neighbour search, weighted keyword search, exact-field lookups,
//! reverse-reference lookups, and path-prefix deletion.
//!
//! Implementations must be `Send + Sync` to work with async runtimes. The
//! in-memory backend lives in [`memory`]; the SQLite backend lives in the
//! app crate.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::{RankedResult, RetrievalUnit, UnitKind};

/// Optional narrowing applied to search and listing operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub kind: Option<UnitKind>,
    pub language: Option<String>,
}

impl SearchFilters {
    pub fn kind(kind: UnitKind) -> Self {
        Self {
            kind: Some(kind),
            language: None,
        }
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn matches(&self, unit: &RetrievalUnit) -> bool {
        self.kind.is_none_or(|k| unit.kind == k)
            && self.language.as_deref().is_none_or(|l| unit.language == l)
    }
}

/// Points awarded per matching term in keyword search.
///
/// A term scores `content` when it occurs in the unit content and `name`
/// for each of the entity and member names it occurs in. The sum over all
/// terms is divided by [`KeywordWeights::max_score`], so scores land in
/// `[0, 1]`. Documentation matches make a unit a candidate without adding
/// to its score, so a documentation-only hit ranks last with score 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeywordWeights {
    pub content: f64,
    pub name: f64,
}

impl Default for KeywordWeights {
    fn default() -> Self {
        Self {
            content: 1.0,
            name: 2.0,
        }
    }
}

impl KeywordWeights {
    pub fn max_score(&self, term_count: usize) -> f64 {
        term_count as f64 * (self.content + 2.0 * self.name)
    }

    /// Whether any of the already-lowercased `terms` occurs in the unit's
    /// content, entity name, member name or documentation.
    pub fn matches(&self, unit: &RetrievalUnit, terms: &[String]) -> bool {
        let fields = [
            unit.content.to_lowercase(),
            unit.entity_name.as_deref().unwrap_or("").to_lowercase(),
            unit.member_name.as_deref().unwrap_or("").to_lowercase(),
            unit.documentation.as_deref().unwrap_or("").to_lowercase(),
        ];
        terms
            .iter()
            .any(|t| fields.iter().any(|f| f.contains(t.as_str())))
    }

    /// Normalized score of `unit` for already-lowercased `terms`.
    pub fn score(&self, unit: &RetrievalUnit, terms: &[String]) -> f64 {
        let max = self.max_score(terms.len());
        if max <= 0.0 {
            return 0.0;
        }
        let content = unit.content.to_lowercase();
        let entity = unit.entity_name.as_deref().unwrap_or("").to_lowercase();
        let member = unit.member_name.as_deref().unwrap_or("").to_lowercase();
        let raw: f64 = terms
            .iter()
            .map(|t| {
                let mut points = 0.0;
                if content.contains(t.as_str()) {
                    points += self.content;
                }
                if entity.contains(t.as_str()) {
                    points += self.name;
                }
                if member.contains(t.as_str()) {
                    points += self.name;
                }
                points
            })
            .sum();
        raw / max
    }
}

/// Lowercase, trim and drop empty terms.
pub fn normalize_terms(terms: &[String]) -> Vec<String> {
    terms
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Aggregate counts reported by `chx stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub total_units: usize,
    pub by_language: BTreeMap<String, usize>,
    pub by_kind: BTreeMap<String, usize>,
    pub files: usize,
    pub embedded: usize,
}

/// Abstract storage backend for retrieval units.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](Store::upsert) | Insert or replace units by id, optionally with vectors |
/// | [`search`](Store::search) | Cosine nearest neighbours above a floor |
/// | [`keyword_search`](Store::keyword_search) | Weighted substring match |
/// | [`get_by_entity_name`](Store::get_by_entity_name) | Direct entity lookup |
/// | [`get_all_units_for_entity`](Store::get_all_units_for_entity) | Entity plus members, by start line |
/// | [`find_referencing`](Store::find_referencing) | Units whose references contain a name |
/// | [`list_all`](Store::list_all) | Complete filtered listing |
/// | [`delete_by_path`](Store::delete_by_path) | Remove the units of one file |
/// | [`delete_by_path_prefix`](Store::delete_by_path_prefix) | Remove units under a directory, or everything |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace units. When `vectors` is given it must be parallel
    /// to `units`; when absent, any previously stored vector for those ids
    /// is dropped. Returns the number of units written.
    async fn upsert(&self, units: &[RetrievalUnit], vectors: Option<&[Vec<f32>]>)
        -> Result<usize>;

    /// Units ordered by descending cosine similarity, excluding anything
    /// below `similarity_floor`.
    async fn search(
        &self,
        query_vec: &[f32],
        top_k: usize,
        filters: &SearchFilters,
        similarity_floor: f32,
    ) -> Result<Vec<RankedResult>>;

    /// Units where any term occurs in content, entity name, member name or
    /// documentation, ordered by [`KeywordWeights::score`].
    async fn keyword_search(
        &self,
        terms: &[String],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<RankedResult>>;

    /// The entity unit named `name`. Nested entities also match on their
    /// simple name (`Inner` finds `Outer.Inner`), exact matches first.
    async fn get_by_entity_name(&self, name: &str) -> Result<Option<RetrievalUnit>>;

    async fn get_all_units_for_entity(&self, name: &str) -> Result<Vec<RetrievalUnit>>;

    async fn find_referencing(&self, name: &str, top_k: usize) -> Result<Vec<RetrievalUnit>>;

    /// Every unit passing `filters`, ordered by language then entity name.
    async fn list_all(&self, filters: &SearchFilters) -> Result<Vec<RetrievalUnit>>;

    /// Remove units whose `file_path` equals `path` exactly.
    async fn delete_by_path(&self, path: &str) -> Result<usize>;

    async fn delete_by_path_prefix(&self, prefix: &str) -> Result<usize>;

    async fn count(&self) -> Result<usize>;

    async fn stats(&self) -> Result<StoreStats>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_unit;

    #[test]
    fn test_keyword_score_weights() {
        let mut unit = test_unit("a", UnitKind::Member, Some("PaymentService"));
        unit.member_name = Some("refundPayment".into());
        unit.content = "void refundPayment() { gateway.refund(); }".into();
        let w = KeywordWeights::default();

        // content + entity + member
        let s = w.score(&unit, &["payment".into()]);
        assert!((s - 1.0).abs() < 1e-9);
        // content + member only
        let s = w.score(&unit, &["refund".into()]);
        assert!((s - 0.6).abs() < 1e-9);
        // one of two terms matches content only
        let s = w.score(&unit, &["gateway".into(), "ledger".into()]);
        assert!((s - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_documentation_matches_without_scoring() {
        let mut unit = test_unit("a", UnitKind::Member, Some("PaymentService"));
        unit.member_name = Some("process".into());
        unit.content = "public void process(Payment p) { gateway.charge(p); }".into();
        unit.documentation = Some("Handles refunds for cancelled orders.".into());
        let w = KeywordWeights::default();

        let terms = vec!["refunds".to_string()];
        assert!(w.matches(&unit, &terms));
        assert_eq!(w.score(&unit, &terms), 0.0);
        assert!(!w.matches(&unit, &["ledger".into()]));
    }

    #[test]
    fn test_custom_weights_change_normalization() {
        let mut unit = test_unit("a", UnitKind::Entity, Some("Order"));
        unit.content = "class Order {}".into();
        let w = KeywordWeights {
            content: 1.0,
            name: 1.0,
        };
        let s = w.score(&unit, &["order".into()]);
        assert!((s - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_filters_match() {
        let unit = test_unit("a", UnitKind::Entity, Some("Order"));
        assert!(SearchFilters::default().matches(&unit));
        assert!(SearchFilters::kind(UnitKind::Entity).matches(&unit));
        assert!(!SearchFilters::kind(UnitKind::Member).matches(&unit));
        let f = SearchFilters::default().with_language(Some("kotlin".into()));
        assert!(!f.matches(&unit));
    }

    #[test]
    fn test_normalize_terms() {
        let terms = normalize_terms(&["  Order ".into(), "".into(), "REFUND".into()]);
        assert_eq!(terms, vec!["order", "refund"]);
    }
}
