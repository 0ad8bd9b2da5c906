//! In-memory [`Store`] implementation for tests and embedded use.
//!
//! Units live in a `BTreeMap` keyed by id behind `std::sync::RwLock`.
//! Vector search is brute-force cosine similarity over all stored vectors;
//! keyword search keeps every unit [`KeywordWeights::matches`] accepts and
//! scores it with [`KeywordWeights::score`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{RankedResult, RetrievalUnit, UnitKind};

use super::{normalize_terms, KeywordWeights, SearchFilters, Store, StoreStats};

struct StoredUnit {
    unit: RetrievalUnit,
    vector: Option<Vec<f32>>,
}

/// In-memory store. Ordering of equal scores falls back to unit id so that
/// results are deterministic.
pub struct InMemoryStore {
    units: RwLock<BTreeMap<String, StoredUnit>>,
    weights: KeywordWeights,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            units: RwLock::new(BTreeMap::new()),
            weights: KeywordWeights::default(),
        }
    }

    pub fn with_keyword_weights(mut self, weights: KeywordWeights) -> Self {
        self.weights = weights;
        self
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, StoredUnit>>> {
        self.units.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, StoredUnit>>> {
        self.units.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn rank(mut results: Vec<RankedResult>, top_k: usize) -> Vec<RankedResult> {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.unit.id.cmp(&b.unit.id))
    });
    results.truncate(top_k);
    results
}

fn is_entity_named(unit: &RetrievalUnit, name: &str) -> bool {
    unit.kind == UnitKind::Entity
        && unit
            .entity_name
            .as_deref()
            .is_some_and(|e| e == name || e.ends_with(&format!(".{}", name)))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert(
        &self,
        units: &[RetrievalUnit],
        vectors: Option<&[Vec<f32>]>,
    ) -> Result<usize> {
        if let Some(vecs) = vectors {
            if vecs.len() != units.len() {
                bail!(
                    "upsert got {} units but {} vectors",
                    units.len(),
                    vecs.len()
                );
            }
        }
        let mut stored = self.write()?;
        for (i, unit) in units.iter().enumerate() {
            stored.insert(
                unit.id.clone(),
                StoredUnit {
                    unit: unit.clone(),
                    vector: vectors.map(|v| v[i].clone()),
                },
            );
        }
        Ok(units.len())
    }

    async fn search(
        &self,
        query_vec: &[f32],
        top_k: usize,
        filters: &SearchFilters,
        similarity_floor: f32,
    ) -> Result<Vec<RankedResult>> {
        let stored = self.read()?;
        let results = stored
            .values()
            .filter(|s| filters.matches(&s.unit))
            .filter_map(|s| {
                let vector = s.vector.as_ref()?;
                let sim = cosine_similarity(query_vec, vector);
                (sim >= similarity_floor).then(|| RankedResult {
                    unit: s.unit.clone(),
                    score: sim as f64,
                })
            })
            .collect();
        Ok(rank(results, top_k))
    }

    async fn keyword_search(
        &self,
        terms: &[String],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<RankedResult>> {
        let terms = normalize_terms(terms);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let stored = self.read()?;
        let results = stored
            .values()
            .filter(|s| filters.matches(&s.unit))
            .filter(|s| self.weights.matches(&s.unit, &terms))
            .map(|s| RankedResult {
                unit: s.unit.clone(),
                score: self.weights.score(&s.unit, &terms),
            })
            .collect();
        Ok(rank(results, top_k))
    }

    async fn get_by_entity_name(&self, name: &str) -> Result<Option<RetrievalUnit>> {
        let stored = self.read()?;
        let mut matches: Vec<&RetrievalUnit> = stored
            .values()
            .map(|s| &s.unit)
            .filter(|u| is_entity_named(u, name))
            .collect();
        matches.sort_by_key(|u| (u.entity_name.as_deref() != Some(name), u.file_path.clone()));
        Ok(matches.first().map(|u| (*u).clone()))
    }

    async fn get_all_units_for_entity(&self, name: &str) -> Result<Vec<RetrievalUnit>> {
        let stored = self.read()?;
        let mut units: Vec<RetrievalUnit> = stored
            .values()
            .filter(|s| s.unit.entity_name.as_deref() == Some(name))
            .map(|s| s.unit.clone())
            .collect();
        units.sort_by(|a, b| a.start_line.cmp(&b.start_line).then_with(|| a.id.cmp(&b.id)));
        Ok(units)
    }

    async fn find_referencing(&self, name: &str, top_k: usize) -> Result<Vec<RetrievalUnit>> {
        let stored = self.read()?;
        let mut units: Vec<RetrievalUnit> = stored
            .values()
            .filter(|s| s.unit.references.iter().any(|r| r == name))
            .map(|s| s.unit.clone())
            .collect();
        units.sort_by(|a, b| {
            a.file_path
                .cmp(&b.file_path)
                .then_with(|| a.start_line.cmp(&b.start_line))
        });
        units.truncate(top_k);
        Ok(units)
    }

    async fn list_all(&self, filters: &SearchFilters) -> Result<Vec<RetrievalUnit>> {
        let stored = self.read()?;
        let mut units: Vec<RetrievalUnit> = stored
            .values()
            .filter(|s| filters.matches(&s.unit))
            .map(|s| s.unit.clone())
            .collect();
        units.sort_by(|a, b| {
            a.language
                .cmp(&b.language)
                .then_with(|| a.entity_name.cmp(&b.entity_name))
                .then_with(|| a.file_path.cmp(&b.file_path))
                .then_with(|| a.start_line.cmp(&b.start_line))
        });
        Ok(units)
    }

    async fn delete_by_path(&self, path: &str) -> Result<usize> {
        let mut stored = self.write()?;
        let before = stored.len();
        stored.retain(|_, s| s.unit.file_path != path);
        Ok(before - stored.len())
    }

    async fn delete_by_path_prefix(&self, prefix: &str) -> Result<usize> {
        let mut stored = self.write()?;
        let before = stored.len();
        stored.retain(|_, s| !s.unit.file_path.starts_with(prefix));
        Ok(before - stored.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let stored = self.read()?;
        let mut stats = StoreStats {
            total_units: stored.len(),
            ..StoreStats::default()
        };
        let mut files = BTreeSet::new();
        for s in stored.values() {
            *stats.by_language.entry(s.unit.language.clone()).or_default() += 1;
            *stats.by_kind.entry(s.unit.kind.to_string()).or_default() += 1;
            files.insert(s.unit.file_path.as_str());
            if s.vector.is_some() {
                stats.embedded += 1;
            }
        }
        stats.files = files.len();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_unit;

    fn seeded_units() -> Vec<RetrievalUnit> {
        let mut order = test_unit("order", UnitKind::Entity, Some("Order"));
        order.content = "public class Order { Customer customer; }".into();
        order.references = vec!["Customer".into()];
        order.start_line = 3;

        let mut total = test_unit("order-total", UnitKind::Member, Some("Order"));
        total.member_name = Some("total".into());
        total.content = "public Money total() { return lines.sum(); }".into();
        total.file_path = order.file_path.clone();
        total.start_line = 12;

        let mut customer = test_unit("customer", UnitKind::Entity, Some("Customer"));
        customer.content = "public class Customer { String name; }".into();

        let mut inner = test_unit("ledger-entry", UnitKind::Entity, Some("Ledger.Entry"));
        inner.language = "kotlin".into();
        inner.references = vec!["Order".into()];

        vec![order, total, customer, inner]
    }

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        let vectors = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.9, 0.1, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        store
            .upsert(&seeded_units(), Some(vectors.as_slice()))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = seeded().await;
        assert_eq!(store.count().await.unwrap(), 4);
        store.upsert(&seeded_units(), None).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 4);
        assert_eq!(store.stats().await.unwrap().embedded, 0);
    }

    #[tokio::test]
    async fn test_upsert_rejects_mismatched_vectors() {
        let store = InMemoryStore::new();
        let err = store
            .upsert(&seeded_units(), Some(&[vec![1.0]][..]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("4 units but 1 vectors"));
    }

    #[tokio::test]
    async fn test_search_orders_and_applies_floor() {
        let store = seeded().await;
        let results = store
            .search(&[1.0, 0.0, 0.0], 10, &SearchFilters::default(), 0.5)
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.unit.id.as_str()).collect();
        assert_eq!(ids, vec!["order", "order-total"]);
        assert!(results[0].score >= results[1].score);

        let entities = store
            .search(&[1.0, 0.0, 0.0], 10, &SearchFilters::kind(UnitKind::Member), 0.0)
            .await
            .unwrap();
        assert_eq!(entities.len(), 1);
    }

    #[tokio::test]
    async fn test_keyword_search_scores_names_higher() {
        let store = seeded().await;
        let results = store
            .keyword_search(&["Customer".into()], 10, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(results[0].unit.id, "customer");
        assert_eq!(results[1].unit.id, "order");
        assert!(results[0].score > results[1].score);

        let none = store
            .keyword_search(&["".into()], 10, &SearchFilters::default())
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_keyword_search_matches_documentation() {
        let store = seeded().await;
        let mut process = test_unit("payment-process", UnitKind::Member, Some("Payment"));
        process.member_name = Some("process".into());
        process.content = "public void process(Payment p) { gateway.charge(p); }".into();
        process.documentation = Some("Handles refunds for cancelled orders.".into());
        let mut refund = test_unit("refund", UnitKind::Entity, Some("Refund"));
        refund.content = "public class Refund { Money amount; }".into();
        store.upsert(&[process, refund], None).await.unwrap();

        let results = store
            .keyword_search(&["refund".into()], 10, &SearchFilters::default())
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.unit.id.as_str()).collect();
        assert_eq!(ids, vec!["refund", "payment-process"]);
        assert!(results[0].score > 0.0);
        assert_eq!(results[1].score, 0.0);

        let doc_only = store
            .keyword_search(&["cancelled".into()], 10, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(doc_only.len(), 1);
        assert_eq!(doc_only[0].unit.id, "payment-process");
    }

    #[tokio::test]
    async fn test_entity_lookups() {
        let store = seeded().await;
        let order = store.get_by_entity_name("Order").await.unwrap().unwrap();
        assert_eq!(order.id, "order");
        let nested = store.get_by_entity_name("Entry").await.unwrap().unwrap();
        assert_eq!(nested.id, "ledger-entry");
        assert!(store.get_by_entity_name("Missing").await.unwrap().is_none());

        let all = store.get_all_units_for_entity("Order").await.unwrap();
        let ids: Vec<&str> = all.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["order", "order-total"]);
    }

    #[tokio::test]
    async fn test_find_referencing_and_list_all() {
        let store = seeded().await;
        let refs = store.find_referencing("Customer", 5).await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].id, "order");

        let listed = store
            .list_all(&SearchFilters::kind(UnitKind::Entity))
            .await
            .unwrap();
        let names: Vec<_> = listed.iter().filter_map(|u| u.entity_name.clone()).collect();
        assert_eq!(names, vec!["Customer", "Order", "Ledger.Entry"]);
    }

    #[tokio::test]
    async fn test_delete_and_stats() {
        let store = seeded().await;
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_units, 4);
        assert_eq!(stats.by_language.get("kotlin"), Some(&1));
        assert_eq!(stats.by_kind.get("entity"), Some(&3));
        assert_eq!(stats.files, 3);
        assert_eq!(stats.embedded, 4);

        let removed = store.delete_by_path_prefix("src/Order").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_by_path_is_exact() {
        let store = InMemoryStore::new();
        let mut a = test_unit("a", UnitKind::ProseDocument, None);
        a.file_path = "docs/a.md".into();
        let mut b = test_unit("b", UnitKind::ProseDocument, None);
        b.file_path = "docs/a.md.txt".into();
        store.upsert(&[a, b], None).await.unwrap();

        assert_eq!(store.delete_by_path("docs/a.md").await.unwrap(), 1);
        assert_eq!(store.delete_by_path("docs/a.md").await.unwrap(), 0);
        let left = store.list_all(&SearchFilters::default()).await.unwrap();
        assert_eq!(left[0].file_path, "docs/a.md.txt");
    }
}
