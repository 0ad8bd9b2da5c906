//! Index a temp tree into SQLite and answer questions over it, with
//! in-process embedding and generation providers.

use anyhow::Result;
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use code_harness::config::Config;
use code_harness::index::{run_index, IndexOptions};
use code_harness::java_parser::JavaParser;
use code_harness::progress::NoProgress;
use code_harness::sqlite_store::SqliteStore;
use code_harness::{db, migrate};
use code_harness_core::embedding::EmbeddingProvider;
use code_harness_core::generation::{GenerationRequest, TextGenerator};
use code_harness_core::models::UnitKind;
use code_harness_core::retrieve::{QueryOptions, Retriever};
use code_harness_core::store::{SearchFilters, Store};

const FEATURES: &[&str] = &["order", "customer", "total", "price", "email"];

/// Embeds a text as presence flags for a few words plus a constant.
struct FeatureEmbedder;

#[async_trait]
impl EmbeddingProvider for FeatureEmbedder {
    fn model_name(&self) -> &str {
        "feature"
    }

    fn dims(&self) -> usize {
        FEATURES.len() + 1
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                FEATURES
                    .iter()
                    .map(|f| if t.contains(f) { 1.0 } else { 0.0 })
                    .chain(std::iter::once(0.2))
                    .collect()
            })
            .collect())
    }
}

#[derive(Default)]
struct RecordingGenerator {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl TextGenerator for RecordingGenerator {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        Ok("The total is quantity times unit price.".to_string())
    }
}

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn project(root: &Path) {
    write(
        root,
        "src/shop/Order.java",
        r#"package shop;

import java.util.List;

/** A customer order. */
public class Order {
    private Customer customer;
    private int quantity;

    /** Total price for this order. */
    public int total(int unitPrice) {
        int sum = quantity * unitPrice;
        return sum > 0 ? sum : 0;
    }
}
"#,
    );
    write(
        root,
        "src/shop/Customer.java",
        r#"package shop;

public class Customer {
    private String name;
    private String email;
}
"#,
    );
    write(
        root,
        "flows/checkout.json",
        "{\n  \"name\": \"Checkout\",\n  \"entity\": \"Order\",\n  \"payer\": \"Customer\"\n}\n",
    );
}

async fn setup() -> (TempDir, Config, Arc<SqliteStore>) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("project");
    project(&root);

    let mut config = Config::default();
    config.index.root = root;
    config.db.path = tmp.path().join("data/chx.sqlite");
    config.embedding.provider = "ollama".to_string();

    migrate::run_migrations(&config).await.unwrap();
    let pool = db::connect(&config).await.unwrap();
    let store = Arc::new(SqliteStore::new(pool).with_model("feature"));
    (tmp, config, store)
}

async fn index(config: &Config, store: &SqliteStore) -> code_harness::index::IndexSummary {
    run_index(
        config,
        store,
        &FeatureEmbedder,
        Arc::new(JavaParser::new()),
        IndexOptions::default(),
        &NoProgress,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_index_embeds_every_unit() {
    let (_tmp, config, store) = setup().await;
    let summary = index(&config, &store).await;

    assert_eq!(summary.failed_files, 0);
    assert_eq!(summary.embed_skipped, 0);
    assert_eq!(summary.embedded, summary.units);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_units, summary.units);
    assert_eq!(stats.embedded, stats.total_units);
    assert_eq!(stats.files, 3);
    assert!(store.last_indexed_at().await.unwrap().is_some());
}

#[tokio::test]
async fn test_member_units_carry_signature_references() {
    let (_tmp, config, store) = setup().await;
    index(&config, &store).await;

    let members = store
        .list_all(&SearchFilters::kind(UnitKind::Member))
        .await
        .unwrap();
    let total = members
        .iter()
        .find(|u| u.member_name.as_deref() == Some("total"))
        .expect("total() indexed");
    assert_eq!(total.entity_name.as_deref(), Some("Order"));
    assert_eq!(total.start_line, 11);
    assert!(total.documentation.as_deref().unwrap_or("").contains("Total price"));

    let order = store.get_by_entity_name("Order").await.unwrap().unwrap();
    assert_eq!(order.references, vec!["Customer"]);
}

#[tokio::test]
async fn test_query_answers_with_direct_hit_and_dependencies() {
    let (_tmp, config, store) = setup().await;
    index(&config, &store).await;

    let generator = Arc::new(RecordingGenerator::default());
    let retriever = Retriever::new(
        store.clone(),
        Arc::new(FeatureEmbedder),
        generator.clone(),
        config.retriever_config(),
    );

    let response = retriever
        .query("How does Order compute the total price?", &QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(response.model.as_deref(), Some("recording"));
    assert_eq!(
        response.sources[0].unit.entity_name.as_deref(),
        Some("Order")
    );
    assert!(response
        .dependencies
        .iter()
        .any(|u| u.entity_name.as_deref() == Some("Customer")));

    let prompts = generator.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("class Order"));
}

#[tokio::test]
async fn test_config_dependencies_make_no_generation_call() {
    let (_tmp, config, store) = setup().await;
    index(&config, &store).await;

    let generator = Arc::new(RecordingGenerator::default());
    let retriever = Retriever::new(
        store.clone(),
        Arc::new(FeatureEmbedder),
        generator.clone(),
        config.retriever_config(),
    );
    let response = retriever.config_dependencies("checkout").await.unwrap();

    let names: Vec<_> = response
        .dependencies
        .iter()
        .filter_map(|u| u.entity_name.clone())
        .collect();
    assert_eq!(names, vec!["Customer", "Order"]);
    assert!(response.model.is_none());
    assert!(generator.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_reindex_after_delete_drops_units_and_vectors() {
    let (_tmp, config, store) = setup().await;
    index(&config, &store).await;

    fs::remove_file(config.index.root.join("src/shop/Customer.java")).unwrap();
    let summary = index(&config, &store).await;
    assert!(summary.removed >= 1);

    assert!(store.get_by_entity_name("Customer").await.unwrap().is_none());
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.embedded, stats.total_units);
    assert_eq!(stats.files, 2);

    // Order no longer resolves Customer as a known entity.
    let order = store.get_by_entity_name("Order").await.unwrap().unwrap();
    assert!(order.references.is_empty());
}
