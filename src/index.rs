//! Indexing pipeline: walk → parse → chunk → embed → store.
//!
//! ```text
//!  scan_tree ──► Vec<Artifact>
//!                 │
//!     phase 1     ├─ structural: spawn_blocking(parse_with_fallback) per file
//!                 │        (JoinSet; all tasks joined before phase 2)
//!                 ▼
//!          KnownEntities (Arc, immutable)
//!                 │
//!     phase 2     ├─ spawn_blocking(chunk_parsed / chunk_document) per file
//!                 ▼
//!          dedupe ─► embed_batch ─► Store::upsert
//! ```
//!
//! Per-file failures never abort the run: unreadable files and oversize
//! artifacts are skipped with a warning, parse failures use the regex
//! fallback. Results are sorted by path before storage so that repeated
//! runs over an unchanged tree produce identical writes.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use code_harness_core::chunk::{dedupe_units, Artifact, ArtifactKind, Chunker, KnownEntities};
use code_harness_core::embedding::{embed_batch, EmbeddingProvider};
use code_harness_core::models::RetrievalUnit;
use code_harness_core::parse::{parse_with_fallback, ParseOutcome, SourceParser};
use code_harness_core::store::{SearchFilters, Store};

use crate::config::{Config, IndexConfig};
use crate::embedding::create_provider;
use crate::java_parser::JavaParser;
use crate::progress::{IndexProgressEvent, ProgressMode, ProgressReporter};
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.*/**",
    "**/target/**",
    "**/node_modules/**",
    "**/build/**",
];

const UPSERT_BATCH: usize = 500;

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    /// Count what would be indexed without touching the store.
    pub dry_run: bool,
    /// Remove every stored unit before writing.
    pub reset: bool,
}

/// Counts reported after a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub structural_files: usize,
    pub degraded_files: usize,
    pub failed_files: usize,
    pub units: usize,
    pub embedded: usize,
    pub embed_skipped: usize,
    pub stored: usize,
    pub removed: usize,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Walk `config.root` and read every indexable file.
///
/// Returns artifacts sorted by relative path and the number of candidate
/// files that could not be read.
pub fn scan_tree(config: &IndexConfig) -> Result<(Vec<Artifact>, usize)> {
    let root = &config.root;
    if !root.exists() {
        bail!("Index root does not exist: {}", root.display());
    }

    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut artifacts = Vec::new();
    let mut unreadable = 0;
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("skipping unreadable entry: {}", e);
                unreadable += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if ArtifactKind::from_path(&rel_str).is_none() {
            continue;
        }

        match read_text(path) {
            Ok(text) => artifacts.push(Artifact::new(&rel_str, text)),
            Err(e) => {
                tracing::warn!(path = %rel_str, "skipping file: {:#}", e);
                unreadable += 1;
            }
        }
    }

    artifacts.sort_by(|a, b| a.path.cmp(&b.path));
    Ok((artifacts, unreadable))
}

fn read_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8(bytes)?)
}

/// Run both chunking phases with per-file parallelism.
pub async fn build_units(
    chunker: Arc<Chunker>,
    parser: Arc<dyn SourceParser>,
    artifacts: Vec<Artifact>,
    reporter: &dyn ProgressReporter,
    summary: &mut IndexSummary,
) -> Result<Vec<RetrievalUnit>> {
    let accepted: Vec<Arc<Artifact>> = artifacts
        .into_iter()
        .filter(|a| {
            let ok = chunker.accepts(a);
            if !ok {
                summary.files_skipped += 1;
            }
            ok
        })
        .map(Arc::new)
        .collect();

    // Phase 1: parse.
    let structural: Vec<Arc<Artifact>> = accepted
        .iter()
        .filter(|a| a.kind() == Some(ArtifactKind::Structural))
        .cloned()
        .collect();
    summary.structural_files = structural.len();

    let mut parse_tasks = JoinSet::new();
    for (i, artifact) in structural.iter().enumerate() {
        let parser = Arc::clone(&parser);
        let artifact = Arc::clone(artifact);
        parse_tasks.spawn_blocking(move || {
            (i, parse_with_fallback(parser.as_ref(), &artifact.path, &artifact.text))
        });
    }
    let mut outcomes: Vec<(usize, ParseOutcome)> = Vec::with_capacity(structural.len());
    let total = structural.len() as u64;
    while let Some(joined) = parse_tasks.join_next().await {
        outcomes.push(joined?);
        reporter.report(IndexProgressEvent::Parsing {
            n: outcomes.len() as u64,
            total,
        });
    }
    outcomes.sort_by_key(|(i, _)| *i);

    for (i, outcome) in &outcomes {
        match outcome {
            ParseOutcome::Parsed(_) => {}
            ParseOutcome::Degraded { reason, .. } => {
                summary.degraded_files += 1;
                tracing::warn!(path = %structural[*i].path, %reason, "degraded extraction");
            }
            ParseOutcome::Failed { reason } => {
                summary.failed_files += 1;
                tracing::warn!(path = %structural[*i].path, %reason, "no units extracted");
            }
        }
    }

    // Barrier: the known set is complete before any chunking starts.
    let known = Arc::new(KnownEntities::from_files(
        outcomes.iter().filter_map(|(_, o)| o.file()),
    ));
    tracing::debug!(known = known.len(), "known entity set built");

    // Phase 2: chunk.
    let mut chunk_tasks = JoinSet::new();
    for (i, outcome) in outcomes.into_iter() {
        let chunker = Arc::clone(&chunker);
        let known = Arc::clone(&known);
        chunk_tasks.spawn_blocking(move || (i, chunker.chunk_parsed(&outcome, &known)));
    }
    let offset = structural.len();
    for (j, artifact) in accepted
        .iter()
        .filter(|a| a.kind() != Some(ArtifactKind::Structural))
        .enumerate()
    {
        let chunker = Arc::clone(&chunker);
        let known = Arc::clone(&known);
        let artifact = Arc::clone(artifact);
        chunk_tasks.spawn_blocking(move || (offset + j, chunker.chunk_document(&artifact, &known)));
    }

    let mut per_file: Vec<(usize, Vec<RetrievalUnit>)> = Vec::new();
    while let Some(joined) = chunk_tasks.join_next().await {
        per_file.push(joined?);
    }
    per_file.sort_by_key(|(i, _)| *i);
    let files = per_file.len() as u64;
    let units = dedupe_units(per_file.into_iter().flat_map(|(_, u)| u).collect());

    reporter.report(IndexProgressEvent::Chunked {
        units: units.len() as u64,
        files,
    });
    Ok(units)
}

/// Remove units whose id is no longer produced. The whole file is
/// dropped so that the following upsert leaves exactly the fresh units.
async fn remove_stale(store: &dyn Store, units: &[RetrievalUnit]) -> Result<usize> {
    let fresh: HashSet<&str> = units.iter().map(|u| u.id.as_str()).collect();
    let stale_files: BTreeSet<String> = store
        .list_all(&SearchFilters::default())
        .await?
        .into_iter()
        .filter(|u| !fresh.contains(u.id.as_str()))
        .map(|u| u.file_path)
        .collect();

    let mut removed = 0;
    for path in &stale_files {
        removed += store.delete_by_path(path).await?;
    }
    Ok(removed)
}

/// Index `config.index.root` into `store`.
pub async fn run_index(
    config: &Config,
    store: &dyn Store,
    embedder: &dyn EmbeddingProvider,
    parser: Arc<dyn SourceParser>,
    options: IndexOptions,
    reporter: &dyn ProgressReporter,
) -> Result<IndexSummary> {
    let mut summary = IndexSummary::default();
    reporter.report(IndexProgressEvent::Scanning {
        root: config.index.root.display().to_string(),
    });

    let (artifacts, unreadable) = scan_tree(&config.index)?;
    summary.files_scanned = artifacts.len() + unreadable;
    summary.files_skipped = unreadable;

    let chunker = Arc::new(Chunker::new(config.chunking.chunker_config()));
    let units = build_units(chunker, parser, artifacts, reporter, &mut summary).await?;
    summary.units = units.len();

    if options.dry_run {
        return Ok(summary);
    }

    if options.reset {
        summary.removed = store.delete_by_path_prefix("").await?;
    } else {
        summary.removed = remove_stale(store, &units).await?;
    }

    let (units, vectors) = if config.embedding.is_enabled() {
        let texts: Vec<String> = units.iter().map(|u| u.embedding_text()).collect();
        let batch = embed_batch(embedder, &texts, &config.embedding.batch_limits()).await?;
        summary.embedded = batch.embedded_count();
        summary.embed_skipped = batch.skipped.len();
        reporter.report(IndexProgressEvent::Embedding {
            n: summary.embedded as u64,
            total: texts.len() as u64,
        });

        let mut kept = Vec::with_capacity(summary.embedded);
        let mut vectors = Vec::with_capacity(summary.embedded);
        for (unit, vector) in units.into_iter().zip(batch.vectors) {
            if let Some(v) = vector {
                kept.push(unit);
                vectors.push(v);
            }
        }
        (kept, Some(vectors))
    } else {
        (units, None)
    };

    for (i, chunk) in units.chunks(UPSERT_BATCH).enumerate() {
        let vecs = vectors
            .as_ref()
            .map(|v| &v[i * UPSERT_BATCH..i * UPSERT_BATCH + chunk.len()]);
        summary.stored += store.upsert(chunk, vecs).await?;
    }
    reporter.report(IndexProgressEvent::Stored {
        units: summary.stored as u64,
    });

    Ok(summary)
}

/// Run `chx index`: index the configured root into the SQLite store and
/// print a summary.
pub async fn run_index_command(
    config: &Config,
    options: IndexOptions,
    progress: ProgressMode,
) -> Result<()> {
    migrate::run_migrations(config).await?;
    let pool = db::connect(config).await?;
    let embedder = create_provider(&config.embedding)?;
    let store = SqliteStore::new(pool.clone())
        .with_keyword_weights(config.retrieval.keyword_weights())
        .with_model(embedder.model_name());
    let reporter = progress.reporter();

    let summary = run_index(
        config,
        &store,
        embedder.as_ref(),
        Arc::new(JavaParser::new()),
        options,
        reporter.as_ref(),
    )
    .await?;

    let root = config.index.root.display();
    if options.dry_run {
        println!("index {} (dry-run)", root);
    } else {
        println!("index {}", root);
    }
    println!("  files scanned: {}", summary.files_scanned);
    println!("  files skipped: {}", summary.files_skipped);
    println!(
        "  java files: {} ({} degraded, {} failed)",
        summary.structural_files, summary.degraded_files, summary.failed_files
    );
    println!("  units: {}", summary.units);
    if !options.dry_run {
        if config.embedding.is_enabled() {
            println!("  embedded: {}", summary.embedded);
            println!("  embedding skipped: {}", summary.embed_skipped);
        }
        println!("  removed: {}", summary.removed);
        println!("  stored: {}", summary.stored);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::java_parser::JavaParser;
    use crate::progress::NoProgress;
    use code_harness_core::models::UnitKind;
    use code_harness_core::store::memory::InMemoryStore;
    use std::fs;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            root,
            "src/Order.java",
            "package shop;\n\n/** An order. */\npublic class Order {\n    private Customer customer;\n    private int qty;\n}\n",
        );
        write(
            root,
            "src/Customer.java",
            "package shop;\n\npublic class Customer {\n    private String name;\n    private Order lastOrder;\n}\n",
        );
        write(
            root,
            "flows/checkout.json",
            "{\n  \"name\": \"Checkout\",\n  \"entity\": \"Order\",\n  \"steps\": [\"Customer\"]\n}\n",
        );
        write(root, "target/Gen.java", "public class Gen {\n}\n");
        write(root, ".git/config.toml", "a = 1\n");
        write(root, "README.bin", "ignored");
        dir
    }

    fn config(root: &Path) -> Config {
        let mut config = Config::default();
        config.index.root = root.to_path_buf();
        config
    }

    #[test]
    fn test_scan_excludes_and_classifies() {
        let dir = tree();
        let (artifacts, unreadable) = scan_tree(&config(dir.path()).index).unwrap();
        let paths: Vec<&str> = artifacts.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["flows/checkout.json", "src/Customer.java", "src/Order.java"]
        );
        assert_eq!(unreadable, 0);
    }

    #[test]
    fn test_custom_excludes() {
        let dir = tree();
        let mut cfg = config(dir.path());
        cfg.index.exclude_globs = vec!["flows/**".into()];
        let (artifacts, _) = scan_tree(&cfg.index).unwrap();
        assert!(artifacts.iter().all(|a| !a.path.starts_with("flows/")));
    }

    #[tokio::test]
    async fn test_index_into_memory_store_resolves_references() {
        let dir = tree();
        let store = InMemoryStore::new();
        let cfg = config(dir.path());
        let summary = run_index(
            &cfg,
            &store,
            &crate::embedding::DisabledEmbedder,
            Arc::new(JavaParser::new()),
            IndexOptions::default(),
            &NoProgress,
        )
        .await
        .unwrap();

        assert_eq!(summary.structural_files, 2);
        assert_eq!(summary.failed_files, 0);
        assert_eq!(summary.stored, summary.units);

        let order = store.get_by_entity_name("Order").await.unwrap().unwrap();
        assert_eq!(order.references, vec!["Customer"]);
        let flow = store
            .list_all(&SearchFilters::kind(UnitKind::ConfigDocument))
            .await
            .unwrap();
        assert_eq!(flow.len(), 1);
        assert_eq!(flow[0].references, vec!["Customer", "Order"]);
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent_and_drops_deleted_files() {
        let dir = tree();
        let store = InMemoryStore::new();
        let cfg = config(dir.path());
        let parser: Arc<dyn SourceParser> = Arc::new(JavaParser::new());
        let embedder = crate::embedding::DisabledEmbedder;

        run_index(&cfg, &store, &embedder, Arc::clone(&parser), IndexOptions::default(), &NoProgress)
            .await
            .unwrap();
        let before = store.count().await.unwrap();
        run_index(&cfg, &store, &embedder, Arc::clone(&parser), IndexOptions::default(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), before);

        fs::remove_file(dir.path().join("flows/checkout.json")).unwrap();
        let summary = run_index(&cfg, &store, &embedder, parser, IndexOptions::default(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(summary.removed, 1);
        assert!(store
            .list_all(&SearchFilters::kind(UnitKind::ConfigDocument))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_removing_a_file_leaves_path_prefixed_neighbours() {
        let dir = tree();
        let doc = "# Refunds\n\nRefunds are issued to the original card.\nPartial refunds need approval.\n";
        write(dir.path(), "docs/a.md", doc);
        write(dir.path(), "docs/a.md.txt", doc);
        let store = InMemoryStore::new();
        let cfg = config(dir.path());
        let parser: Arc<dyn SourceParser> = Arc::new(JavaParser::new());
        let embedder = crate::embedding::DisabledEmbedder;

        run_index(&cfg, &store, &embedder, Arc::clone(&parser), IndexOptions::default(), &NoProgress)
            .await
            .unwrap();
        let neighbour = store.list_all(&SearchFilters::default()).await.unwrap();
        let neighbour_units = neighbour
            .iter()
            .filter(|u| u.file_path == "docs/a.md.txt")
            .count();
        assert!(neighbour_units > 0);

        fs::remove_file(dir.path().join("docs/a.md")).unwrap();
        let summary = run_index(&cfg, &store, &embedder, parser, IndexOptions::default(), &NoProgress)
            .await
            .unwrap();
        let left = store.list_all(&SearchFilters::default()).await.unwrap();
        assert!(left.iter().all(|u| u.file_path != "docs/a.md"));
        assert_eq!(
            left.iter().filter(|u| u.file_path == "docs/a.md.txt").count(),
            neighbour_units
        );
        let dropped = neighbour.iter().filter(|u| u.file_path == "docs/a.md").count();
        assert_eq!(summary.removed, dropped);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let dir = tree();
        let store = InMemoryStore::new();
        let summary = run_index(
            &config(dir.path()),
            &store,
            &crate::embedding::DisabledEmbedder,
            Arc::new(JavaParser::new()),
            IndexOptions {
                dry_run: true,
                reset: false,
            },
            &NoProgress,
        )
        .await
        .unwrap();
        assert!(summary.units > 0);
        assert_eq!(summary.stored, 0);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
