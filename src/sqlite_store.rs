//! SQLite-backed [`Store`] implementation.
//!
//! Units live in the `units` table and optional vectors in `unit_vectors`
//! (see [`crate::migrate`]). Vector search is a brute-force cosine scan over
//! the stored BLOBs. Keyword search narrows candidates with `LIKE` and then
//! scores them with the same [`KeywordWeights`] as the in-memory backend, so
//! both backends rank identically.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::BTreeMap;

use code_harness_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use code_harness_core::models::{RankedResult, RetrievalUnit, UnitKind};
use code_harness_core::store::{
    normalize_terms, KeywordWeights, SearchFilters, Store, StoreStats,
};

const UNIT_COLUMNS: &str = "u.id, u.content, u.language, u.kind, u.file_path, u.start_line, \
     u.end_line, u.entity_name, u.member_name, u.documentation, u.references_json, u.metadata_json";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    weights: KeywordWeights,
    /// Recorded next to each stored vector.
    model: String,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            weights: KeywordWeights::default(),
            model: "unknown".to_string(),
        }
    }

    pub fn with_keyword_weights(mut self, weights: KeywordWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Unix timestamp of the most recent upsert, if any.
    pub async fn last_indexed_at(&self) -> Result<Option<i64>> {
        let ts: Option<i64> = sqlx::query_scalar("SELECT MAX(indexed_at) FROM units")
            .fetch_one(&self.pool)
            .await?;
        Ok(ts)
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filters: &SearchFilters) {
    if let Some(kind) = filters.kind {
        qb.push(" AND u.kind = ").push_bind(kind.as_str());
    }
    if let Some(language) = &filters.language {
        qb.push(" AND u.language = ").push_bind(language.clone());
    }
}

/// Escape `\`, `%` and `_` for a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn unit_from_row(row: &SqliteRow) -> Result<RetrievalUnit> {
    let kind: String = row.get("kind");
    let references_json: String = row.get("references_json");
    let metadata_json: String = row.get("metadata_json");
    let start_line: i64 = row.get("start_line");
    let end_line: i64 = row.get("end_line");
    let id: String = row.get("id");

    let references: Vec<String> = serde_json::from_str(&references_json)
        .with_context(|| format!("Corrupt references for unit {}", id))?;
    let metadata: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(&metadata_json).unwrap_or_default();

    Ok(RetrievalUnit {
        id,
        content: row.get("content"),
        language: row.get("language"),
        kind: kind.parse()?,
        file_path: row.get("file_path"),
        start_line: start_line.max(0) as usize,
        end_line: end_line.max(0) as usize,
        entity_name: row.get("entity_name"),
        member_name: row.get("member_name"),
        documentation: row.get("documentation"),
        references,
        metadata,
    })
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

#[async_trait]
impl Store for SqliteStore {
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
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for (i, unit) in units.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO units (id, content, language, kind, file_path, start_line, end_line,
                                   entity_name, member_name, documentation, references_json,
                                   metadata_json, indexed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    content = excluded.content,
                    language = excluded.language,
                    kind = excluded.kind,
                    file_path = excluded.file_path,
                    start_line = excluded.start_line,
                    end_line = excluded.end_line,
                    entity_name = excluded.entity_name,
                    member_name = excluded.member_name,
                    documentation = excluded.documentation,
                    references_json = excluded.references_json,
                    metadata_json = excluded.metadata_json,
                    indexed_at = excluded.indexed_at
                "#,
            )
            .bind(&unit.id)
            .bind(&unit.content)
            .bind(&unit.language)
            .bind(unit.kind.as_str())
            .bind(&unit.file_path)
            .bind(unit.start_line as i64)
            .bind(unit.end_line as i64)
            .bind(&unit.entity_name)
            .bind(&unit.member_name)
            .bind(&unit.documentation)
            .bind(serde_json::to_string(&unit.references)?)
            .bind(serde_json::to_string(&unit.metadata)?)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            match vectors.map(|v| &v[i]) {
                Some(vec) => {
                    sqlx::query(
                        r#"
                        INSERT INTO unit_vectors (unit_id, model, dims, embedding)
                        VALUES (?, ?, ?, ?)
                        ON CONFLICT(unit_id) DO UPDATE SET
                            model = excluded.model,
                            dims = excluded.dims,
                            embedding = excluded.embedding
                        "#,
                    )
                    .bind(&unit.id)
                    .bind(&self.model)
                    .bind(vec.len() as i64)
                    .bind(vec_to_blob(vec))
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    // The content may have changed; an old vector would be stale.
                    sqlx::query("DELETE FROM unit_vectors WHERE unit_id = ?")
                        .bind(&unit.id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(units.len())
    }

    async fn search(
        &self,
        query_vec: &[f32],
        top_k: usize,
        filters: &SearchFilters,
        similarity_floor: f32,
    ) -> Result<Vec<RankedResult>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {}, v.embedding FROM units u JOIN unit_vectors v ON v.unit_id = u.id WHERE 1 = 1",
            UNIT_COLUMNS
        ));
        push_filters(&mut qb, filters);
        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut results = Vec::new();
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let sim = cosine_similarity(query_vec, &blob_to_vec(&blob));
            if sim >= similarity_floor {
                results.push(RankedResult {
                    unit: unit_from_row(row)?,
                    score: sim as f64,
                });
            }
        }
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

        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM units u WHERE 1 = 1", UNIT_COLUMNS));
        push_filters(&mut qb, filters);
        qb.push(" AND (");
        let mut first = true;
        for term in &terms {
            let pattern = format!("%{}%", escape_like(term));
            for column in [
                "u.content",
                "u.entity_name",
                "u.member_name",
                "u.documentation",
            ] {
                if !first {
                    qb.push(" OR ");
                }
                first = false;
                qb.push(column)
                    .push(" LIKE ")
                    .push_bind(pattern.clone())
                    .push(" ESCAPE '\\'");
            }
        }
        qb.push(")");
        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut results = Vec::new();
        for row in &rows {
            let unit = unit_from_row(row)?;
            // LIKE folds ASCII case only; re-check with the shared matcher.
            if self.weights.matches(&unit, &terms) {
                let score = self.weights.score(&unit, &terms);
                results.push(RankedResult { unit, score });
            }
        }
        Ok(rank(results, top_k))
    }

    async fn get_by_entity_name(&self, name: &str) -> Result<Option<RetrievalUnit>> {
        let nested = format!("%.{}", escape_like(name));
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM units u
            WHERE u.kind = 'entity'
              AND (u.entity_name = ? OR u.entity_name LIKE ? ESCAPE '\')
            ORDER BY (u.entity_name != ?), u.file_path
            LIMIT 1
            "#,
            UNIT_COLUMNS
        ))
        .bind(name)
        .bind(&nested)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(unit_from_row).transpose()
    }

    async fn get_all_units_for_entity(&self, name: &str) -> Result<Vec<RetrievalUnit>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM units u WHERE u.entity_name = ? ORDER BY u.start_line, u.id",
            UNIT_COLUMNS
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(unit_from_row).collect()
    }

    async fn find_referencing(&self, name: &str, top_k: usize) -> Result<Vec<RetrievalUnit>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM units u
            WHERE EXISTS (SELECT 1 FROM json_each(u.references_json) r WHERE r.value = ?)
            ORDER BY u.file_path, u.start_line
            LIMIT ?
            "#,
            UNIT_COLUMNS
        ))
        .bind(name)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(unit_from_row).collect()
    }

    async fn list_all(&self, filters: &SearchFilters) -> Result<Vec<RetrievalUnit>> {
        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM units u WHERE 1 = 1", UNIT_COLUMNS));
        push_filters(&mut qb, filters);
        qb.push(" ORDER BY u.language, u.entity_name, u.file_path, u.start_line");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(unit_from_row).collect()
    }

    async fn delete_by_path_prefix(&self, prefix: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM unit_vectors WHERE unit_id IN \
             (SELECT id FROM units WHERE substr(file_path, 1, length(?)) = ?)",
        )
        .bind(prefix)
        .bind(prefix)
        .execute(&mut *tx)
        .await?;
        let deleted = sqlx::query("DELETE FROM units WHERE substr(file_path, 1, length(?)) = ?")
            .bind(prefix)
            .bind(prefix)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted as usize)
    }

    async fn delete_by_path(&self, path: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM unit_vectors WHERE unit_id IN (SELECT id FROM units WHERE file_path = ?)",
        )
        .bind(path)
        .execute(&mut *tx)
        .await?;
        let deleted = sqlx::query("DELETE FROM units WHERE file_path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted as usize)
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM units")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM units")
            .fetch_one(&self.pool)
            .await?;
        let files: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT file_path) FROM units")
            .fetch_one(&self.pool)
            .await?;
        let embedded: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM unit_vectors v JOIN units u ON u.id = v.unit_id",
        )
        .fetch_one(&self.pool)
        .await?;

        let mut by_language = BTreeMap::new();
        for row in sqlx::query("SELECT language, COUNT(*) AS n FROM units GROUP BY language")
            .fetch_all(&self.pool)
            .await?
        {
            let n: i64 = row.get("n");
            by_language.insert(row.get::<String, _>("language"), n as usize);
        }

        let mut by_kind = BTreeMap::new();
        for row in sqlx::query("SELECT kind, COUNT(*) AS n FROM units GROUP BY kind")
            .fetch_all(&self.pool)
            .await?
        {
            let n: i64 = row.get("n");
            let kind: String = row.get("kind");
            // Rows written by an older schema could carry unknown kinds.
            let kind = kind
                .parse::<UnitKind>()
                .map(|k| k.to_string())
                .unwrap_or(kind);
            by_kind.insert(kind, n as usize);
        }

        Ok(StoreStats {
            total_units: total as usize,
            by_language,
            by_kind,
            files: files as usize,
            embedded: embedded as usize,
        })
    }
}
