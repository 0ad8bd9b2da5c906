//! Schema creation for the unit index.
//!
//! | Table | Contents |
//! |-------|----------|
//! | `units` | one row per retrieval unit, keyed by the deterministic unit id |
//! | `unit_vectors` | optional embedding per unit (little-endian f32 BLOB) |
//!
//! All statements are idempotent, so `chx init` can be re-run safely.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS units (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            language TEXT NOT NULL,
            kind TEXT NOT NULL,
            file_path TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            entity_name TEXT,
            member_name TEXT,
            documentation TEXT,
            references_json TEXT NOT NULL DEFAULT '[]',
            metadata_json TEXT NOT NULL DEFAULT '{}',
            indexed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vectors are dropped with their unit.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS unit_vectors (
            unit_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (unit_id) REFERENCES units(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_units_file_path ON units(file_path)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_units_entity_name ON units(entity_name)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_units_kind_language ON units(kind, language)")
        .execute(pool)
        .await?;

    Ok(())
}
