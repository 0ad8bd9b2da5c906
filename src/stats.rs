//! Index statistics and health overview.
//!
//! Summarizes what `chx index` stored: unit counts, embedding coverage,
//! and per-kind and per-language breakdowns. Used by `chx stats`.

use anyhow::Result;
use std::collections::BTreeMap;

use code_harness_core::store::{Store, StoreStats};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let stats = store.stats().await?;
    let last_indexed = store.last_indexed_at().await?;
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Code Harness: Index Stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!(
        "  Indexed:     {}",
        last_indexed
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
    println!("  Files:       {}", stats.files);
    println!("  Units:       {}", stats.total_units);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded,
        stats.total_units,
        coverage_percent(&stats)
    );

    print_breakdown("By kind:", "KIND", &stats.by_kind);
    print_breakdown("By language:", "LANGUAGE", &stats.by_language);
    println!();

    pool.close().await;
    Ok(())
}

fn coverage_percent(stats: &StoreStats) -> usize {
    if stats.total_units > 0 {
        (stats.embedded * 100) / stats.total_units
    } else {
        0
    }
}

fn print_breakdown(title: &str, header: &str, counts: &BTreeMap<String, usize>) {
    if counts.is_empty() {
        return;
    }
    println!();
    println!("  {}", title);
    println!("  {:<24} {:>8}", header, "UNITS");
    println!("  {}", "-".repeat(33));
    for (name, count) in counts {
        println!("  {:<24} {:>8}", name, count);
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 120), "2 mins ago");
        assert_eq!(format_ts_relative(now - 3600), "1 hour ago");
        assert!(format_ts_relative(now - 86400 * 90).contains('-'));
    }

    #[test]
    fn test_coverage_percent() {
        let mut stats = StoreStats::default();
        assert_eq!(coverage_percent(&stats), 0);
        stats.total_units = 8;
        stats.embedded = 6;
        assert_eq!(coverage_percent(&stats), 75);
    }
}
