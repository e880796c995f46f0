//! Database statistics and indexing overview.
//!
//! Summarizes what the archive holds: records by moderation status,
//! persons, dictionary and template counts, search coverage, and the
//! per-book indexing percentage with the time it was last recomputed.

use anyhow::Result;
use sqlx::Row;

use arxiu_core::models::BookFilter;
use arxiu_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let status_rows =
        sqlx::query("SELECT status, COUNT(*) AS n FROM records GROUP BY status ORDER BY status")
            .fetch_all(&pool)
            .await?;
    let total_records: i64 = status_rows.iter().map(|r| r.get::<i64, _>("n")).sum();

    let total_persons: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM persons")
        .fetch_one(&pool)
        .await?;
    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_docs")
        .fetch_one(&pool)
        .await?;
    let total_surnames: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cognoms")
        .fetch_one(&pool)
        .await?;
    let total_templates: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM templates")
        .fetch_one(&pool)
        .await?;
    let total_awards: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_achievements")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Arxiu - Database Stats");
    println!("======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Records:     {}", total_records);
    for row in &status_rows {
        let status: String = row.get("status");
        let n: i64 = row.get("n");
        println!("    {:<10} {}", status, n);
    }
    println!("  Persons:     {}", total_persons);
    println!("  Indexed:     {} search documents", total_docs);
    println!("  Surnames:    {}", total_surnames);
    println!("  Templates:   {}", total_templates);
    println!("  Awards:      {}", total_awards);

    let bucket_rows = sqlx::query(
        "SELECT bucket, SUM(count) AS n FROM demography \
         WHERE scope_kind = 'municipi' GROUP BY bucket ORDER BY bucket",
    )
    .fetch_all(&pool)
    .await?;
    if !bucket_rows.is_empty() {
        println!();
        println!("  Demography (municipalities):");
        for row in &bucket_rows {
            let bucket: String = row.get("bucket");
            let n: i64 = row.get("n");
            println!("    {:<10} {}", bucket, n);
        }
    }

    let books = store.list_books(&BookFilter::default()).await?;
    if !books.is_empty() {
        println!();
        println!("  By book:");
        println!(
            "  {:<24} {:>8} {:>8}   {}",
            "BOOK", "RECORDS", "INDEXED", "COMPUTED"
        );
        println!("  {}", "-".repeat(60));
        for b in &books {
            let label = if b.title.is_empty() {
                format!("{} {}", b.id, b.chronology)
            } else {
                format!("{} {}", b.id, b.title)
            };
            match store.get_book_stats(b.id).await? {
                Some(s) => println!(
                    "  {:<24} {:>8} {:>7}%   {}",
                    label,
                    s.total_records,
                    s.percentage,
                    format_ts_relative(s.computed_at)
                ),
                None => println!("  {:<24} {:>8} {:>8}   never", label, "-", "-"),
            }
        }
    }

    println!();

    pool.close().await;
    Ok(())
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
    let delta = chrono::Utc::now().timestamp() - ts;

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
    fn test_relative_timestamps() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(0), "1970-01-01 00:00");
    }
}
