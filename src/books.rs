use anyhow::{bail, Result};

use arxiu_core::models::{Book, BookFilter};
use arxiu_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn run_book_add(config: &Config, book: Book) -> Result<()> {
    if book.chronology.trim().is_empty() && book.title.trim().is_empty() {
        bail!("a book needs a title or a chronology label");
    }
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let id = store.upsert_book(&book).await?;
    pool.close().await;
    println!("book {} saved", id);
    Ok(())
}

pub async fn run_book_list(config: &Config, filter: BookFilter) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let books = store.list_books(&filter).await?;

    if books.is_empty() {
        println!("No books.");
        pool.close().await;
        return Ok(());
    }
    println!(
        "{:>5}  {:<12} {:<32} {:>6} {:>6}  {}",
        "ID", "TYPE", "TITLE", "MUNIC.", "INDEX", "CHRONOLOGY"
    );
    for b in &books {
        let pct = match store.get_book_stats(b.id).await? {
            Some(s) => format!("{}%", s.percentage),
            None => "-".to_string(),
        };
        println!(
            "{:>5}  {:<12} {:<32} {:>6} {:>6}  {}",
            b.id,
            b.book_type,
            b.title,
            b.municipality_id
                .map(|m| m.to_string())
                .unwrap_or_else(|| "-".into()),
            pct,
            b.chronology
        );
    }

    pool.close().await;
    Ok(())
}
