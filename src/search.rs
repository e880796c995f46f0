use anyhow::Result;

use arxiu_core::search::{search, SearchHit};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn run_search(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let final_limit = limit.unwrap_or(config.search.final_limit as usize);
    let weights = config.search.weights.to_weights();

    let hits = search(&store, query, &weights, final_limit).await?;
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        print_hit(i + 1, hit);
    }
    Ok(())
}

fn print_hit(rank: usize, hit: &SearchHit) {
    let doc = &hit.doc;
    let name = if doc.full_norm.is_empty() {
        "(sense nom)"
    } else {
        doc.full_norm.as_str()
    };
    println!(
        "{}. [{:.2}] {} {} / {}",
        rank,
        hit.score,
        doc.entity.as_str(),
        doc.entity_id,
        name
    );
    if let Some(date) = doc.act_date {
        println!("    date: {}", date.format("%Y-%m-%d"));
    } else if let Some(year) = doc.act_year {
        println!("    year: {}", year);
    }
    if let Some(book) = doc.book_id {
        println!("    book: {}", book);
    }
    if let Some(m) = doc.municipality_id {
        println!("    municipality: {}", m);
    }
    println!("    matched: {}", hit.reasons.join(", "));
    println!();
}
