//! Record moderation and inspection.
//!
//! Status changes go through the lifecycle hooks, so roll-up counters,
//! the search index and book progress follow every transition.

use anyhow::{bail, Result};

use arxiu_core::achievements::AchievementEvaluator;
use arxiu_core::lifecycle::{mark_edited, set_status, Transition};
use arxiu_core::models::ModerationStatus;
use arxiu_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

fn print_transition(t: &Transition) {
    if t.from == t.to {
        println!("record {}: already {}", t.record_id, t.to);
    } else {
        println!("record {}: {} -> {}", t.record_id, t.from, t.to);
    }
}

/// Move each record in `ids` to `status`. Stops at the first missing record.
pub async fn run_set_status(config: &Config, ids: &[i64], status: &str) -> Result<()> {
    let to = status
        .parse::<ModerationStatus>()
        .map_err(anyhow::Error::msg)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let evaluator = config.achievements.enabled.then(AchievementEvaluator::new);

    for &id in ids {
        let t = set_status(&store, id, to, evaluator.as_ref()).await?;
        print_transition(&t);
    }

    pool.close().await;
    Ok(())
}

pub async fn run_mark_edited(config: &Config, id: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let t = mark_edited(&store, id).await?;
    pool.close().await;
    print_transition(&t);
    Ok(())
}

pub async fn run_show(config: &Config, id: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let bundle = store.load_bundle(id).await?;
    pool.close().await;

    let Some(bundle) = bundle else {
        bail!("record {} not found", id);
    };
    println!("{}", serde_json::to_string_pretty(&bundle)?);
    Ok(())
}
