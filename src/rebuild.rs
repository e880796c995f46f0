//! Rebuild derived data from published records: demography and frequency
//! counters, search documents, and per-book indexing progress.

use anyhow::{bail, Result};
use tracing::info;

use arxiu_core::models::BookFilter;
use arxiu_core::progress::recompute_books;
use arxiu_core::rollup::{rebuild, RollupScope};
use arxiu_core::search::rebuild_index;
use arxiu_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Which derived tables to rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RebuildTarget {
    Counters,
    Search,
    Progress,
    All,
}

/// Parse `--scope`: `all`, `municipality:<id>` or `level:<id>`.
pub fn parse_scope(s: &str) -> Result<RollupScope> {
    if s == "all" {
        return Ok(RollupScope::All);
    }
    let Some((kind, id)) = s.split_once(':') else {
        bail!("invalid scope '{}': use all, municipality:<id> or level:<id>", s);
    };
    let id: i64 = id
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid scope id in '{}'", s))?;
    match kind {
        "municipality" | "municipi" => Ok(RollupScope::Municipality(id)),
        "level" | "nivell" => Ok(RollupScope::Level(id)),
        _ => bail!("invalid scope '{}': use all, municipality:<id> or level:<id>", s),
    }
}

pub async fn run_rebuild(config: &Config, target: RebuildTarget, scope: RollupScope) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    if matches!(target, RebuildTarget::Counters | RebuildTarget::All) {
        let report = rebuild(&store, scope).await?;
        println!(
            "counters: {} records replayed, {} failed",
            report.records, report.failed
        );
    }
    if matches!(target, RebuildTarget::Search | RebuildTarget::All) {
        let report = rebuild_index(&store).await?;
        println!(
            "search: {} records indexed, {} failed",
            report.indexed, report.failed
        );
    }
    if matches!(target, RebuildTarget::Progress | RebuildTarget::All) {
        let ids: Vec<i64> = store
            .list_books(&BookFilter::default())
            .await?
            .iter()
            .map(|b| b.id)
            .collect();
        let stats = recompute_books(&store, ids).await?;
        println!("progress: {} books recomputed", stats.len());
    }
    info!(?target, "rebuild finished");

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scope() {
        assert_eq!(parse_scope("all").unwrap(), RollupScope::All);
        assert_eq!(
            parse_scope("municipality:12").unwrap(),
            RollupScope::Municipality(12)
        );
        assert_eq!(parse_scope("level:3").unwrap(), RollupScope::Level(3));
        assert!(parse_scope("level:x").is_err());
        assert!(parse_scope("comarca:3").is_err());
    }
}
