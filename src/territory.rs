//! Territory hierarchy import and export (JSON).

use anyhow::{Context, Result};
use std::path::Path;

use arxiu_core::territory::{self, TerritoryExport};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn run_territory_export(config: &Config, output: Option<&Path>) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let data = territory::export(&store).await?;
    pool.close().await;

    let json = serde_json::to_string_pretty(&data)?;
    match output {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "Exported {} countries, {} levels, {} municipalities to {}",
                data.countries.len(),
                data.levels.len(),
                data.municipalities.len(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

pub async fn run_territory_import(config: &Config, input: &Path) -> Result<()> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let data: TerritoryExport = serde_json::from_str(&text)
        .with_context(|| format!("Invalid territory file: {}", input.display()))?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let report = territory::import(&store, &data).await?;
    pool.close().await;

    println!("territory import {}", input.display());
    println!("  countries: {}", report.countries);
    println!("  levels: {}", report.levels);
    println!("  municipalities: {}", report.municipalities);
    println!("ok");
    Ok(())
}
