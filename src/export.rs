//! Export transcription records as CSV.
//!
//! One line per record, with the principal persons flattened into
//! display columns. Writes to a file when `--output` is given, otherwise
//! to stdout for piping.

use anyhow::{Context, Result};
use std::path::Path;

use arxiu_core::export::write_records_csv;
use arxiu_core::models::{ModerationStatus, RecordFilter};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn run_export(
    config: &Config,
    book_id: Option<i64>,
    municipality_id: Option<i64>,
    status: Option<&str>,
    literal: bool,
    output: Option<&Path>,
) -> Result<()> {
    let status = status
        .map(|s| s.parse::<ModerationStatus>().map_err(anyhow::Error::msg))
        .transpose()?;
    let filter = RecordFilter {
        book_id,
        status,
        municipality_id,
    };

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let n = write_records_csv(&store, &filter, literal, file).await?;
            eprintln!("Exported {} records to {}", n, path.display());
        }
        None => {
            let stdout = std::io::stdout();
            write_records_csv(&store, &filter, literal, stdout.lock()).await?;
        }
    }

    pool.close().await;
    Ok(())
}
