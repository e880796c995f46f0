//! CSV import command.
//!
//! Resolves the template (a stored template id or a model JSON file),
//! opens the store, and runs the ingestion engine over the CSV file.
//! Row errors are written as an error CSV next to the input unless a
//! path is given.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use arxiu_core::achievements::AchievementEvaluator;
use arxiu_core::ingest::errors::write_error_csv;
use arxiu_core::ingest::{ingest, parse_separator, IngestOutcome, IngestRequest};
use arxiu_core::models::{BookFilter, ModerationStatus};
use arxiu_core::store::Store;
use arxiu_core::template::TemplateProgram;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Where the template of an import comes from.
pub enum TemplateSource {
    Stored(i64),
    File(PathBuf),
}

/// Command-line options of `arxiu import`.
pub struct ImportOptions {
    pub template: TemplateSource,
    pub csv: PathBuf,
    pub separator: Option<String>,
    pub user_id: Option<i64>,
    pub municipality_id: Option<i64>,
    pub archive_id: Option<i64>,
    pub book_id: Option<i64>,
    pub status: Option<String>,
    pub errors_out: Option<PathBuf>,
}

/// Load the program and its preferred separator label.
pub async fn load_program(
    store: &dyn Store,
    source: &TemplateSource,
) -> Result<(TemplateProgram, Option<String>)> {
    match source {
        TemplateSource::Stored(id) => {
            let Some(template) = store.get_template(*id).await? else {
                bail!("template {} not found", id);
            };
            let program = TemplateProgram::from_json(&template.model)
                .with_context(|| format!("Stored template {} is invalid", id))?;
            Ok((program, Some(template.default_separator)))
        }
        TemplateSource::File(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read template: {}", path.display()))?;
            let program = TemplateProgram::from_json_str(&text)
                .with_context(|| format!("Invalid template: {}", path.display()))?;
            Ok((program, None))
        }
    }
}

fn default_errors_path(csv: &Path) -> PathBuf {
    let stem = csv
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "import".to_string());
    csv.with_file_name(format!("{}.errors.csv", stem))
}

pub async fn run_import(config: &Config, opts: ImportOptions) -> Result<IngestOutcome> {
    let size = std::fs::metadata(&opts.csv)
        .with_context(|| format!("Failed to read CSV file: {}", opts.csv.display()))?
        .len();
    if size > config.import.max_upload_bytes {
        bail!(
            "CSV file is {} bytes; the limit is {} (import.max_upload_bytes)",
            size,
            config.import.max_upload_bytes
        );
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let (program, template_separator) = load_program(&store, &opts.template).await?;
    let separator = match opts.separator.as_deref().or(template_separator.as_deref()) {
        Some(label) => parse_separator(label)
            .with_context(|| format!("invalid separator '{}' (expected , ; | \\t)", label))?,
        None => config.import.separator(),
    };
    let default_status = match &opts.status {
        Some(s) => s.parse::<ModerationStatus>().map_err(anyhow::Error::msg)?,
        None => config.import.status(),
    };

    let evaluator = config.achievements.enabled.then(AchievementEvaluator::new);
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current row");
            on_signal.cancel();
        }
    });

    let mut req = IngestRequest::new(&program);
    req.separator = separator;
    req.user_id = opts.user_id;
    req.scope = BookFilter {
        municipality_id: opts.municipality_id,
        archive_id: opts.archive_id,
    };
    req.fixed_book_id = opts.book_id;
    req.default_status = default_status;
    req.achievements = evaluator.as_ref();
    req.cancel = Some(&cancel);

    let file = std::fs::File::open(&opts.csv)
        .with_context(|| format!("Failed to open CSV file: {}", opts.csv.display()))?;
    let outcome = ingest(&store, &req, file).await;
    watcher.abort();

    println!("import {}", opts.csv.display());
    println!("  created: {}", outcome.created);
    println!("  updated: {}", outcome.updated);
    println!("  unchanged: {}", outcome.unchanged);
    println!("  failed: {}", outcome.failed);
    if outcome.cancelled {
        println!("  cancelled: partial result");
    }

    if !outcome.errors.is_empty() {
        let path = opts
            .errors_out
            .clone()
            .unwrap_or_else(|| default_errors_path(&opts.csv));
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create error file: {}", path.display()))?;
        write_error_csv(&outcome.errors, file)?;
        println!("  errors: {}", path.display());
    }
    info!(
        created = outcome.created,
        updated = outcome.updated,
        failed = outcome.failed,
        "import finished"
    );
    println!("ok");

    pool.close().await;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_errors_path() {
        assert_eq!(
            default_errors_path(Path::new("/tmp/llibre.csv")),
            PathBuf::from("/tmp/llibre.errors.csv")
        );
    }
}
