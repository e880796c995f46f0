//! Import template commands: registry management, validation, similarity
//! ranking and sample generation.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use arxiu_core::ingest::parse_separator;
use arxiu_core::models::{Book, ImportTemplate, Visibility};
use arxiu_core::similarity::rank_similar;
use arxiu_core::store::Store;
use arxiu_core::template::registry::{
    can_clone, can_edit, clone_template, create_template, get_visible, list_visible,
    update_template, TemplateDraft,
};
use arxiu_core::template::sample::sample_table;
use arxiu_core::template::TemplateProgram;

use crate::config::Config;
use crate::db;
use crate::import::{load_program, TemplateSource};
use crate::sqlite_store::SqliteStore;
use crate::xlsx;

/// Options shared by `template add` and `template update`.
pub struct DraftOptions {
    pub model: PathBuf,
    pub name: String,
    pub description: Option<String>,
    pub visibility: String,
    pub separator: Option<String>,
}

fn read_model(path: &Path) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read template: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON: {}", path.display()))
}

fn draft(config: &Config, opts: DraftOptions) -> Result<TemplateDraft> {
    Ok(TemplateDraft {
        model: read_model(&opts.model)?,
        name: opts.name,
        description: opts.description.unwrap_or_default(),
        visibility: opts
            .visibility
            .parse::<Visibility>()
            .map_err(anyhow::Error::msg)?,
        default_separator: opts
            .separator
            .unwrap_or_else(|| config.import.default_separator.clone()),
    })
}

fn print_template(t: &ImportTemplate, viewer: Option<i64>) {
    println!(
        "{:>5}  {:<32} {:<8} sep={:<3} {}{}",
        t.id,
        t.name,
        t.visibility.as_str(),
        t.default_separator.replace('\t', "\\t"),
        &t.signature[..12.min(t.signature.len())],
        if can_edit(t, viewer) { "  (own)" } else { "" }
    );
}

pub async fn run_add(config: &Config, owner: Option<i64>, opts: DraftOptions) -> Result<()> {
    let draft = draft(config, opts)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let t = create_template(&store, owner, draft).await?;
    pool.close().await;
    println!("template {} created: {}", t.id, t.name);
    Ok(())
}

pub async fn run_update(
    config: &Config,
    id: i64,
    actor: Option<i64>,
    opts: DraftOptions,
) -> Result<()> {
    let draft = draft(config, opts)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let t = update_template(&store, id, actor, draft).await?;
    pool.close().await;
    println!("template {} updated: {}", t.id, t.name);
    Ok(())
}

pub async fn run_list(config: &Config, viewer: Option<i64>) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let templates = list_visible(&store, viewer).await?;
    pool.close().await;

    if templates.is_empty() {
        println!("No templates.");
        return Ok(());
    }
    println!(
        "{:>5}  {:<32} {:<8} {:<7} {}",
        "ID", "NAME", "VISIB.", "SEP", "SIGNATURE"
    );
    for t in &templates {
        print_template(t, viewer);
    }
    Ok(())
}

pub async fn run_show(config: &Config, id: i64, viewer: Option<i64>) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let found = get_visible(&store, id, viewer).await?;
    pool.close().await;

    let Some(t) = found else {
        bail!("template {} not found", id);
    };
    println!("id: {}", t.id);
    println!("name: {}", t.name);
    if !t.description.is_empty() {
        println!("description: {}", t.description);
    }
    println!("visibility: {}", t.visibility.as_str());
    println!("separator: {}", t.default_separator.replace('\t', "\\t"));
    println!("signature: {}", t.signature);
    println!("can_edit: {}", can_edit(&t, viewer));
    println!("can_clone: {}", can_clone(&t, viewer));
    println!("{}", serde_json::to_string_pretty(&t.model)?);
    Ok(())
}

/// Compile a model file and summarize it. Needs no database.
pub fn run_validate(path: &Path) -> Result<()> {
    let model = read_model(path)?;
    let program = TemplateProgram::from_json(&model)
        .with_context(|| format!("Invalid template: {}", path.display()))?;

    println!("template {}", path.display());
    println!("  kind: {}", program.kind);
    println!("  catalog: {}", program.catalog.as_str());
    println!(
        "  book: {} by {}",
        program.book.column,
        program.book.mode.as_str()
    );
    println!("  columns: {}", program.columns.len());
    println!("  merge: {}", program.policies.merge.mode.as_str());
    if !program.policies.dedup_keys.is_empty() {
        println!("  dedup: {}", program.policies.dedup_keys.join(", "));
    }
    println!("ok");
    Ok(())
}

pub async fn run_similar(
    config: &Config,
    source: TemplateSource,
    viewer: Option<i64>,
    limit: usize,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let exclude = match &source {
        TemplateSource::Stored(id) => Some(*id),
        TemplateSource::File(_) => None,
    };
    let (program, _) = load_program(&store, &source).await?;
    let ranked = rank_similar(&store, &program, viewer, exclude, limit).await?;
    pool.close().await;

    if ranked.is_empty() {
        println!("No similar templates.");
        return Ok(());
    }
    for (i, s) in ranked.iter().enumerate() {
        let mut flags = Vec::new();
        if s.can_edit {
            flags.push("edit");
        }
        if s.can_clone {
            flags.push("clone");
        }
        println!(
            "{}. [{:.2}] {} {}  ({})",
            i + 1,
            s.score,
            s.template_id,
            s.name,
            flags.join(", ")
        );
    }
    Ok(())
}

pub async fn run_clone(config: &Config, id: i64, viewer: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let t = clone_template(&store, id, viewer).await?;
    pool.close().await;
    println!("template {} cloned as {}: {}", id, t.id, t.name);
    Ok(())
}

/// Output format of `template sample`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SampleFormat {
    Csv,
    Xlsx,
}

pub async fn run_sample(
    config: &Config,
    source: TemplateSource,
    book_id: Option<i64>,
    format: SampleFormat,
    output: Option<&Path>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let (program, separator_label) = load_program(&store, &source).await?;
    let book = match book_id {
        Some(id) => match store.get_book(id).await? {
            Some(b) => b,
            None => bail!("book {} not found", id),
        },
        None => Book {
            id: 1,
            chronology: "1801-1820".to_string(),
            ..Default::default()
        },
    };
    pool.close().await;

    let table = sample_table(&program, &book);
    match format {
        SampleFormat::Csv => {
            let separator = separator_label
                .as_deref()
                .and_then(parse_separator)
                .unwrap_or_else(|| config.import.separator());
            let csv = table.to_csv(separator)?;
            match output {
                Some(path) => {
                    std::fs::write(path, csv)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    eprintln!("Sample written to {}", path.display());
                }
                None => print!("{}", csv),
            }
        }
        SampleFormat::Xlsx => {
            let Some(path) = output else {
                bail!("--output is required for xlsx samples");
            };
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            xlsx::write_xlsx(&table, file)?;
            eprintln!("Sample written to {}", path.display());
        }
    }
    Ok(())
}
