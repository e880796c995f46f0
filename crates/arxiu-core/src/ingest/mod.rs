//! Bulk CSV ingestion driven by a compiled template.
//!
//! # Pipeline
//!
//! ```text
//! header row ──▶ resolve_columns ──▶ (missing required? abort, row 0)
//!     │
//!     ▼  for each data row, in file order
//! book lookup ──▶ apply_row ──▶ dedup ──▶ principal check
//!     │                                        │
//!     │                ┌───────────────────────┴──────────┐
//!     ▼                ▼                                  ▼
//!  row error     merge into existing               create record
//!                (fully indexed book)         (+ roll-ups if published)
//!
//! after the last row: recompute indexing progress of every touched book
//! ```
//!
//! [`ingest`] never returns an error: every failure becomes a [`RowError`]
//! with a reason code and a snapshot of the failing fields.

pub mod apply;
pub mod book;
pub mod capacity;
pub mod errors;
pub mod merge;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::Read;

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::achievements::{self, AchievementEvaluator};
use crate::lifecycle::{self, RULE_CREATED};
use crate::models::{
    year_in_range, Book, BookFilter, ModerationStatus, RecordBundle, TranscriptionRecord,
};
use crate::progress;
use crate::store::Store;
use crate::template::condition::RowValues;
use crate::template::program::MergeMode;
use crate::template::TemplateProgram;

use self::apply::{apply_row, resolve_columns, RowDraft};
use self::book::BookResolver;
use self::merge::{merge_into, principal_key, PrincipalIndex};

/// Reason a row (or the whole file, at row 0) was not ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorCode {
    #[error("falta una columna obligatòria")]
    MissingRequiredColumn,
    #[error("CSV no vàlid")]
    InvalidCsv,
    #[error("llibre no trobat")]
    BookNotFound,
    #[error("llibre ambigu")]
    BookAmbiguous,
    #[error("el llibre no coincideix")]
    BookMismatch,
    #[error("fila duplicada")]
    DuplicateRow,
    #[error("persona principal duplicada")]
    DuplicatePrincipal,
    #[error("any fora de rang")]
    InvalidYear,
    #[error("no s'ha pogut crear")]
    CreateFailed,
    #[error("no s'ha pogut actualitzar")]
    UpdateFailed,
    #[error("importació cancel·lada")]
    Cancelled,
}

impl RowErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowErrorCode::MissingRequiredColumn => "missing_required_column",
            RowErrorCode::InvalidCsv => "invalid_csv",
            RowErrorCode::BookNotFound => "book_not_found",
            RowErrorCode::BookAmbiguous => "book_ambiguous",
            RowErrorCode::BookMismatch => "book_mismatch",
            RowErrorCode::DuplicateRow => "duplicate_row",
            RowErrorCode::DuplicatePrincipal => "duplicate_principal",
            RowErrorCode::InvalidYear => "invalid_year",
            RowErrorCode::CreateFailed => "create_failed",
            RowErrorCode::UpdateFailed => "update_failed",
            RowErrorCode::Cancelled => "cancelled",
        }
    }
}

/// One reported row failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    /// File line number (header = 1); 0 for whole-file errors.
    pub row: u64,
    pub code: RowErrorCode,
    pub message: String,
    /// Failing field snapshot.
    pub fields: BTreeMap<String, String>,
}

impl RowError {
    pub fn new(row: u64, code: RowErrorCode) -> Self {
        Self {
            row,
            code,
            message: code.to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_detail(mut self, detail: impl std::fmt::Display) -> Self {
        self.message = format!("{}: {}", self.code, detail);
        self
    }

    fn with_snapshot(mut self, row: &RowValues) -> Self {
        for (k, v) in row.snapshot() {
            if !k.is_empty() {
                self.fields.insert(k, v);
            }
        }
        self
    }
}

/// Parse a CSV separator label: `,` `;` `|`, or `\t` / `tab`.
pub fn parse_separator(label: &str) -> Option<u8> {
    match label {
        "," => Some(b','),
        ";" => Some(b';'),
        "|" => Some(b'|'),
        "\t" | "\\t" | "tab" => Some(b'\t'),
        _ => None,
    }
}

/// Parameters of one ingestion run.
pub struct IngestRequest<'a> {
    pub program: &'a TemplateProgram,
    pub separator: u8,
    pub user_id: Option<i64>,
    /// Books eligible for lookup.
    pub scope: BookFilter,
    /// Send every row to this book; the book column must agree if present.
    pub fixed_book_id: Option<i64>,
    /// Status of created records when the template sets none.
    pub default_status: ModerationStatus,
    pub achievements: Option<&'a AchievementEvaluator>,
    pub cancel: Option<&'a CancellationToken>,
}

impl<'a> IngestRequest<'a> {
    pub fn new(program: &'a TemplateProgram) -> Self {
        Self {
            program,
            separator: b';',
            user_id: None,
            scope: BookFilter::default(),
            fixed_book_id: None,
            default_status: ModerationStatus::Pending,
            achievements: None,
            cancel: None,
        }
    }
}

/// Result of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub created: usize,
    pub updated: usize,
    /// Rows merged into an existing record without any change.
    pub unchanged: usize,
    pub failed: usize,
    pub errors: Vec<RowError>,
    pub touched_books: BTreeSet<i64>,
    pub cancelled: bool,
}

impl IngestOutcome {
    fn fail(&mut self, error: RowError) {
        debug!(row = error.row, code = error.code.as_str(), "row rejected");
        self.failed += 1;
        self.errors.push(error);
    }

    fn abort(mut self, error: RowError) -> Self {
        warn!(code = error.code.as_str(), message = %error.message, "import aborted");
        self.errors.push(error);
        self
    }
}

/// Insert a record with its persons and attributes. Returns the record id.
pub(crate) async fn insert_bundle(store: &dyn Store, bundle: &mut RecordBundle) -> Result<i64> {
    let id = store.insert_record(&bundle.record).await?;
    bundle.record.id = id;
    for p in &mut bundle.persons {
        p.record_id = id;
        p.id = store.insert_person(p).await?;
    }
    for a in &mut bundle.attributes {
        a.record_id = id;
        a.id = store.insert_attribute(a).await?;
    }
    Ok(id)
}

/// Header of a record about to be created from `draft`.
fn new_record(draft: &RowDraft, book: &Book, status: ModerationStatus, user_id: Option<i64>) -> TranscriptionRecord {
    use chrono::Datelike;
    let now = chrono::Utc::now().timestamp();
    let mut record = draft.record.clone();
    record.id = 0;
    record.book_id = book.id;
    record.status = status;
    record.created_by = user_id;
    record.created_at = now;
    record.updated_at = now;
    if record.document_year.is_none() {
        record.document_year = record.act_date.map(|d| d.year()).filter(|y| year_in_range(*y));
    }
    record.settle_date_quality();
    record
}

fn dedup_key(keys: &[String], row: &RowValues, draft: &RowDraft) -> String {
    keys.iter()
        .map(|k| {
            row.get(k)
                .or_else(|| draft.mapped.get(k).map(String::as_str))
                .unwrap_or("")
                .trim()
                .to_lowercase()
        })
        .collect::<Vec<_>>()
        .join("|")
}

struct RunState {
    outcome: IngestOutcome,
    seen_rows: HashMap<String, u64>,
    seen_principals: HashSet<(i64, String)>,
    principals: PrincipalIndex,
}

/// Ingest one CSV file.
pub async fn ingest<R: Read>(store: &dyn Store, req: &IngestRequest<'_>, reader: R) -> IngestOutcome {
    let program = req.program;
    let mut state = RunState {
        outcome: IngestOutcome::default(),
        seen_rows: HashMap::new(),
        seen_principals: HashSet::new(),
        principals: PrincipalIndex::new(),
    };

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(req.separator)
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let mut records = rdr.records();

    let headers: Vec<String> = match records.next() {
        Some(Ok(h)) => h.iter().map(str::to_string).collect(),
        Some(Err(e)) => {
            return state
                .outcome
                .abort(RowError::new(0, RowErrorCode::InvalidCsv).with_detail(e))
        }
        None => {
            return state
                .outcome
                .abort(RowError::new(0, RowErrorCode::InvalidCsv).with_detail("fitxer buit"))
        }
    };

    let columns = resolve_columns(program, &headers);
    if !columns.missing_required.is_empty() {
        let missing = columns.missing_required.join(", ");
        return state.outcome.abort(
            RowError::new(0, RowErrorCode::MissingRequiredColumn)
                .with_detail(&missing)
                .with_field("columns", missing.clone()),
        );
    }

    let fixed = match req.fixed_book_id {
        None => None,
        Some(id) => match store.get_book(id).await {
            Ok(Some(b)) => Some(b),
            Ok(None) => {
                return state.outcome.abort(
                    RowError::new(0, RowErrorCode::BookNotFound).with_field("book_id", id.to_string()),
                )
            }
            Err(e) => {
                return state
                    .outcome
                    .abort(RowError::new(0, RowErrorCode::BookNotFound).with_detail(e))
            }
        },
    };
    let books = match BookResolver::load(store, &program.book, &req.scope, fixed).await {
        Ok(b) => b,
        Err(e) => {
            return state
                .outcome
                .abort(RowError::new(0, RowErrorCode::BookNotFound).with_detail(e))
        }
    };

    for result in records {
        if req.cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
            state.outcome.cancelled = true;
            state.outcome.errors.push(RowError::new(0, RowErrorCode::Cancelled));
            info!("import cancelled, returning partial outcome");
            break;
        }
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                state
                    .outcome
                    .fail(RowError::new(line, RowErrorCode::InvalidCsv).with_detail(e));
                continue;
            }
        };
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let values: Vec<String> = record.iter().map(str::to_string).collect();
        if values.iter().all(|v| v.trim().is_empty()) {
            continue;
        }
        let row = RowValues::new(&headers, values);
        process_row(store, req, &books, &columns, &mut state, line, &row).await;
    }

    for book_id in &state.outcome.touched_books {
        let Some(book) = books.book(*book_id) else {
            continue;
        };
        if let Err(e) = progress::recompute_book(store, book).await {
            warn!(book_id, error = %e, "indexing progress recompute failed");
        }
    }

    let o = &state.outcome;
    info!(
        created = o.created,
        updated = o.updated,
        unchanged = o.unchanged,
        failed = o.failed,
        books = o.touched_books.len(),
        "import finished"
    );
    state.outcome
}

#[allow(clippy::too_many_arguments)]
async fn process_row(
    store: &dyn Store,
    req: &IngestRequest<'_>,
    books: &BookResolver,
    columns: &apply::ResolvedColumns,
    state: &mut RunState,
    line: u64,
    row: &RowValues,
) {
    let program = req.program;
    let book_column = &program.book.column;
    let raw_book = row.get(book_column).unwrap_or("");
    let book = match books.resolve(raw_book) {
        Ok(b) => b,
        Err(code) => {
            state
                .outcome
                .fail(RowError::new(line, code).with_field(book_column.clone(), raw_book));
            return;
        }
    };

    let draft = apply_row(program, columns, row);
    if let Some(issue) = &draft.invalid_year {
        state.outcome.fail(
            RowError::new(line, RowErrorCode::InvalidYear)
                .with_field(issue.target.clone(), issue.value.clone()),
        );
        return;
    }

    let keys = &program.policies.dedup_keys;
    if !keys.is_empty() {
        let key = dedup_key(keys, row, &draft);
        if let Some(first) = state.seen_rows.get(&key) {
            state.outcome.fail(
                RowError::new(line, RowErrorCode::DuplicateRow)
                    .with_field("duplicate_row", first.to_string()),
            );
            return;
        }
        state.seen_rows.insert(key, line);
    }

    let policy = &program.policies.merge;
    let pkey = principal_key(&draft.persons, &policy.principal_roles);
    if policy.avoid_duplicate_principal {
        if let Some(k) = &pkey {
            if !state.seen_principals.insert((book.id, k.clone())) {
                state.outcome.fail(
                    RowError::new(line, RowErrorCode::DuplicatePrincipal).with_field("principal", k.clone()),
                );
                return;
            }
        }
    }

    if book.fully_indexed && policy.mode == MergeMode::ByPrincipalPersonIfBookIndexed {
        if let Some(k) = &pkey {
            let existing = match state
                .principals
                .lookup(store, book.id, &policy.principal_roles, k)
                .await
            {
                Ok(found) => found,
                Err(e) => {
                    state.outcome.fail(
                        RowError::new(line, RowErrorCode::UpdateFailed)
                            .with_detail(e)
                            .with_snapshot(row),
                    );
                    return;
                }
            };
            if let Some(existing_id) = existing {
                if merge_row(store, program, book, existing_id, &draft, state, line, row).await {
                    return;
                }
            }
        }
    }

    create_row(store, req, book, draft, pkey, state, line, row).await;
}

/// Merge into `existing_id`. Returns false when the record vanished and
/// the row should be created instead.
async fn merge_row(
    store: &dyn Store,
    program: &TemplateProgram,
    book: &Book,
    existing_id: i64,
    draft: &RowDraft,
    state: &mut RunState,
    line: u64,
    row: &RowValues,
) -> bool {
    let existing = match store.load_bundle(existing_id).await {
        Ok(Some(b)) => b,
        Ok(None) => return false,
        Err(e) => {
            state.outcome.fail(
                RowError::new(line, RowErrorCode::UpdateFailed)
                    .with_detail(e)
                    .with_snapshot(row),
            );
            return true;
        }
    };
    match merge_into(store, &existing, draft, &program.policies.merge).await {
        Ok(changes) if changes.changed() => {
            state.outcome.updated += 1;
            state.outcome.touched_books.insert(book.id);
            debug!(row = line, record = existing_id, ?changes, "row merged");
            if existing.record.status.is_published() {
                republish_merged(store, book, &existing).await;
            }
        }
        Ok(_) => {
            state.outcome.unchanged += 1;
            debug!(row = line, record = existing_id, "row matched, nothing to merge");
        }
        Err(e) => {
            warn!(row = line, record = existing_id, error = %e, "merge failed");
            state.outcome.fail(
                RowError::new(line, RowErrorCode::UpdateFailed)
                    .with_detail(e)
                    .with_snapshot(row),
            );
        }
    }
    true
}

/// Swap the counters and search document of a published record from its
/// pre-merge contents to the merged ones.
async fn republish_merged(store: &dyn Store, book: &Book, before: &RecordBundle) {
    let record_id = before.record.id;
    lifecycle::apply_delta(store, book, before, -1).await;
    match store.load_bundle(record_id).await {
        Ok(Some(after)) => lifecycle::apply_delta(store, book, &after, 1).await,
        Ok(None) => warn!(record = record_id, "merged record vanished before re-publishing"),
        Err(e) => warn!(record = record_id, error = %e, "failed to reload merged record"),
    }
}

#[allow(clippy::too_many_arguments)]
async fn create_row(
    store: &dyn Store,
    req: &IngestRequest<'_>,
    book: &Book,
    draft: RowDraft,
    principal: Option<String>,
    state: &mut RunState,
    line: u64,
    row: &RowValues,
) {
    let status = req
        .program
        .policies
        .moderation_status
        .unwrap_or(req.default_status);
    let record = new_record(&draft, book, status, req.user_id);
    let mut bundle = RecordBundle {
        record,
        persons: draft.persons,
        attributes: draft.attributes,
    };
    let id = match insert_bundle(store, &mut bundle).await {
        Ok(id) => id,
        Err(e) => {
            warn!(row = line, error = %e, "record creation failed");
            state.outcome.fail(
                RowError::new(line, RowErrorCode::CreateFailed)
                    .with_detail(e)
                    .with_snapshot(row),
            );
            return;
        }
    };
    state.outcome.created += 1;
    state.outcome.touched_books.insert(book.id);
    if let Some(k) = principal {
        state.principals.insert(book.id, k, id);
    }
    debug!(row = line, record = id, book_id = book.id, "record created");

    if status.is_published() {
        lifecycle::apply_delta(store, book, &bundle, 1).await;
    }
    if let Some(user) = req.user_id {
        let activity = achievements::activity(user, RULE_CREATED, "crear", "registre", id, 1, status.as_str());
        if let Err(e) = achievements::record_activity(store, req.achievements, &activity).await {
            warn!(record = id, error = %e, "failed to log creation activity");
        }
    }
}
