//! Denormalized counters maintained from record state transitions.
//!
//! Every change of a record's moderation status yields a signed delta
//! ([`transition_delta`]). A non-zero delta is fanned out to:
//!
//! - **demography**: `(municipality, year, bucket)` plus the same key for
//!   each administrative ancestor of the municipality;
//! - **name/surname frequency**: per `(entity, scope, year)` and per
//!   `(entity, scope)` total, for the principal persons' usable names.
//!
//! [`rebuild`] clears a scope and replays every published record with
//! `+1`; it is idempotent.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::models::{
    year_in_range, Book, CounterScope, ModerationStatus, NameKind, QualifiedText, RecordBundle,
    RecordFilter,
};
use crate::normalize::{
    canonical_given_name_key, canonical_surname_key, sanitize_name_literal,
    sanitize_surname_literal,
};
use crate::store::Store;

/// `+1` entering `published`, `-1` leaving it, `0` otherwise.
pub fn transition_delta(old: ModerationStatus, new: ModerationStatus) -> i64 {
    match (old.is_published(), new.is_published()) {
        (false, true) => 1,
        (true, false) => -1,
        _ => 0,
    }
}

/// Which counter scopes a delta is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RollupScope {
    /// The municipality and every ancestor level.
    All,
    /// Only the municipality's own rows.
    Municipality(i64),
    /// Only one administrative level's rows.
    Level(i64),
}

impl RollupScope {
    fn admits(&self, scope: CounterScope) -> bool {
        match self {
            RollupScope::All => true,
            RollupScope::Municipality(id) => scope == CounterScope::Municipality(*id),
            RollupScope::Level(id) => scope == CounterScope::Level(*id),
        }
    }

    fn counter_scope(&self) -> Option<CounterScope> {
        match self {
            RollupScope::All => None,
            RollupScope::Municipality(id) => Some(CounterScope::Municipality(*id)),
            RollupScope::Level(id) => Some(CounterScope::Level(*id)),
        }
    }
}

/// Counter scopes a municipality contributes to.
async fn scopes_for(store: &dyn Store, municipality_id: i64, filter: RollupScope) -> Result<Vec<CounterScope>> {
    let mut scopes = vec![CounterScope::Municipality(municipality_id)];
    for level in store.admin_ancestors(municipality_id).await? {
        scopes.push(CounterScope::Level(level));
    }
    scopes.retain(|s| filter.admits(*s));
    Ok(scopes)
}

/// A name's literal is countable when its quality is usable, it carries no
/// doubt marker, and it survives the sanitizer.
fn usable_literal(text: &QualifiedText, sanitize: fn(&str) -> String) -> Option<String> {
    if text.quality.map(|q| q.is_unusable()).unwrap_or(false) {
        return None;
    }
    if text.value.contains('?') || text.value.contains('¿') {
        return None;
    }
    let clean = sanitize(&text.value);
    (!clean.is_empty()).then_some(clean)
}

/// Apply `delta` for one record to every scope admitted by `filter`.
pub async fn apply_record_delta_scoped(
    store: &dyn Store,
    book: &Book,
    bundle: &RecordBundle,
    delta: i64,
    filter: RollupScope,
) -> Result<()> {
    if delta == 0 {
        return Ok(());
    }
    let Some(municipality_id) = book.municipality_id.filter(|m| *m > 0) else {
        debug!(record = bundle.record.id, "record without municipality, no roll-ups");
        return Ok(());
    };
    let scopes = scopes_for(store, municipality_id, filter).await?;
    if scopes.is_empty() {
        return Ok(());
    }
    let record = &bundle.record;
    let year = record.effective_year().filter(|y| year_in_range(*y));

    if let (Some(bucket), Some(year)) = (record.record_type.demography_bucket(), year) {
        for scope in &scopes {
            store
                .apply_demography_delta(*scope, year, bucket, delta)
                .await?;
        }
    }

    let roles = record.record_type.principal_roles();
    for person in bundle.persons.iter().filter(|p| roles.contains(&p.role.as_str())) {
        if let Some(given) = usable_literal(&person.given_name, sanitize_name_literal) {
            let key = canonical_given_name_key(&given);
            let id = store.find_or_create_given_name(&key, &given).await?;
            for scope in &scopes {
                store
                    .apply_frequency_delta(NameKind::Given, id, *scope, year, delta)
                    .await?;
            }
        }
        for surname in [&person.surname1, &person.surname2] {
            let Some(form) = usable_literal(surname, sanitize_surname_literal) else {
                continue;
            };
            let key = canonical_surname_key(&form);
            let id = match store.find_cognom_by_key(&key).await? {
                Some(c) => c.id,
                None => store.create_cognom(&form, &key).await?.id,
            };
            for scope in &scopes {
                store
                    .apply_frequency_delta(NameKind::Surname, id, *scope, year, delta)
                    .await?;
            }
        }
    }
    Ok(())
}

/// Apply `delta` for one record to the municipality and all its ancestors.
pub async fn apply_record_delta(
    store: &dyn Store,
    book: &Book,
    bundle: &RecordBundle,
    delta: i64,
) -> Result<()> {
    apply_record_delta_scoped(store, book, bundle, delta, RollupScope::All).await
}

/// Summary of a [`rebuild`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub records: usize,
    pub failed: usize,
}

/// Clear the demography and frequency counters of `scope` and replay every
/// published record contributing to it.
pub async fn rebuild(store: &dyn Store, scope: RollupScope) -> Result<RebuildReport> {
    store.clear_demography(scope.counter_scope()).await?;
    store.clear_frequencies(scope.counter_scope()).await?;

    let municipalities: Option<Vec<i64>> = match scope {
        RollupScope::All => None,
        RollupScope::Municipality(id) => Some(vec![id]),
        RollupScope::Level(id) => Some(store.municipalities_in_level(id).await?),
    };

    let records = store
        .list_records(&RecordFilter {
            status: Some(ModerationStatus::Published),
            ..Default::default()
        })
        .await?;

    let mut report = RebuildReport::default();
    let mut books = std::collections::HashMap::new();
    for r in records {
        if !books.contains_key(&r.book_id) {
            let book = store.get_book(r.book_id).await?;
            books.insert(r.book_id, book);
        }
        let Some(Some(book)) = books.get(&r.book_id) else {
            warn!(record = r.id, book = r.book_id, "record references a missing book");
            report.failed += 1;
            continue;
        };
        if let Some(ids) = &municipalities {
            if !book.municipality_id.map(|m| ids.contains(&m)).unwrap_or(false) {
                continue;
            }
        }
        let bundle = match store.load_bundle(r.id).await {
            Ok(Some(b)) => b,
            Ok(None) => continue,
            Err(e) => {
                warn!(record = r.id, error = %e, "failed to load record during rebuild");
                report.failed += 1;
                continue;
            }
        };
        match apply_record_delta_scoped(store, book, &bundle, 1, scope).await {
            Ok(()) => report.records += 1,
            Err(e) => {
                warn!(record = r.id, error = %e, "failed to replay record during rebuild");
                report.failed += 1;
            }
        }
    }
    info!(
        records = report.records,
        failed = report.failed,
        "roll-up rebuild complete"
    );
    Ok(report)
}
