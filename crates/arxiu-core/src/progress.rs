//! Per-book indexing progress.
//!
//! Every book type maps to a fixed schema of content fields. For each
//! published record of a book the calculator counts the schema fields that
//! carry a value; the percentage is `round(filled * 100 / total)` clamped
//! to `[0, 100]`.

use std::collections::HashMap;

use anyhow::Result;
use tracing::debug;

use crate::models::{
    Book, BookIndexingStats, ModerationStatus, PersonField, RecordBundle, RecordFilter,
};
use crate::store::Store;
use crate::template::catalog::CatalogKind;
use crate::template::program::BaseField;

/// One content field of a progress schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaField {
    Base(BaseField),
    Person { role: &'static str, field: PersonField },
    Attr(&'static str),
}

const HEADER: [BaseField; 3] = [BaseField::PageLabel, BaseField::DocumentYear, BaseField::ActDate];

fn persons(out: &mut Vec<SchemaField>, role: &'static str, fields: &[PersonField]) {
    for f in fields {
        out.push(SchemaField::Person { role, field: *f });
    }
}

const FULL_NAME: [PersonField; 3] = [
    PersonField::GivenName,
    PersonField::Surname1,
    PersonField::Surname2,
];
const SHORT_NAME: [PersonField; 2] = [PersonField::GivenName, PersonField::Surname1];

/// Content fields of a book type. Quality fields are never part of it.
pub fn schema_for(book_type: &str) -> Vec<SchemaField> {
    let kind = book_type.parse::<CatalogKind>().unwrap_or(CatalogKind::Generic);
    let mut out: Vec<SchemaField> = HEADER.iter().copied().map(SchemaField::Base).collect();
    match kind {
        CatalogKind::Baptism => {
            persons(&mut out, "batejat", &[PersonField::GivenName, PersonField::Surname1, PersonField::Surname2, PersonField::Sex]);
            persons(&mut out, "pare", &SHORT_NAME);
            persons(&mut out, "mare", &SHORT_NAME);
            persons(&mut out, "padri", &[PersonField::GivenName]);
            persons(&mut out, "padrina", &[PersonField::GivenName]);
            out.push(SchemaField::Attr("data_naixement"));
        }
        CatalogKind::Marriage => {
            persons(&mut out, "nuvi", &FULL_NAME);
            persons(&mut out, "novia", &FULL_NAME);
            persons(&mut out, "pare_nuvi", &[PersonField::GivenName]);
            persons(&mut out, "pare_novia", &[PersonField::GivenName]);
            out.push(SchemaField::Attr("ordre_matrimoni"));
        }
        CatalogKind::Death => {
            persons(&mut out, "difunt", &[PersonField::GivenName, PersonField::Surname1, PersonField::Surname2, PersonField::Age, PersonField::CivilStatus]);
            out.push(SchemaField::Attr("data_defuncio"));
            out.push(SchemaField::Attr("causa_defuncio"));
        }
        CatalogKind::Census => {
            persons(&mut out, "cap_familia", &[PersonField::GivenName, PersonField::Surname1, PersonField::Surname2, PersonField::Age, PersonField::Occupation]);
            out.push(SchemaField::Attr("adreca"));
        }
        CatalogKind::Recruitment => {
            persons(&mut out, "recluta", &[PersonField::GivenName, PersonField::Surname1, PersonField::Surname2, PersonField::Age]);
            out.push(SchemaField::Attr("lleva"));
            out.push(SchemaField::Attr("resultat"));
        }
        CatalogKind::Generic => {
            out.push(SchemaField::Base(BaseField::Literal));
        }
    }
    out
}

fn base_filled(bundle: &RecordBundle, field: BaseField) -> bool {
    let r = &bundle.record;
    match field {
        BaseField::PageLabel => !r.page_label.trim().is_empty(),
        BaseField::PagePosition => r.page_position.is_some(),
        BaseField::DocumentYear => r.document_year.is_some(),
        BaseField::ActDate => r.act_date.is_some() || !r.act_date_text.trim().is_empty(),
        BaseField::ActDateText => !r.act_date_text.trim().is_empty(),
        BaseField::ActDateQuality => r.act_date_quality.is_some(),
        BaseField::Literal => !r.literal.trim().is_empty(),
        BaseField::Marginalia => !r.marginalia.trim().is_empty(),
        BaseField::RecordType => true,
    }
}

/// Number of schema fields with a value in `bundle`.
pub fn filled_fields(schema: &[SchemaField], bundle: &RecordBundle) -> i64 {
    schema
        .iter()
        .filter(|f| match f {
            SchemaField::Base(b) => base_filled(bundle, *b),
            SchemaField::Person { role, field } => bundle
                .persons
                .iter()
                .any(|p| p.role == *role && !p.field(*field).is_empty()),
            SchemaField::Attr(key) => bundle
                .attributes
                .iter()
                .any(|a| a.key == *key && a.has_value()),
        })
        .count() as i64
}

/// `round(filled * 100 / total)` clamped to `[0, 100]`; 0 when empty.
pub fn percentage(filled: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    ((filled as f64 * 100.0 / total as f64).round() as i64).clamp(0, 100)
}

/// Recompute and persist the indexing stats of one book.
pub async fn recompute_book(store: &dyn Store, book: &Book) -> Result<BookIndexingStats> {
    let schema = schema_for(&book.book_type);
    let records = store
        .list_records(&RecordFilter {
            book_id: Some(book.id),
            status: Some(ModerationStatus::Published),
            ..Default::default()
        })
        .await?;
    let mut filled = 0;
    let mut total_records = 0;
    for r in records {
        if let Some(bundle) = store.load_bundle(r.id).await? {
            filled += filled_fields(&schema, &bundle);
            total_records += 1;
        }
    }
    let total_fields = schema.len() as i64 * total_records;
    let stats = BookIndexingStats {
        book_id: book.id,
        total_records,
        total_fields,
        filled_fields: filled,
        percentage: percentage(filled, total_fields),
        computed_at: chrono::Utc::now().timestamp(),
    };
    store.save_book_stats(&stats).await?;
    debug!(
        book_id = book.id,
        records = total_records,
        percentage = stats.percentage,
        "indexing progress recomputed"
    );
    Ok(stats)
}

/// Recompute several books, looking each one up once.
pub async fn recompute_books(
    store: &dyn Store,
    book_ids: impl IntoIterator<Item = i64>,
) -> Result<HashMap<i64, BookIndexingStats>> {
    let mut out = HashMap::new();
    for id in book_ids {
        if out.contains_key(&id) {
            continue;
        }
        if let Some(book) = store.get_book(id).await? {
            out.insert(id, recompute_book(store, &book).await?);
        }
    }
    Ok(out)
}
