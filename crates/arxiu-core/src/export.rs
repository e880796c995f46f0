//! CSV export of transcription records.
//!
//! One line per record, with the principal and the usual relatives
//! flattened into display-name columns. The literal transcription is
//! appended as a last column only on request.

use std::io::Write;

use anyhow::Result;

use crate::models::{RecordBundle, RecordFilter, TranscriptionPerson};
use crate::normalize::collapse_whitespace;
use crate::store::Store;

pub const HEADER: [&str; 17] = [
    "id",
    "book_id",
    "record_type",
    "status",
    "page",
    "page_position",
    "document_year",
    "act_date",
    "act_date_text",
    "act_date_quality",
    "subject",
    "father",
    "mother",
    "partner",
    "husband",
    "wife",
    "witnesses",
];

/// Name of the optional trailing column.
pub const LITERAL_COLUMN: &str = "literal";

/// `given surname1 surname2`, whitespace collapsed.
pub fn display_name(p: &TranscriptionPerson) -> String {
    collapse_whitespace(&format!(
        "{} {} {}",
        p.given_name.value, p.surname1.value, p.surname2.value
    ))
}

fn by_role(bundle: &RecordBundle, roles: &[&str]) -> Vec<String> {
    bundle
        .persons
        .iter()
        .filter(|p| roles.contains(&p.role.as_str()))
        .map(display_name)
        .filter(|n| !n.is_empty())
        .collect()
}

fn first(names: Vec<String>) -> String {
    names.into_iter().next().unwrap_or_default()
}

/// Fields of one record line, in [`HEADER`] order.
pub fn record_row(bundle: &RecordBundle, literal: bool) -> Vec<String> {
    let r = &bundle.record;
    let opt = |v: Option<String>| v.unwrap_or_default();
    let mut row = vec![
        r.id.to_string(),
        r.book_id.to_string(),
        r.record_type.to_string(),
        r.status.to_string(),
        r.page_label.clone(),
        opt(r.page_position.map(|p| p.to_string())),
        opt(r.document_year.map(|y| y.to_string())),
        opt(r.act_date.map(|d| d.format("%Y-%m-%d").to_string())),
        r.act_date_text.clone(),
        opt(r.act_date_quality.map(|q| q.to_string())),
        bundle.principal().map(display_name).unwrap_or_default(),
        first(by_role(bundle, &["pare"])),
        first(by_role(bundle, &["mare"])),
        first(by_role(bundle, &["conjuge"])),
        first(by_role(bundle, &["nuvi"])),
        first(by_role(bundle, &["novia"])),
        by_role(bundle, &["testimoni"]).join("; "),
    ];
    if literal {
        row.push(r.literal.clone());
    }
    row
}

/// Write every record matching `filter`. Returns the number of lines.
pub async fn write_records_csv<W: Write>(
    store: &dyn Store,
    filter: &RecordFilter,
    literal: bool,
    out: W,
) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(out);
    let mut header: Vec<&str> = HEADER.to_vec();
    if literal {
        header.push(LITERAL_COLUMN);
    }
    wtr.write_record(&header)?;
    let mut n = 0;
    for r in store.list_records(filter).await? {
        if let Some(bundle) = store.load_bundle(r.id).await? {
            wtr.write_record(record_row(&bundle, literal))?;
            n += 1;
        }
    }
    wtr.flush()?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QualifiedText, RecordType, TranscriptionRecord};

    fn person(role: &str, given: &str, s1: &str) -> TranscriptionPerson {
        let mut p = TranscriptionPerson::with_role(role);
        p.given_name = QualifiedText::new(given, None);
        p.surname1 = QualifiedText::new(s1, None);
        p
    }

    #[test]
    fn test_marriage_row_flattens_roles() {
        let mut record = TranscriptionRecord::new(2, RecordType::Marriage);
        record.id = 5;
        record.literal = "En Joan...".into();
        let bundle = RecordBundle {
            record,
            persons: vec![
                person("novia", "Maria", "Vidal"),
                person("nuvi", "Joan", "Puig"),
                person("testimoni", "Pau", "Mas"),
                person("testimoni", "Pere", ""),
            ],
            attributes: vec![],
        };
        let row = record_row(&bundle, true);
        assert_eq!(row.len(), HEADER.len() + 1);
        assert_eq!(row[10], "Joan Puig");
        assert_eq!(row[14], "Joan Puig");
        assert_eq!(row[15], "Maria Vidal");
        assert_eq!(row[16], "Pau Mas; Pere");
        assert_eq!(row[17], "En Joan...");
        assert_eq!(record_row(&bundle, false).len(), HEADER.len());
    }
}
