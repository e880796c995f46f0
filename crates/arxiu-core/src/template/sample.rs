//! Example CSV rows a template accepts.
//!
//! The sample carries one row with a plausible value per column, chosen
//! from the column's first target and its transforms, so that ingesting
//! the sample with the same template creates exactly one record.

use anyhow::Result;

use crate::models::{Book, PersonField};
use crate::names::NameOrder;

use super::condition::{normalize_header, ColumnCondition, RowValues};
use super::program::{
    AttrKind, BaseField, BookMode, Branch, BranchGuard, Column, Entry, PersonTargetField, Target,
    TemplateProgram,
};
use super::transform::Transform;

/// Header row plus example rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SampleTable {
    /// Serialize as CSV with the given single-byte separator.
    pub fn to_csv(&self, separator: u8) -> Result<String> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(separator)
            .from_writer(Vec::new());
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        let bytes = wtr.into_inner().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        Ok(String::from_utf8(bytes)?)
    }
}

const SURNAME_FIRST: &str = "Puig Ferrer Joan";
const GIVEN_FIRST: &str = "Joan Puig Ferrer";
const SURNAME_FIRST_PARTNER: &str = "Vidal Soler Maria";
const GIVEN_FIRST_PARTNER: &str = "Maria Vidal Soler";
const SAMPLE_DATE: &str = "12/03/1803";

fn person_sample(transforms: &[Transform]) -> String {
    let order = transforms.iter().rev().find_map(|t| match t {
        Transform::ParsePerson(mode) => Some(mode.order),
        _ => None,
    });
    let (one, two) = match order {
        Some(NameOrder::GivenFirst) => (GIVEN_FIRST, GIVEN_FIRST_PARTNER),
        _ => (SURNAME_FIRST, SURNAME_FIRST_PARTNER),
    };
    let couple = transforms
        .iter()
        .any(|t| matches!(t, Transform::SplitCoupleI(_)));
    if couple {
        format!("{one} i {two}")
    } else {
        one.to_string()
    }
}

fn person_field_sample(field: PersonField) -> &'static str {
    match field {
        PersonField::GivenName => "Joan",
        PersonField::Surname1 => "Puig",
        PersonField::Surname2 => "Ferrer",
        PersonField::MaidenSurname => "Soler",
        PersonField::Sex => "H",
        PersonField::Age => "30",
        PersonField::CivilStatus => "casat",
        PersonField::Municipality => "Valls",
        PersonField::Occupation => "pagès",
        PersonField::HouseName => "Cal Puig",
    }
}

fn base_sample(field: BaseField, program: &TemplateProgram) -> String {
    match field {
        BaseField::PageLabel => "12".into(),
        BaseField::PagePosition => "1".into(),
        BaseField::DocumentYear => "1803".into(),
        BaseField::ActDate | BaseField::ActDateText => SAMPLE_DATE.into(),
        BaseField::ActDateQuality => "clar".into(),
        BaseField::Literal => "Text literal de l'acte".into(),
        BaseField::Marginalia => "Nota al marge".into(),
        BaseField::RecordType => program.catalog.record_type().as_str().into(),
    }
}

fn attr_sample(key: &str, kind: AttrKind) -> String {
    match kind {
        AttrKind::Int => "2".into(),
        AttrKind::Date | AttrKind::DateOrTextWithQuality => SAMPLE_DATE.into(),
        AttrKind::Bool => "si".into(),
        AttrKind::Quality => "clar".into(),
        AttrKind::Text | AttrKind::TextWithQuality => format!("exemple {}", key.replace('_', " ")),
    }
}

fn entry_sample(entry: &Entry, program: &TemplateProgram) -> String {
    if let Some(Transform::MapValues(table)) = entry
        .transforms
        .iter()
        .find(|t| matches!(t, Transform::MapValues(_)))
    {
        let mut keys: Vec<&String> = table.keys().collect();
        keys.sort();
        if let Some(k) = keys.first() {
            return (*k).clone();
        }
    }
    match &entry.target {
        Target::Base(field) => base_sample(*field, program),
        Target::Person { field: None, .. } => person_sample(&entry.transforms),
        Target::Person {
            field: Some(PersonTargetField::Value(f)),
            ..
        } => person_field_sample(*f).into(),
        Target::Person {
            field: Some(PersonTargetField::Quality(_)),
            ..
        } => "clar".into(),
        Target::Person {
            field: Some(PersonTargetField::Notes),
            ..
        } => "nota".into(),
        Target::Attr { key, kind } => attr_sample(key, *kind),
    }
}

fn branch_sample(branch: &Branch, program: &TemplateProgram) -> String {
    branch
        .entries
        .first()
        .map(|e| entry_sample(e, program))
        .unwrap_or_default()
}

/// Index of the branch a sample value is first drawn from.
fn preferred_branch(column: &Column) -> Option<usize> {
    column
        .branches
        .iter()
        .position(|b| !matches!(b.when, BranchGuard::Unless(_)))
        .or_else(|| (!column.branches.is_empty()).then_some(0))
}

/// Build a one-row sample for `program`, resolving the book column
/// against `book`.
pub fn sample_table(program: &TemplateProgram, book: &Book) -> SampleTable {
    let book_value = match program.book.mode {
        BookMode::ById => book.id.to_string(),
        BookMode::ByChronologyLabel => book.chronology.clone(),
    };

    let mut headers = Vec::new();
    let mut row = Vec::new();
    let book_key = normalize_header(&program.book.column);
    let book_is_mapped = program.columns.iter().any(|c| {
        c.labels().any(|l| normalize_header(l) == book_key)
    });
    if !book_is_mapped {
        headers.push(program.book.column.clone());
        row.push(book_value.clone());
    }
    // (column index in the row, branch the value was drawn from)
    let mut drawn: Vec<(usize, Option<usize>)> = Vec::with_capacity(program.columns.len());
    for column in &program.columns {
        headers.push(column.header.clone());
        if column.labels().any(|l| normalize_header(l) == book_key) {
            row.push(book_value.clone());
            drawn.push((row.len() - 1, None));
        } else {
            let branch = preferred_branch(column);
            row.push(
                branch
                    .map(|b| branch_sample(&column.branches[b], program))
                    .unwrap_or_default(),
            );
            drawn.push((row.len() - 1, branch));
        }
    }

    // Make column conditions referencing other columns hold, adding the
    // referenced column when the template does not map it.
    let mut pinned = vec![false; row.len()];
    for column in &program.columns {
        for branch in &column.branches {
            if let BranchGuard::If(ColumnCondition::Equals { column: other, value }) = &branch.when {
                let key = normalize_header(other);
                if key == book_key {
                    continue;
                }
                match headers.iter().position(|h| normalize_header(h) == key) {
                    Some(i) if !pinned[i] => {
                        row[i] = value.clone();
                        pinned[i] = true;
                    }
                    Some(_) => {}
                    None => {
                        headers.push(other.trim().to_string());
                        row.push(value.clone());
                        pinned.push(true);
                    }
                }
            }
        }
    }

    // Re-draw every value the row will route to a different branch.
    for (column, (i, branch)) in program.columns.iter().zip(drawn) {
        if branch.is_none() || pinned[i] {
            continue;
        }
        let values = RowValues::new(&headers, row.clone());
        let taken = column
            .branches
            .iter()
            .position(|b| b.when.admits(&row[i], &values));
        if let Some(t) = taken {
            if Some(t) != branch {
                row[i] = branch_sample(&column.branches[t], program);
            }
        }
    }

    SampleTable {
        headers,
        rows: vec![row],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sample_covers_every_column() {
        let program = TemplateProgram::from_json(&json!({
            "metadata": {"record_type": "marriage"},
            "book_resolution": {"mode": "by_chronology_label", "column": "Llibre"},
            "mapping": {"columns": [
                {"header": "parella", "map_to": [
                    {"target": "person.nuvi", "transforms": [
                        {"name": "split_couple_i", "args": {"select": "left"}}, "parse_person_from_nom"
                    ]},
                    {"target": "person.novia", "transforms": [
                        {"name": "split_couple_i", "args": {"select": "right"}}, "parse_person_from_nom"
                    ]}
                ]},
                {"header": "data", "map_to": [{"target": "base.data_acte", "transforms": ["parse_date_flexible_to_base_data_acte"]}]},
                {"header": "ordre", "map_to": [{"target": "attr.ordre_matrimoni.int"}]}
            ]}
        }))
        .unwrap();
        let book = Book {
            id: 4,
            chronology: "1801-1820".into(),
            ..Default::default()
        };
        let table = sample_table(&program, &book);
        assert_eq!(table.headers, vec!["Llibre", "parella", "data", "ordre"]);
        assert_eq!(
            table.rows[0],
            vec!["1801-1820", "Joan Puig Ferrer i Maria Vidal Soler", "12/03/1803", "2"]
        );
        let csv = table.to_csv(b';').unwrap();
        assert!(csv.starts_with("Llibre;parella;data;ordre\n"));
    }

    #[test]
    fn test_sample_follows_the_branch_each_row_takes() {
        let program = TemplateProgram::from_json(&json!({
            "metadata": {"record_type": "baptism"},
            "book_resolution": {"mode": "by_id", "column": "llibre"},
            "mapping": {"columns": [
                {"header": "cognoms", "required": true, "map_to": [
                    {"target": "person.batejat", "transforms": ["parse_person_from_cognoms_v2"]}
                ]},
                {"header": "sexe", "condition": {
                    "expr": "column:tipus == 'bateig'",
                    "then": [{"target": "person.batejat.sexe"}],
                    "else": [{"target": "attr.observacions"}]
                }},
                {"header": "any", "condition": {
                    "expr": "column:cognoms != 'Puig Ferrer Joan'",
                    "then": [{"target": "attr.ordre_fill.int"}],
                    "else": [{"target": "base.any_doc"}]
                }}
            ]}
        }))
        .unwrap();
        let book = Book {
            id: 4,
            ..Default::default()
        };
        let table = sample_table(&program, &book);
        assert_eq!(table.headers, vec!["llibre", "cognoms", "sexe", "any", "tipus"]);
        assert_eq!(
            table.rows[0],
            vec!["4", "Puig Ferrer Joan", "H", "1803", "bateig"]
        );
    }
}
