//! Template application: one CSV row in, one record draft out.

use std::collections::HashMap;

use crate::date::{parse_ddmmyyyy, parse_flexible_date, parse_iso};
use crate::models::{
    merge_quality, year_in_range, AttributeValue, Quality, QualifiedText, RecordType,
    TranscriptionAttribute, TranscriptionPerson, TranscriptionRecord,
};
use crate::names::ParsedPerson;
use crate::normalize::extract_quality_marker;
use crate::template::condition::{normalize_header, RowValues};
use crate::template::program::{AttrKind, BaseField, Entry, PersonTargetField, Target};
use crate::template::transform::{run_pipeline, Extras};
use crate::template::TemplateProgram;

/// Template columns resolved against a CSV header row.
#[derive(Debug, Clone)]
pub struct ResolvedColumns {
    /// For each template column, the index of the first matching header.
    pub indices: Vec<Option<usize>>,
    /// Template columns marked required but absent.
    pub missing_required: Vec<String>,
}

/// Find, for every template column, the first header equal to its
/// header label or one of its aliases (case-insensitive, BOM-free).
pub fn resolve_columns(program: &TemplateProgram, headers: &[String]) -> ResolvedColumns {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
    let mut indices = Vec::with_capacity(program.columns.len());
    let mut missing_required = Vec::new();
    for column in &program.columns {
        let found = column.labels().find_map(|label| {
            let wanted = normalize_header(label);
            normalized.iter().position(|h| *h == wanted)
        });
        if found.is_none() && column.required {
            missing_required.push(column.header.clone());
        }
        indices.push(found);
    }
    ResolvedColumns {
        indices,
        missing_required,
    }
}

/// A problem found while dispatching a value, failing the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchIssue {
    pub target: String,
    pub value: String,
}

/// Everything one row maps to, before it is created or merged.
#[derive(Debug, Clone)]
pub struct RowDraft {
    pub record: TranscriptionRecord,
    pub persons: Vec<TranscriptionPerson>,
    pub attributes: Vec<TranscriptionAttribute>,
    /// Final value per target path, for dedup keys.
    pub mapped: HashMap<String, String>,
    pub record_type_override: Option<RecordType>,
    pub invalid_year: Option<DispatchIssue>,
}

impl RowDraft {
    fn new(record_type: RecordType) -> Self {
        Self {
            record: TranscriptionRecord::new(0, record_type),
            persons: Vec::new(),
            attributes: Vec::new(),
            mapped: HashMap::new(),
            record_type_override: None,
            invalid_year: None,
        }
    }

    fn person_mut(&mut self, role: &str) -> &mut TranscriptionPerson {
        let idx = match self.persons.iter().position(|p| p.role == role) {
            Some(i) => i,
            None => {
                self.persons.push(TranscriptionPerson::with_role(role));
                self.persons.len() - 1
            }
        };
        &mut self.persons[idx]
    }

    fn attribute_mut(&mut self, key: &str) -> &mut TranscriptionAttribute {
        let idx = match self.attributes.iter().position(|a| a.key == key) {
            Some(i) => i,
            None => {
                self.attributes.push(TranscriptionAttribute {
                    key: key.to_string(),
                    ..Default::default()
                });
                self.attributes.len() - 1
            }
        };
        &mut self.attributes[idx]
    }

    /// Drop empty persons and attributes carrying neither value nor quality.
    fn finish(mut self) -> Self {
        self.persons.retain(|p| !p.is_empty());
        self.attributes
            .retain(|a| a.has_value() || a.quality.is_some() || !a.notes.trim().is_empty());
        self
    }
}

/// Apply every column of `program` to one row.
pub fn apply_row(program: &TemplateProgram, columns: &ResolvedColumns, row: &RowValues) -> RowDraft {
    let mut draft = RowDraft::new(program.catalog.record_type());
    for (column, index) in program.columns.iter().zip(&columns.indices) {
        let raw = index.and_then(|i| row.at(i)).unwrap_or("");
        for branch in &column.branches {
            if !branch.when.admits(raw, row) {
                continue;
            }
            for entry in &branch.entries {
                apply_entry(&mut draft, entry, raw, row);
            }
        }
    }
    if let Some(rt) = draft.record_type_override {
        draft.record.record_type = rt;
    }
    draft.finish()
}

fn apply_entry(draft: &mut RowDraft, entry: &Entry, raw: &str, row: &RowValues) {
    if let Some(cond) = &entry.condition {
        if !cond.evaluate(raw, row) {
            return;
        }
    }
    let (value, extras) = run_pipeline(&entry.transforms, raw);
    draft.mapped.insert(entry.target.to_string(), value.clone());
    dispatch(draft, &entry.target, value, &extras);
}

fn dispatch(draft: &mut RowDraft, target: &Target, value: String, extras: &Extras) {
    match target {
        Target::Base(field) => dispatch_base(draft, *field, value, extras),
        Target::Person { role, field: None } => {
            if let Some(parsed) = &extras.person {
                let incoming = person_from_parsed(role, parsed);
                if !incoming.is_empty() {
                    draft.person_mut(role).absorb_missing(&incoming);
                }
            }
        }
        Target::Person {
            role,
            field: Some(field),
        } => dispatch_person_field(draft.person_mut(role), *field, &value, extras),
        Target::Attr { key, kind } => {
            dispatch_attribute(draft.attribute_mut(key), *kind, &value, extras)
        }
    }
}

fn set_if_empty(slot: &mut String, value: &str) {
    if slot.trim().is_empty() && !value.trim().is_empty() {
        *slot = value.trim().to_string();
    }
}

fn dispatch_base(draft: &mut RowDraft, field: BaseField, value: String, extras: &Extras) {
    let record = &mut draft.record;
    let value = value.trim();
    match field {
        BaseField::PageLabel => set_if_empty(&mut record.page_label, value),
        BaseField::PagePosition => {
            if record.page_position.is_none() {
                record.page_position = value.parse::<i64>().ok();
            }
        }
        BaseField::DocumentYear => {
            if value.is_empty() || record.document_year.is_some() {
                return;
            }
            match value.parse::<i32>() {
                Ok(y) if year_in_range(y) => record.document_year = Some(y),
                _ => {
                    draft.invalid_year = Some(DispatchIssue {
                        target: format!("base.{}", field.as_str()),
                        value: value.to_string(),
                    });
                }
            }
        }
        BaseField::ActDate => {
            if let Some(d) = parse_iso(value) {
                record.act_date = Some(d);
            } else if !value.is_empty() {
                let parsed = parse_flexible_date(value);
                record.act_date = parsed.date;
                if parsed.date.is_none() {
                    set_if_empty(&mut record.act_date_text, &parsed.text);
                }
                if extras.date_estat.is_none() {
                    record.act_date_quality = Some(parsed.quality);
                }
            }
            if let Some(text) = &extras.date_text {
                if record.act_date.is_none() {
                    set_if_empty(&mut record.act_date_text, text);
                }
            }
            if let Some(q) = extras.date_estat {
                record.act_date_quality = Some(q);
            }
        }
        BaseField::ActDateText => set_if_empty(&mut record.act_date_text, value),
        BaseField::ActDateQuality => {
            if let Some(q) = Quality::parse(value) {
                record.act_date_quality = Some(q);
            }
        }
        BaseField::Literal => set_if_empty(&mut record.literal, value),
        BaseField::Marginalia => set_if_empty(&mut record.marginalia, value),
        BaseField::RecordType => {
            if let Ok(rt) = value.parse::<RecordType>() {
                draft.record_type_override = Some(rt);
            }
        }
    }
}

fn person_from_parsed(role: &str, parsed: &ParsedPerson) -> TranscriptionPerson {
    let mut person = TranscriptionPerson::with_role(role);
    person.given_name = parsed.given_name.clone();
    person.surname1 = parsed.surname1.clone();
    person.surname2 = parsed.surname2.clone();
    person.municipality = parsed.municipality.clone();
    person.notes = parsed.notes.clone();
    person
}

fn dispatch_person_field(
    person: &mut TranscriptionPerson,
    field: PersonTargetField,
    value: &str,
    extras: &Extras,
) {
    match field {
        PersonTargetField::Value(f) => {
            let (clean, marker) = extract_quality_marker(value);
            if clean.is_empty() && marker.is_none() {
                return;
            }
            let slot = person.field_mut(f);
            if slot.is_empty() {
                let quality = marker.or(extras.quality).or(slot.quality);
                *slot = QualifiedText::new(clean, quality);
            }
        }
        PersonTargetField::Quality(f) => {
            if let Some(q) = Quality::parse(value) {
                person.field_mut(f).quality = Some(q);
            }
        }
        PersonTargetField::Notes => {
            let value = value.trim();
            if value.is_empty() {
                return;
            }
            if person.notes.is_empty() {
                person.notes = value.to_string();
            } else {
                person.notes = format!("{}; {}", person.notes, value);
            }
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "si" | "sí" | "s" | "yes" | "true" | "1" | "x" => Some(true),
        "no" | "n" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn dispatch_attribute(attr: &mut TranscriptionAttribute, kind: AttrKind, value: &str, extras: &Extras) {
    let value = value.trim();
    let keep_raw = |attr: &mut TranscriptionAttribute| {
        if !value.is_empty() && attr.notes.is_empty() {
            attr.notes = value.to_string();
        }
    };
    if attr.has_value() && kind != AttrKind::Quality {
        return;
    }
    match kind {
        AttrKind::Text => {
            if !value.is_empty() {
                attr.value = Some(AttributeValue::Text(value.to_string()));
                attr.quality = attr.quality.or(extras.quality);
            }
        }
        AttrKind::Int => match value.parse::<i64>() {
            Ok(i) => attr.value = Some(AttributeValue::Int(i)),
            Err(_) => keep_raw(attr),
        },
        AttrKind::Date => {
            match parse_iso(value)
                .or_else(|| parse_ddmmyyyy(value))
                .or_else(|| parse_flexible_date(value).date)
            {
                Some(d) => attr.value = Some(AttributeValue::Date(d)),
                None => keep_raw(attr),
            }
        }
        AttrKind::Bool => match parse_bool(value) {
            Some(b) => attr.value = Some(AttributeValue::Bool(b)),
            None => keep_raw(attr),
        },
        AttrKind::DateOrTextWithQuality => {
            let (date, quality) = match parse_iso(value) {
                Some(d) => (Some(d), extras.date_estat.or(Some(Quality::Clear))),
                None => {
                    let parsed = parse_flexible_date(value);
                    (parsed.date, extras.date_estat.or(Some(parsed.quality)))
                }
            };
            match date {
                Some(d) => attr.value = Some(AttributeValue::Date(d)),
                None => {
                    let text = extras
                        .date_text
                        .as_deref()
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or(value);
                    if !text.trim().is_empty() {
                        attr.value = Some(AttributeValue::Text(text.trim().to_string()));
                    }
                }
            }
            if attr.has_value() || quality != Some(Quality::NoRecord) {
                attr.quality = merge_quality(attr.quality, quality);
            }
        }
        AttrKind::TextWithQuality => {
            let (clean, marker) = extract_quality_marker(value);
            if !clean.is_empty() {
                attr.value = Some(AttributeValue::Text(clean));
            }
            if let Some(q) = marker.or(extras.quality) {
                attr.quality = merge_quality(attr.quality, Some(q));
            }
        }
        AttrKind::Quality => {
            if let Some(q) = Quality::parse(value) {
                attr.quality = Some(q);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn program() -> TemplateProgram {
        TemplateProgram::from_json(&json!({
            "metadata": {"record_type": "baptism"},
            "book_resolution": {"mode": "by_id", "column": "llibre"},
            "mapping": {"columns": [
                {"header": "llibre", "required": true, "map_to": [{"target": "base.pagina", "transforms": [{"name": "set_default", "value": "s/n"}]}]},
                {"header": "batejat", "aliases": ["nom complet"], "map_to": [
                    {"target": "person.batejat", "transforms": ["parse_person_from_cognoms_v2"]}
                ]},
                {"header": "ofici pare", "map_to": [
                    {"target": "person.pare.ofici", "transforms": ["default_quality_if_present"]}
                ]},
                {"header": "data", "map_to": [
                    {"target": "base.data_acte", "transforms": ["parse_date_flexible_to_base_data_acte"]},
                    {"target": "attr.data_naixement.date_or_text_with_quality", "transforms": ["parse_date_flexible_to_date_or_text_with_quality"]}
                ]},
                {"header": "any", "map_to": [{"target": "base.any_doc"}]},
                {"header": "legitim", "condition": {"expr": "not_empty"}, "map_to": [{"target": "attr.legitimitat.bool"}]},
                {"header": "falta", "required": true, "map_to": [{"target": "attr.observacions"}]}
            ]}
        }))
        .unwrap()
    }

    fn headers(h: &[&str]) -> Vec<String> {
        h.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_columns_uses_aliases_and_reports_missing() {
        let p = program();
        let r = resolve_columns(&p, &headers(&["\u{feff}LLIBRE", "Nom complet", "data"]));
        assert_eq!(r.indices[0], Some(0));
        assert_eq!(r.indices[1], Some(1));
        assert_eq!(r.indices[3], Some(2));
        assert_eq!(r.missing_required, vec!["falta".to_string()]);
    }

    #[test]
    fn test_apply_row_dispatches_every_family() {
        let p = program();
        let h = headers(&["llibre", "batejat", "ofici pare", "data", "any", "legitim"]);
        let cols = resolve_columns(&p, &h);
        let row = RowValues::new(
            &h,
            vec![
                "".into(),
                "Puig i Ferrer Joan (pagès) (Valls)".into(),
                "teixidor".into(),
                "??/03/1803".into(),
                "".into(),
                "si".into(),
            ],
        );
        let draft = apply_row(&p, &cols, &row);
        assert_eq!(draft.record.page_label, "s/n");
        assert_eq!(draft.record.act_date, None);
        assert_eq!(draft.record.act_date_text, "??/03/1803");
        assert_eq!(draft.record.act_date_quality, Some(Quality::Doubtful));

        let batejat = &draft.persons[0];
        assert_eq!(batejat.role, "batejat");
        assert_eq!(batejat.given_name.value, "Joan");
        assert_eq!(batejat.surname1.value, "Puig i Ferrer");
        assert_eq!(batejat.municipality.value, "Valls");
        assert_eq!(batejat.notes, "pagès");

        let pare = &draft.persons[1];
        assert_eq!(pare.occupation.value, "teixidor");
        assert_eq!(pare.occupation.quality, Some(Quality::Clear));

        let naixement = draft
            .attributes
            .iter()
            .find(|a| a.key == "data_naixement")
            .unwrap();
        assert_eq!(
            naixement.value,
            Some(AttributeValue::Text("??/03/1803".into()))
        );
        assert_eq!(naixement.quality, Some(Quality::Doubtful));
        let legit = draft.attributes.iter().find(|a| a.key == "legitimitat").unwrap();
        assert_eq!(legit.value, Some(AttributeValue::Bool(true)));
        assert!(draft.invalid_year.is_none());
    }

    #[test]
    fn test_out_of_range_year_is_flagged() {
        let p = program();
        let h = headers(&["llibre", "any"]);
        let cols = resolve_columns(&p, &h);
        let row = RowValues::new(&h, vec!["1".into(), "3000".into()]);
        let draft = apply_row(&p, &cols, &row);
        assert_eq!(
            draft.invalid_year,
            Some(DispatchIssue {
                target: "base.any_doc".into(),
                value: "3000".into()
            })
        );
    }
}
