//! The transform allowlist and its interpreter.
//!
//! Each transform maps a string to a string. Transforms may also write to a
//! side channel ([`Extras`]) read by target dispatch: the flexible date
//! parsers export the date quality as `date_estat`, the person parsers
//! export the parsed person, and `default_quality_if_present` exports a
//! field quality.

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

use crate::date::{parse_ddmmyyyy, parse_flexible_date};
use crate::models::Quality;
use crate::names::{
    extract_parentheticals, parse_marriage_order, parse_person, split_couple,
    strip_marriage_order_text, NameOrder, ParenPolicy, ParsedPerson,
};
use crate::normalize::strip_diacritics;

use super::document::TransformDoc;
use super::TemplateError;

/// Name-parser variant selected by a `parse_person_from_*` transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersonParseMode {
    pub order: NameOrder,
    pub policy: ParenPolicy,
    pub maternal_first: bool,
}

impl PersonParseMode {
    fn from_name(name: &str) -> Option<Self> {
        let (order, rest) = if let Some(rest) = name.strip_prefix("parse_person_from_cognoms") {
            (NameOrder::SurnameFirst, rest)
        } else if let Some(rest) = name.strip_prefix("parse_person_from_nom") {
            (NameOrder::GivenFirst, rest)
        } else {
            return None;
        };
        let (policy, maternal_first) = match rest {
            "" => (ParenPolicy::AllNotes, false),
            "_v2" => (ParenPolicy::LastIsMunicipality, false),
            "_v2_maternal_first" => (ParenPolicy::LastIsMunicipality, true),
            _ => return None,
        };
        Some(Self {
            order,
            policy,
            maternal_first,
        })
    }

    pub fn name(&self) -> &'static str {
        match (self.order, self.policy, self.maternal_first) {
            (NameOrder::SurnameFirst, ParenPolicy::AllNotes, _) => "parse_person_from_cognoms",
            (NameOrder::SurnameFirst, ParenPolicy::LastIsMunicipality, false) => {
                "parse_person_from_cognoms_v2"
            }
            (NameOrder::SurnameFirst, ParenPolicy::LastIsMunicipality, true) => {
                "parse_person_from_cognoms_v2_maternal_first"
            }
            (NameOrder::GivenFirst, ParenPolicy::AllNotes, _) => "parse_person_from_nom",
            (NameOrder::GivenFirst, ParenPolicy::LastIsMunicipality, false) => {
                "parse_person_from_nom_v2"
            }
            (NameOrder::GivenFirst, ParenPolicy::LastIsMunicipality, true) => {
                "parse_person_from_nom_v2_maternal_first"
            }
        }
    }

    pub fn parse(&self, text: &str) -> ParsedPerson {
        let mut parsed = parse_person(text, self.order, self.policy);
        if self.maternal_first {
            parsed.swap_surnames();
        }
        parsed
    }
}

/// Side of a couple selected by `split_couple_i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoupleSide {
    Left,
    Right,
}

/// A compiled transform.
#[derive(Debug, Clone)]
pub enum Transform {
    Trim,
    Lower,
    StripDiacritics,
    NormalizeCronologia,
    ParseDdmmyyyyToIso,
    ParseDateFlexibleToBaseDataActe,
    ParseDateFlexibleToDateOrTextWithQuality,
    ParseIntNullable,
    ParseMarriageOrderIntNullable,
    StripMarriageOrderText,
    ParsePerson(PersonParseMode),
    SplitCoupleI(CoupleSide),
    SetDefault(String),
    MapValues(HashMap<String, String>),
    RegexExtract { pattern: Regex, group: usize },
    ExtractParentheticalLast,
    ExtractParentheticalAll,
    StripParentheticals,
    DefaultQualityIfPresent,
}

/// Side-channel values written by transforms during one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct Extras {
    /// Quality exported by the flexible date parsers.
    pub date_estat: Option<Quality>,
    /// Passthrough text exported by the flexible date parsers.
    pub date_text: Option<String>,
    /// Field quality exported by `default_quality_if_present`.
    pub quality: Option<Quality>,
    /// Result of the last `parse_person_from_*` transform.
    pub person: Option<ParsedPerson>,
}

fn value_as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl Transform {
    /// Compile one transform reference from a column.
    pub fn compile(doc: &TransformDoc, column: &str) -> Result<Transform, TemplateError> {
        let name = doc.name().trim();
        let spec = match doc {
            TransformDoc::Spec(s) => Some(s),
            TransformDoc::Name(_) => None,
        };
        let missing = |arg: &str| TemplateError::MissingArgument {
            column: column.to_string(),
            transform: name.to_string(),
            argument: arg.to_string(),
        };

        if let Some(mode) = PersonParseMode::from_name(name) {
            return Ok(Transform::ParsePerson(mode));
        }

        let t = match name {
            "trim" => Transform::Trim,
            "lower" => Transform::Lower,
            "strip_diacritics" => Transform::StripDiacritics,
            "normalize_cronologia" => Transform::NormalizeCronologia,
            "parse_ddmmyyyy_to_iso" => Transform::ParseDdmmyyyyToIso,
            "parse_date_flexible_to_base_data_acte" => Transform::ParseDateFlexibleToBaseDataActe,
            "parse_date_flexible_to_date_or_text_with_quality" => {
                Transform::ParseDateFlexibleToDateOrTextWithQuality
            }
            "parse_int_nullable" => Transform::ParseIntNullable,
            "parse_marriage_order_int_nullable" => Transform::ParseMarriageOrderIntNullable,
            "strip_marriage_order_text" => Transform::StripMarriageOrderText,
            "split_couple_i" => {
                let select = spec
                    .and_then(|s| s.arg("select"))
                    .and_then(value_as_string)
                    .unwrap_or_else(|| "left".to_string());
                match select.as_str() {
                    "left" => Transform::SplitCoupleI(CoupleSide::Left),
                    "right" => Transform::SplitCoupleI(CoupleSide::Right),
                    _ => return Err(missing("select")),
                }
            }
            "set_default" => {
                let value = spec
                    .and_then(|s| s.arg("value"))
                    .and_then(value_as_string)
                    .ok_or_else(|| missing("value"))?;
                Transform::SetDefault(value)
            }
            "map_values" => {
                let table: HashMap<String, String> = spec
                    .map(|s| {
                        s.args
                            .iter()
                            .filter_map(|(k, v)| value_as_string(v).map(|v| (k.clone(), v)))
                            .collect()
                    })
                    .unwrap_or_default();
                if table.is_empty() {
                    return Err(missing("args"));
                }
                Transform::MapValues(table)
            }
            "regex_extract" => {
                let pattern = spec
                    .and_then(|s| s.args.get("pattern").or(s.value.as_ref()))
                    .and_then(value_as_string)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| missing("pattern"))?;
                let group = spec
                    .and_then(|s| s.args.get("group"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(1) as usize;
                let re = Regex::new(&pattern).map_err(|e| TemplateError::InvalidRegex {
                    column: column.to_string(),
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
                Transform::RegexExtract { pattern: re, group }
            }
            "extract_parenthetical_last" => Transform::ExtractParentheticalLast,
            "extract_parenthetical_all" => Transform::ExtractParentheticalAll,
            "strip_parentheticals" => Transform::StripParentheticals,
            "default_quality_if_present" => Transform::DefaultQualityIfPresent,
            other => {
                return Err(TemplateError::UnknownTransform {
                    column: column.to_string(),
                    name: other.to_string(),
                })
            }
        };
        Ok(t)
    }

    /// Allowlist name of this transform.
    pub fn name(&self) -> &'static str {
        match self {
            Transform::Trim => "trim",
            Transform::Lower => "lower",
            Transform::StripDiacritics => "strip_diacritics",
            Transform::NormalizeCronologia => "normalize_cronologia",
            Transform::ParseDdmmyyyyToIso => "parse_ddmmyyyy_to_iso",
            Transform::ParseDateFlexibleToBaseDataActe => "parse_date_flexible_to_base_data_acte",
            Transform::ParseDateFlexibleToDateOrTextWithQuality => {
                "parse_date_flexible_to_date_or_text_with_quality"
            }
            Transform::ParseIntNullable => "parse_int_nullable",
            Transform::ParseMarriageOrderIntNullable => "parse_marriage_order_int_nullable",
            Transform::StripMarriageOrderText => "strip_marriage_order_text",
            Transform::ParsePerson(mode) => mode.name(),
            Transform::SplitCoupleI(_) => "split_couple_i",
            Transform::SetDefault(_) => "set_default",
            Transform::MapValues(_) => "map_values",
            Transform::RegexExtract { .. } => "regex_extract",
            Transform::ExtractParentheticalLast => "extract_parenthetical_last",
            Transform::ExtractParentheticalAll => "extract_parenthetical_all",
            Transform::StripParentheticals => "strip_parentheticals",
            Transform::DefaultQualityIfPresent => "default_quality_if_present",
        }
    }

    /// Apply this transform to `value`, possibly writing to `extras`.
    pub fn apply(&self, value: String, extras: &mut Extras) -> String {
        match self {
            Transform::Trim => value.trim().to_string(),
            Transform::Lower => value.to_lowercase(),
            Transform::StripDiacritics => strip_diacritics(&value),
            Transform::NormalizeCronologia => normalize_cronologia(&value),
            Transform::ParseDdmmyyyyToIso => parse_ddmmyyyy(&value)
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            Transform::ParseDateFlexibleToBaseDataActe
            | Transform::ParseDateFlexibleToDateOrTextWithQuality => {
                let parsed = parse_flexible_date(&value);
                extras.date_estat = Some(parsed.quality);
                extras.date_text = Some(parsed.text.clone());
                parsed.iso()
            }
            Transform::ParseIntNullable => value
                .trim()
                .parse::<i64>()
                .map(|i| i.to_string())
                .unwrap_or_default(),
            Transform::ParseMarriageOrderIntNullable => parse_marriage_order(&value)
                .map(|n| n.to_string())
                .unwrap_or_default(),
            Transform::StripMarriageOrderText => strip_marriage_order_text(&value),
            Transform::ParsePerson(mode) => {
                extras.person = Some(mode.parse(&value));
                value
            }
            Transform::SplitCoupleI(side) => {
                let (left, right) = split_couple(&value);
                match side {
                    CoupleSide::Left => left,
                    CoupleSide::Right => right,
                }
            }
            Transform::SetDefault(default) => {
                if value.trim().is_empty() {
                    default.clone()
                } else {
                    value
                }
            }
            Transform::MapValues(table) => {
                if let Some(v) = table.get(&value) {
                    return v.clone();
                }
                let wanted = value.trim().to_lowercase();
                table
                    .iter()
                    .find(|(k, _)| k.trim().to_lowercase() == wanted)
                    .map(|(_, v)| v.clone())
                    .unwrap_or(value)
            }
            Transform::RegexExtract { pattern, group } => pattern
                .captures(&value)
                .and_then(|c| c.get(*group))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            Transform::ExtractParentheticalLast => {
                extract_parentheticals(&value).1.pop().unwrap_or_default()
            }
            Transform::ExtractParentheticalAll => extract_parentheticals(&value).1.join("; "),
            Transform::StripParentheticals => extract_parentheticals(&value).0,
            Transform::DefaultQualityIfPresent => {
                if !value.trim().is_empty() && extras.quality.is_none() {
                    extras.quality = Some(Quality::Clear);
                }
                value
            }
        }
    }
}

/// Replace `.` with `/` and drop spaces (`1801 . 1820` → `1801/1820`).
pub fn normalize_cronologia(value: &str) -> String {
    value
        .replace('.', "/")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Run a pipeline over a raw cell value (trimmed first).
pub fn run_pipeline(transforms: &[Transform], raw: &str) -> (String, Extras) {
    let mut extras = Extras::default();
    let mut value = raw.trim().to_string();
    for t in transforms {
        value = t.apply(value, &mut extras);
    }
    (value, extras)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(v: serde_json::Value) -> Result<Transform, TemplateError> {
        let doc: TransformDoc = serde_json::from_value(v).unwrap();
        Transform::compile(&doc, "col")
    }

    #[test]
    fn test_compile_bare_and_object_forms() {
        assert_eq!(compile(json!("trim")).unwrap().name(), "trim");
        assert_eq!(
            compile(json!({"op": "set_default", "arg": "x"})).unwrap().name(),
            "set_default"
        );
        assert_eq!(
            compile(json!("parse_person_from_cognoms_v2_maternal_first"))
                .unwrap()
                .name(),
            "parse_person_from_cognoms_v2_maternal_first"
        );
    }

    #[test]
    fn test_compile_rejects_bad_specs() {
        assert!(matches!(
            compile(json!("uppercase_everything")),
            Err(TemplateError::UnknownTransform { .. })
        ));
        assert!(matches!(
            compile(json!({"name": "map_values"})),
            Err(TemplateError::MissingArgument { .. })
        ));
        assert!(matches!(
            compile(json!({"name": "regex_extract"})),
            Err(TemplateError::MissingArgument { .. })
        ));
        assert!(matches!(
            compile(json!("set_default")),
            Err(TemplateError::MissingArgument { .. })
        ));
        assert!(matches!(
            compile(json!({"name": "regex_extract", "args": {"pattern": "("}})),
            Err(TemplateError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn test_pipeline_date_exports_quality() {
        let t = compile(json!("parse_date_flexible_to_base_data_acte")).unwrap();
        let (v, extras) = run_pipeline(&[t], " 12/03/1803 ");
        assert_eq!(v, "1803-03-12");
        assert_eq!(extras.date_estat, Some(Quality::Clear));

        let t = compile(json!("parse_date_flexible_to_base_data_acte")).unwrap();
        let (v, extras) = run_pipeline(&[t], "??/03/1803");
        assert_eq!(v, "");
        assert_eq!(extras.date_estat, Some(Quality::Doubtful));
        assert_eq!(extras.date_text.as_deref(), Some("??/03/1803"));
    }

    #[test]
    fn test_pipeline_text_transforms() {
        let ts = vec![
            compile(json!({"name": "split_couple_i", "args": {"select": "right"}})).unwrap(),
            compile(json!("strip_parentheticals")).unwrap(),
            compile(json!("lower")).unwrap(),
            compile(json!("strip_diacritics")).unwrap(),
        ];
        let (v, _) = run_pipeline(&ts, "Joan Puig i Mònica Vilà (Reus)");
        assert_eq!(v, "monica vila");
    }

    #[test]
    fn test_map_values_and_regex() {
        let map = compile(json!({"name": "map_values", "args": {"H": "home", "D": "dona"}})).unwrap();
        let (v, _) = run_pipeline(&[map.clone()], "h");
        assert_eq!(v, "home");
        let (v, _) = run_pipeline(&[map], "X");
        assert_eq!(v, "X");

        let re = compile(json!({"name": "regex_extract", "args": {"pattern": "foli (\\d+)", "group": 1}}))
            .unwrap();
        let (v, _) = run_pipeline(&[re], "llibre 3, foli 27v");
        assert_eq!(v, "27");
    }

    #[test]
    fn test_default_quality_and_ints() {
        let dq = compile(json!("default_quality_if_present")).unwrap();
        let (_, extras) = run_pipeline(&[dq.clone()], "pagès");
        assert_eq!(extras.quality, Some(Quality::Clear));
        let (_, extras) = run_pipeline(&[dq], "");
        assert_eq!(extras.quality, None);

        let pi = compile(json!("parse_int_nullable")).unwrap();
        assert_eq!(run_pipeline(&[pi.clone()], " 42 ").0, "42");
        assert_eq!(run_pipeline(&[pi], "quaranta").0, "");

        let mo = compile(json!("parse_marriage_order_int_nullable")).unwrap();
        assert_eq!(run_pipeline(&[mo], "vidu, 2n matrimoni").0, "2");
    }

    #[test]
    fn test_normalize_cronologia() {
        assert_eq!(normalize_cronologia("1801 . 1820"), "1801/1820");
    }
}
