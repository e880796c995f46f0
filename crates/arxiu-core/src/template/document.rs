//! Serde shape of a user-authored template document.
//!
//! This is the JSON exactly as users write it: loose, stringly-typed, with
//! aliases (`op` for `name`, `arg` for `value`, `when` for `expr`). It is
//! never used at ingest time; [`TemplateProgram::compile`] turns it into a
//! validated program first.
//!
//! [`TemplateProgram::compile`]: super::TemplateProgram::compile

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDocument {
    pub metadata: MetadataDoc,
    pub book_resolution: BookResolutionDoc,
    pub mapping: MappingDoc,
    #[serde(default)]
    pub policies: PoliciesDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataDoc {
    #[serde(default = "default_version")]
    pub version: i64,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(alias = "tipus_acte")]
    pub record_type: String,
}

fn default_version() -> i64 {
    1
}

fn default_kind() -> String {
    "transcripcions_raw".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookResolutionDoc {
    pub mode: String,
    #[serde(alias = "header")]
    pub column: String,
    #[serde(default)]
    pub normalize_chronology: bool,
    #[serde(default = "default_ambiguity")]
    pub ambiguity_policy: String,
}

fn default_ambiguity() -> String {
    "fail".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingDoc {
    pub columns: Vec<ColumnDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDoc {
    pub header: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ColumnConditionDoc>,
    #[serde(default)]
    pub map_to: Vec<MapToDoc>,
}

/// Column-level condition choosing a `then` or `else` branch.
///
/// When `then` is empty the column's own `map_to` list is the `then` branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConditionDoc {
    #[serde(alias = "when")]
    pub expr: String,
    #[serde(default)]
    pub then: Vec<MapToDoc>,
    #[serde(default, rename = "else")]
    pub otherwise: Vec<MapToDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapToDoc {
    pub target: String,
    #[serde(default)]
    pub transforms: Vec<TransformDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<InlineConditionDoc>,
}

/// A transform is either a bare name or an object with arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransformDoc {
    Name(String),
    Spec(TransformSpecDoc),
}

impl TransformDoc {
    pub fn name(&self) -> &str {
        match self {
            TransformDoc::Name(n) => n,
            TransformDoc::Spec(s) => &s.name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformSpecDoc {
    #[serde(alias = "op")]
    pub name: String,
    #[serde(default, alias = "arg", skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
}

impl TransformSpecDoc {
    /// Look up an argument in `args`, falling back to `value`.
    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key).or(self.value.as_ref())
    }
}

/// Condition attached to a single `map_to` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineConditionDoc {
    #[serde(alias = "type", alias = "expr")]
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoliciesDoc {
    #[serde(default, alias = "moderation_status", skip_serializing_if = "Option::is_none")]
    pub default_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup: Option<DedupDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_existing: Option<MergeDoc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupDoc {
    #[serde(default)]
    pub key_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeDoc {
    #[serde(default = "default_merge_mode")]
    pub mode: String,
    #[serde(default)]
    pub principal_roles: Vec<String>,
    #[serde(default)]
    pub update_missing_only: bool,
    #[serde(default)]
    pub add_missing_people: bool,
    #[serde(default)]
    pub add_missing_attrs: bool,
    #[serde(default)]
    pub avoid_duplicate_rows_by_principal_name_per_book: bool,
}

fn default_merge_mode() -> String {
    "none".to_string()
}
