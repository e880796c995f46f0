//! Validated, compiled form of a template document.
//!
//! [`TemplateProgram::compile`] checks a [`TemplateDocument`] against the
//! transform allowlist, the target grammar and the record-type catalog,
//! and produces a tree the ingestion engine walks with exhaustive matches.

use std::fmt;

use crate::models::{ModerationStatus, PersonField};

use super::catalog::CatalogKind;
use super::condition::{ColumnCondition, InlineCondition};
use super::document::{MapToDoc, TemplateDocument};
use super::transform::Transform;
use super::TemplateError;

/// Maximum number of columns in one template.
pub const MAX_COLUMNS: usize = 200;
/// Maximum number of `map_to` entries per column branch.
pub const MAX_ENTRIES_PER_COLUMN: usize = 8;
/// Maximum number of transforms per `map_to` entry.
pub const MAX_TRANSFORMS_PER_ENTRY: usize = 12;

/// Header fields addressable as `base.<field>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseField {
    PageLabel,
    PagePosition,
    DocumentYear,
    ActDate,
    ActDateText,
    ActDateQuality,
    Literal,
    Marginalia,
    RecordType,
}

impl BaseField {
    pub const ALL: [BaseField; 9] = [
        BaseField::PageLabel,
        BaseField::PagePosition,
        BaseField::DocumentYear,
        BaseField::ActDate,
        BaseField::ActDateText,
        BaseField::ActDateQuality,
        BaseField::Literal,
        BaseField::Marginalia,
        BaseField::RecordType,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BaseField::PageLabel => "pagina",
            BaseField::PagePosition => "posicio_pagina",
            BaseField::DocumentYear => "any_doc",
            BaseField::ActDate => "data_acte",
            BaseField::ActDateText => "data_acte_text",
            BaseField::ActDateQuality => "data_acte_estat",
            BaseField::Literal => "transcripcio_literal",
            BaseField::Marginalia => "notes_marginals",
            BaseField::RecordType => "tipus_acte",
        }
    }

    pub fn parse(name: &str) -> Option<BaseField> {
        BaseField::ALL.iter().copied().find(|f| f.as_str() == name)
    }
}

/// Sub-field of a `person.<role>.<field>` target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersonTargetField {
    Value(PersonField),
    /// `<field>_estat`.
    Quality(PersonField),
    Notes,
}

impl PersonTargetField {
    fn parse(name: &str) -> Option<PersonTargetField> {
        if name == "notes" {
            return Some(PersonTargetField::Notes);
        }
        if let Some(field) = name.strip_suffix("_estat") {
            return PersonField::parse(field).map(PersonTargetField::Quality);
        }
        PersonField::parse(name).map(PersonTargetField::Value)
    }
}

impl fmt::Display for PersonTargetField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersonTargetField::Value(p) => f.write_str(p.as_str()),
            PersonTargetField::Quality(p) => write!(f, "{}_estat", p.as_str()),
            PersonTargetField::Notes => f.write_str("notes"),
        }
    }
}

/// Storage shape of an `attr.<key>[.<type>]` target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrKind {
    Text,
    Int,
    Date,
    Bool,
    /// ISO date when the value parses, else the raw text; quality from the
    /// flexible date parser.
    DateOrTextWithQuality,
    /// Text with a quality marker (`?`, `¿`) or an exported quality.
    TextWithQuality,
    /// Quality only (`attr.<key>.estat`).
    Quality,
}

impl AttrKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttrKind::Text => "text",
            AttrKind::Int => "int",
            AttrKind::Date => "date",
            AttrKind::Bool => "bool",
            AttrKind::DateOrTextWithQuality => "date_or_text_with_quality",
            AttrKind::TextWithQuality => "text_with_quality",
            AttrKind::Quality => "estat",
        }
    }

    fn parse(name: &str) -> Option<AttrKind> {
        match name {
            "text" => Some(AttrKind::Text),
            "int" => Some(AttrKind::Int),
            "date" => Some(AttrKind::Date),
            "bool" => Some(AttrKind::Bool),
            "date_or_text_with_quality" => Some(AttrKind::DateOrTextWithQuality),
            "text_with_quality" => Some(AttrKind::TextWithQuality),
            "estat" => Some(AttrKind::Quality),
            _ => None,
        }
    }
}

/// A parsed target path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Base(BaseField),
    Person {
        role: String,
        /// `None` for a bare `person.<role>` fed by a name parser.
        field: Option<PersonTargetField>,
    },
    Attr {
        key: String,
        kind: AttrKind,
    },
}

impl Target {
    /// Parse and check a dotted target against a catalog.
    pub fn parse(path: &str, catalog: CatalogKind) -> Result<Target, TemplateError> {
        let path = path.trim();
        let parts: Vec<&str> = path.split('.').collect();
        let unknown = || TemplateError::UnknownTarget(path.to_string());
        let not_allowed = || TemplateError::TargetNotInCatalog {
            target: path.to_string(),
            record_type: catalog.to_string(),
        };
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(unknown());
        }
        match parts.as_slice() {
            ["base", field] => {
                let field = BaseField::parse(field).ok_or_else(unknown)?;
                if field == BaseField::RecordType && !catalog.allows_record_type_override() {
                    return Err(not_allowed());
                }
                Ok(Target::Base(field))
            }
            ["person", role] => {
                if !catalog.allows_role(role) {
                    return Err(not_allowed());
                }
                Ok(Target::Person {
                    role: role.to_string(),
                    field: None,
                })
            }
            ["person", role, field] => {
                let field = PersonTargetField::parse(field).ok_or_else(unknown)?;
                if !catalog.allows_role(role) {
                    return Err(not_allowed());
                }
                Ok(Target::Person {
                    role: role.to_string(),
                    field: Some(field),
                })
            }
            ["attr", key] => {
                if !catalog.allows_attribute(key) {
                    return Err(not_allowed());
                }
                Ok(Target::Attr {
                    key: key.to_string(),
                    kind: AttrKind::Text,
                })
            }
            ["attr", key, kind] => {
                let kind = AttrKind::parse(kind).ok_or_else(unknown)?;
                if !catalog.allows_attribute(key) {
                    return Err(not_allowed());
                }
                Ok(Target::Attr {
                    key: key.to_string(),
                    kind,
                })
            }
            _ => Err(unknown()),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Base(field) => write!(f, "base.{}", field.as_str()),
            Target::Person { role, field: None } => write!(f, "person.{role}"),
            Target::Person {
                role,
                field: Some(field),
            } => write!(f, "person.{role}.{field}"),
            Target::Attr {
                key,
                kind: AttrKind::Text,
            } => write!(f, "attr.{key}"),
            Target::Attr { key, kind } => write!(f, "attr.{key}.{}", kind.as_str()),
        }
    }
}

/// How the book of each row is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookMode {
    ById,
    ByChronologyLabel,
}

impl BookMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookMode::ById => "by_id",
            BookMode::ByChronologyLabel => "by_chronology_label",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbiguityPolicy {
    Fail,
    FirstMatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookResolution {
    pub mode: BookMode,
    pub column: String,
    pub normalize_chronology: bool,
    pub ambiguity: AmbiguityPolicy,
}

/// Guard on a column branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchGuard {
    Always,
    If(ColumnCondition),
    Unless(ColumnCondition),
}

impl BranchGuard {
    pub fn admits(&self, own_value: &str, row: &super::condition::RowValues) -> bool {
        match self {
            BranchGuard::Always => true,
            BranchGuard::If(c) => c.evaluate(own_value, row),
            BranchGuard::Unless(c) => !c.evaluate(own_value, row),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub target: Target,
    pub transforms: Vec<Transform>,
    pub condition: Option<InlineCondition>,
}

impl Entry {
    /// The name-parser transform a bare person target relies on.
    pub fn person_parser(&self) -> Option<&Transform> {
        self.transforms
            .iter()
            .rev()
            .find(|t| matches!(t, Transform::ParsePerson(_)))
    }
}

#[derive(Debug, Clone)]
pub struct Branch {
    pub when: BranchGuard,
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub header: String,
    pub aliases: Vec<String>,
    pub required: bool,
    pub branches: Vec<Branch>,
}

impl Column {
    /// Header followed by aliases, in lookup order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.header.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.branches.iter().flat_map(|b| b.entries.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    None,
    ByPrincipalPersonIfBookIndexed,
}

impl MergeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMode::None => "none",
            MergeMode::ByPrincipalPersonIfBookIndexed => "by_principal_person_if_book_indexed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePolicy {
    pub mode: MergeMode,
    pub principal_roles: Vec<String>,
    pub update_missing_only: bool,
    pub add_missing_people: bool,
    pub add_missing_attrs: bool,
    pub avoid_duplicate_principal: bool,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            mode: MergeMode::None,
            principal_roles: Vec::new(),
            update_missing_only: false,
            add_missing_people: false,
            add_missing_attrs: false,
            avoid_duplicate_principal: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policies {
    /// `None` means the configured import default.
    pub moderation_status: Option<ModerationStatus>,
    /// Lowercased dedup key field names; empty disables dedup.
    pub dedup_keys: Vec<String>,
    pub merge: MergePolicy,
}

/// A template ready to drive ingestion.
#[derive(Debug, Clone)]
pub struct TemplateProgram {
    pub version: i64,
    pub kind: String,
    pub catalog: CatalogKind,
    pub book: BookResolution,
    pub columns: Vec<Column>,
    pub policies: Policies,
}

impl TemplateProgram {
    /// Parse and compile a JSON model.
    pub fn from_json(model: &serde_json::Value) -> Result<TemplateProgram, TemplateError> {
        let doc: TemplateDocument = serde_json::from_value(model.clone())
            .map_err(|e| TemplateError::Parse(e.to_string()))?;
        Self::compile(&doc)
    }

    pub fn from_json_str(text: &str) -> Result<TemplateProgram, TemplateError> {
        let doc: TemplateDocument =
            serde_json::from_str(text).map_err(|e| TemplateError::Parse(e.to_string()))?;
        Self::compile(&doc)
    }

    pub fn compile(doc: &TemplateDocument) -> Result<TemplateProgram, TemplateError> {
        let catalog: CatalogKind = doc
            .metadata
            .record_type
            .parse()
            .map_err(TemplateError::UnknownRecordType)?;

        let book = compile_book(doc)?;

        if doc.mapping.columns.len() > MAX_COLUMNS {
            return Err(TemplateError::TooManyColumns {
                count: doc.mapping.columns.len(),
                max: MAX_COLUMNS,
            });
        }

        let mut columns = Vec::with_capacity(doc.mapping.columns.len());
        for col in &doc.mapping.columns {
            let header = col.header.trim().to_string();
            if header.is_empty() {
                return Err(TemplateError::EmptyHeader);
            }
            let branches = match &col.condition {
                None => vec![Branch {
                    when: BranchGuard::Always,
                    entries: compile_entries(&header, &col.map_to, catalog)?,
                }],
                Some(cond) => {
                    let parsed = ColumnCondition::parse(&cond.expr).ok_or_else(|| {
                        TemplateError::InvalidCondition {
                            column: header.clone(),
                            expr: cond.expr.clone(),
                        }
                    })?;
                    let then_docs = if cond.then.is_empty() {
                        &col.map_to
                    } else {
                        &cond.then
                    };
                    let mut branches = vec![Branch {
                        when: BranchGuard::If(parsed.clone()),
                        entries: compile_entries(&header, then_docs, catalog)?,
                    }];
                    if !cond.otherwise.is_empty() {
                        branches.push(Branch {
                            when: BranchGuard::Unless(parsed),
                            entries: compile_entries(&header, &cond.otherwise, catalog)?,
                        });
                    }
                    branches
                }
            };
            if branches.iter().all(|b| b.entries.is_empty()) {
                return Err(TemplateError::EmptyMapTo(header));
            }
            columns.push(Column {
                header,
                aliases: col
                    .aliases
                    .iter()
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect(),
                required: col.required,
                branches,
            });
        }

        let policies = compile_policies(doc, catalog)?;

        Ok(TemplateProgram {
            version: doc.metadata.version,
            kind: doc.metadata.kind.clone(),
            catalog,
            book,
            columns,
            policies,
        })
    }

    /// Every entry of every branch, in declaration order.
    pub fn entries(&self) -> impl Iterator<Item = (&Column, &Entry)> {
        self.columns
            .iter()
            .flat_map(|c| c.entries().map(move |e| (c, e)))
    }
}

fn compile_book(doc: &TemplateDocument) -> Result<BookResolution, TemplateError> {
    let br = &doc.book_resolution;
    let mode = match br.mode.trim() {
        "by_id" => BookMode::ById,
        "by_chronology_label" => BookMode::ByChronologyLabel,
        other => return Err(TemplateError::UnknownBookMode(other.to_string())),
    };
    let ambiguity = match br.ambiguity_policy.trim() {
        "fail" | "" => AmbiguityPolicy::Fail,
        "first_match" => AmbiguityPolicy::FirstMatch,
        other => return Err(TemplateError::UnknownAmbiguityPolicy(other.to_string())),
    };
    let column = br.column.trim().to_string();
    if column.is_empty() {
        return Err(TemplateError::EmptyHeader);
    }
    Ok(BookResolution {
        mode,
        column,
        normalize_chronology: br.normalize_chronology,
        ambiguity,
    })
}

fn compile_entries(
    column: &str,
    docs: &[MapToDoc],
    catalog: CatalogKind,
) -> Result<Vec<Entry>, TemplateError> {
    if docs.len() > MAX_ENTRIES_PER_COLUMN {
        return Err(TemplateError::TooManyEntries {
            column: column.to_string(),
            count: docs.len(),
            max: MAX_ENTRIES_PER_COLUMN,
        });
    }
    let mut entries = Vec::with_capacity(docs.len());
    for doc in docs {
        if doc.transforms.len() > MAX_TRANSFORMS_PER_ENTRY {
            return Err(TemplateError::TooManyTransforms {
                column: column.to_string(),
                count: doc.transforms.len(),
                max: MAX_TRANSFORMS_PER_ENTRY,
            });
        }
        let target = Target::parse(&doc.target, catalog)?;
        let transforms = doc
            .transforms
            .iter()
            .map(|t| Transform::compile(t, column))
            .collect::<Result<Vec<_>, _>>()?;
        let condition = match &doc.condition {
            None => None,
            Some(c) => Some(
                InlineCondition::parse(&c.op, c.column.clone(), c.value.clone()).ok_or_else(
                    || TemplateError::InvalidCondition {
                        column: column.to_string(),
                        expr: c.op.clone(),
                    },
                )?,
            ),
        };
        let entry = Entry {
            target,
            transforms,
            condition,
        };
        if let Target::Person { role, field: None } = &entry.target {
            if entry.person_parser().is_none() {
                return Err(TemplateError::BarePersonWithoutParser {
                    column: column.to_string(),
                    role: role.clone(),
                });
            }
        }
        entries.push(entry);
    }
    Ok(entries)
}

fn compile_policies(doc: &TemplateDocument, catalog: CatalogKind) -> Result<Policies, TemplateError> {
    let p = &doc.policies;
    let moderation_status = match p.default_status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(s) => Some(
            s.parse::<ModerationStatus>()
                .map_err(|_| TemplateError::UnknownStatus(s.to_string()))?,
        ),
    };
    let dedup_keys = p
        .dedup
        .as_ref()
        .map(|d| {
            d.key_fields
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let merge = match &p.merge_existing {
        None => MergePolicy::default(),
        Some(m) => {
            let mode = match m.mode.trim() {
                "none" | "" => MergeMode::None,
                "by_principal_person_if_book_indexed" => MergeMode::ByPrincipalPersonIfBookIndexed,
                other => return Err(TemplateError::UnknownMergeMode(other.to_string())),
            };
            let mut principal_roles: Vec<String> = m
                .principal_roles
                .iter()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect();
            if principal_roles.is_empty() {
                principal_roles = catalog
                    .record_type()
                    .principal_roles()
                    .iter()
                    .map(|r| r.to_string())
                    .collect();
            }
            MergePolicy {
                mode,
                principal_roles,
                update_missing_only: m.update_missing_only,
                add_missing_people: m.add_missing_people,
                add_missing_attrs: m.add_missing_attrs,
                avoid_duplicate_principal: m.avoid_duplicate_rows_by_principal_name_per_book,
            }
        }
    };

    Ok(Policies {
        moderation_status,
        dedup_keys,
        merge,
    })
}
