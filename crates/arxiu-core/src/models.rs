//! Core data models used throughout Arxiu.
//!
//! These types represent the books, transcription records, persons,
//! attributes, dictionaries, counters, and activity entries that flow
//! through the ingestion, roll-up, and search pipeline. Every entity is
//! persisted through the [`Store`](crate::store::Store) trait.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lowest document year accepted anywhere in the pipeline.
pub const MIN_YEAR: i32 = 1200;
/// Highest document year accepted anywhere in the pipeline.
pub const MAX_YEAR: i32 = 2100;

/// Returns true when `year` is inside the accepted document range.
pub fn year_in_range(year: i32) -> bool {
    (MIN_YEAR..=MAX_YEAR).contains(&year)
}

// ─── Quality ────────────────────────────────────────────────────────

/// A transcriber's confidence in a single field.
///
/// Variants are ordered by rank: a higher rank is a worse reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Clear,
    Doubtful,
    Incomplete,
    Illegible,
    NoRecord,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Clear => "clear",
            Quality::Doubtful => "doubtful",
            Quality::Incomplete => "incomplete",
            Quality::Illegible => "illegible",
            Quality::NoRecord => "no_record",
        }
    }

    /// Rank used by [`merge_quality`]: `""` is 0, `clear` 1 … `no_record` 5.
    pub fn rank(&self) -> u8 {
        match self {
            Quality::Clear => 1,
            Quality::Doubtful => 2,
            Quality::Incomplete => 3,
            Quality::Illegible => 4,
            Quality::NoRecord => 5,
        }
    }

    /// Parse a quality label, accepting both English and Catalan forms.
    ///
    /// Returns `None` for empty or unknown labels.
    pub fn parse(label: &str) -> Option<Quality> {
        match label.trim().to_lowercase().as_str() {
            "clear" | "clar" => Some(Quality::Clear),
            "doubtful" | "dubtos" | "dubtós" => Some(Quality::Doubtful),
            "incomplete" | "incomplet" => Some(Quality::Incomplete),
            "illegible" | "il·legible" | "il.legible" => Some(Quality::Illegible),
            "no_record" | "no_consta" | "no consta" => Some(Quality::NoRecord),
            _ => None,
        }
    }

    /// Qualities that exclude a field from frequency roll-ups.
    pub fn is_unusable(&self) -> bool {
        matches!(self, Quality::Illegible | Quality::NoRecord)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rank of an optional quality (`None` is the empty label, rank 0).
pub fn quality_rank(q: Option<Quality>) -> u8 {
    q.map(|q| q.rank()).unwrap_or(0)
}

/// Merge two quality readings, keeping the worse one.
///
/// The result's rank is never lower than either input's rank.
pub fn merge_quality(a: Option<Quality>, b: Option<Quality>) -> Option<Quality> {
    if quality_rank(b) > quality_rank(a) {
        b
    } else {
        a
    }
}

// ─── Enumerations ───────────────────────────────────────────────────

/// The kind of act a transcription record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Baptism,
    Marriage,
    Death,
    Confirmation,
    Census,
    Recruitment,
    Other,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Baptism => "baptism",
            RecordType::Marriage => "marriage",
            RecordType::Death => "death",
            RecordType::Confirmation => "confirmation",
            RecordType::Census => "census",
            RecordType::Recruitment => "recruitment",
            RecordType::Other => "other",
        }
    }

    /// Roles whose persons are the subject of the act, in priority order.
    pub fn principal_roles(&self) -> &'static [&'static str] {
        match self {
            RecordType::Baptism => &["batejat"],
            RecordType::Marriage => &["nuvi", "novia"],
            RecordType::Death => &["difunt"],
            RecordType::Confirmation => &["confirmat"],
            RecordType::Census => &["cap_familia"],
            RecordType::Recruitment => &["recluta"],
            RecordType::Other => &[],
        }
    }

    /// Demography bucket fed by a published record of this type.
    pub fn demography_bucket(&self) -> Option<DemographyBucket> {
        match self {
            RecordType::Baptism => Some(DemographyBucket::Births),
            RecordType::Marriage => Some(DemographyBucket::Marriages),
            RecordType::Death => Some(DemographyBucket::Deaths),
            _ => None,
        }
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "baptism" | "baptisme" | "bateig" | "baptismes" => Ok(RecordType::Baptism),
            "marriage" | "matrimoni" | "matrimonis" => Ok(RecordType::Marriage),
            "death" | "obit" | "obits" | "defuncio" | "defunció" => Ok(RecordType::Death),
            "confirmation" | "confirmacio" | "confirmació" | "confirmacions" => {
                Ok(RecordType::Confirmation)
            }
            "census" | "padro" | "padró" | "padrons" => Ok(RecordType::Census),
            "recruitment" | "lleva" | "lleves" => Ok(RecordType::Recruitment),
            "other" | "altres" | "generic" => Ok(RecordType::Other),
            other => Err(format!("unknown record type: '{}'", other)),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Moderation lifecycle of a transcription record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    #[default]
    Pending,
    Published,
    Rejected,
}

impl ModerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Pending => "pending",
            ModerationStatus::Published => "published",
            ModerationStatus::Rejected => "rejected",
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, ModerationStatus::Published)
    }
}

impl FromStr for ModerationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" | "pendent" => Ok(ModerationStatus::Pending),
            "published" | "publicat" => Ok(ModerationStatus::Published),
            "rejected" | "rebutjat" => Ok(ModerationStatus::Rejected),
            other => Err(format!("unknown moderation status: '{}'", other)),
        }
    }
}

impl fmt::Display for ModerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Template visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Public => "public",
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "private" | "privat" => Ok(Visibility::Private),
            "public" => Ok(Visibility::Public),
            other => Err(format!("unknown visibility: '{}'", other)),
        }
    }
}

// ─── Book ───────────────────────────────────────────────────────────

/// A bound ledger to which transcription records belong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Book {
    pub id: i64,
    pub title: String,
    /// Free-text chronology label, e.g. `1801-1820` or `1801.1820`.
    pub chronology: String,
    pub municipality_id: Option<i64>,
    pub archive_id: Option<i64>,
    pub ecclesiastic_entity_id: Option<i64>,
    pub fully_indexed: bool,
    /// Book type label (`baptismes`, `matrimonis`, `obits`, …).
    pub book_type: String,
}

/// Filter for listing books.
#[derive(Debug, Clone, Default)]
pub struct BookFilter {
    pub municipality_id: Option<i64>,
    pub archive_id: Option<i64>,
}

/// Per-book indexing completeness.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookIndexingStats {
    pub book_id: i64,
    pub total_records: i64,
    pub total_fields: i64,
    pub filled_fields: i64,
    /// Rounded percentage, clamped to `[0, 100]`.
    pub percentage: i64,
    pub computed_at: i64,
}

// ─── Transcription record ───────────────────────────────────────────

/// A text value with its independent quality reading.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QualifiedText {
    pub value: String,
    pub quality: Option<Quality>,
}

impl QualifiedText {
    pub fn new(value: impl Into<String>, quality: Option<Quality>) -> Self {
        Self {
            value: value.into(),
            quality,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.trim().is_empty()
    }
}

/// Header of one act recorded in a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionRecord {
    pub id: i64,
    pub book_id: i64,
    pub record_type: RecordType,
    pub page_label: String,
    pub page_position: Option<i64>,
    pub document_year: Option<i32>,
    pub act_date_text: String,
    pub act_date: Option<NaiveDate>,
    pub act_date_quality: Option<Quality>,
    pub literal: String,
    pub marginalia: String,
    pub status: ModerationStatus,
    pub created_by: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TranscriptionRecord {
    pub fn new(book_id: i64, record_type: RecordType) -> Self {
        Self {
            id: 0,
            book_id,
            record_type,
            page_label: String::new(),
            page_position: None,
            document_year: None,
            act_date_text: String::new(),
            act_date: None,
            act_date_quality: None,
            literal: String::new(),
            marginalia: String::new(),
            status: ModerationStatus::Pending,
            created_by: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Year used by roll-ups: the document year, else the act date's year.
    pub fn effective_year(&self) -> Option<i32> {
        use chrono::Datelike;
        self.document_year
            .or_else(|| self.act_date.map(|d| d.year()))
    }

    /// Enforce the act-date quality invariants before persisting.
    ///
    /// An empty quality becomes `clear` when any date was supplied and
    /// `no_record` otherwise; a set ISO date never carries `no_record`.
    pub fn settle_date_quality(&mut self) {
        let has_date = self.act_date.is_some() || !self.act_date_text.trim().is_empty();
        match self.act_date_quality {
            None => {
                self.act_date_quality = Some(if has_date {
                    Quality::Clear
                } else {
                    Quality::NoRecord
                });
            }
            Some(Quality::NoRecord) if self.act_date.is_some() => {
                self.act_date_quality = Some(Quality::Clear);
            }
            _ => {}
        }
    }
}

/// Filter for listing transcription records.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub book_id: Option<i64>,
    pub status: Option<ModerationStatus>,
    /// Restrict to records whose book belongs to this municipality.
    pub municipality_id: Option<i64>,
}

/// Person-level fields addressable by templates and the progress schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersonField {
    GivenName,
    Surname1,
    Surname2,
    MaidenSurname,
    Sex,
    Age,
    CivilStatus,
    Municipality,
    Occupation,
    HouseName,
}

impl PersonField {
    pub const ALL: [PersonField; 10] = [
        PersonField::GivenName,
        PersonField::Surname1,
        PersonField::Surname2,
        PersonField::MaidenSurname,
        PersonField::Sex,
        PersonField::Age,
        PersonField::CivilStatus,
        PersonField::Municipality,
        PersonField::Occupation,
        PersonField::HouseName,
    ];

    /// Template field name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonField::GivenName => "nom",
            PersonField::Surname1 => "cognom1",
            PersonField::Surname2 => "cognom2",
            PersonField::MaidenSurname => "cognom_soltera",
            PersonField::Sex => "sexe",
            PersonField::Age => "edat",
            PersonField::CivilStatus => "estat_civil",
            PersonField::Municipality => "municipi",
            PersonField::Occupation => "ofici",
            PersonField::HouseName => "casa",
        }
    }

    pub fn parse(name: &str) -> Option<PersonField> {
        PersonField::ALL.iter().copied().find(|f| f.as_str() == name)
    }
}

/// A person appearing in a transcription record under a role.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TranscriptionPerson {
    pub id: i64,
    pub record_id: i64,
    pub role: String,
    pub given_name: QualifiedText,
    pub surname1: QualifiedText,
    pub surname2: QualifiedText,
    pub maiden_surname: QualifiedText,
    pub sex: QualifiedText,
    pub age: QualifiedText,
    pub civil_status: QualifiedText,
    pub municipality: QualifiedText,
    pub occupation: QualifiedText,
    pub house_name: QualifiedText,
    pub notes: String,
    /// Optional link to a canonical person entity.
    pub person_id: Option<i64>,
}

impl TranscriptionPerson {
    pub fn with_role(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            ..Default::default()
        }
    }

    pub fn field(&self, field: PersonField) -> &QualifiedText {
        match field {
            PersonField::GivenName => &self.given_name,
            PersonField::Surname1 => &self.surname1,
            PersonField::Surname2 => &self.surname2,
            PersonField::MaidenSurname => &self.maiden_surname,
            PersonField::Sex => &self.sex,
            PersonField::Age => &self.age,
            PersonField::CivilStatus => &self.civil_status,
            PersonField::Municipality => &self.municipality,
            PersonField::Occupation => &self.occupation,
            PersonField::HouseName => &self.house_name,
        }
    }

    pub fn field_mut(&mut self, field: PersonField) -> &mut QualifiedText {
        match field {
            PersonField::GivenName => &mut self.given_name,
            PersonField::Surname1 => &mut self.surname1,
            PersonField::Surname2 => &mut self.surname2,
            PersonField::MaidenSurname => &mut self.maiden_surname,
            PersonField::Sex => &mut self.sex,
            PersonField::Age => &mut self.age,
            PersonField::CivilStatus => &mut self.civil_status,
            PersonField::Municipality => &mut self.municipality,
            PersonField::Occupation => &mut self.occupation,
            PersonField::HouseName => &mut self.house_name,
        }
    }

    /// True when no field carries a value.
    pub fn is_empty(&self) -> bool {
        PersonField::ALL.iter().all(|f| self.field(*f).is_empty()) && self.notes.trim().is_empty()
    }

    /// Fill every empty field of `self` from `other` (missing-wins merge).
    pub fn absorb_missing(&mut self, other: &TranscriptionPerson) {
        for f in PersonField::ALL {
            if self.field(f).is_empty() && !other.field(f).is_empty() {
                *self.field_mut(f) = other.field(f).clone();
            }
        }
        if self.notes.trim().is_empty() {
            self.notes = other.notes.clone();
        }
    }
}

/// Value of a typed attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Text(String),
    Int(i64),
    Date(NaiveDate),
    Bool(bool),
}

impl AttributeValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Text(_) => "text",
            AttributeValue::Int(_) => "int",
            AttributeValue::Date(_) => "date",
            AttributeValue::Bool(_) => "bool",
        }
    }

    /// Display form used by exports and the progress calculator.
    pub fn render(&self) -> String {
        match self {
            AttributeValue::Text(s) => s.clone(),
            AttributeValue::Int(i) => i.to_string(),
            AttributeValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            AttributeValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, AttributeValue::Text(s) if s.trim().is_empty())
    }
}

/// A typed key/value attached to a transcription record.
///
/// At most one value is populated; an attribute may carry only a quality.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TranscriptionAttribute {
    pub id: i64,
    pub record_id: i64,
    pub key: String,
    pub value: Option<AttributeValue>,
    pub quality: Option<Quality>,
    pub notes: String,
}

impl TranscriptionAttribute {
    pub fn has_value(&self) -> bool {
        self.value.as_ref().map(|v| !v.is_empty()).unwrap_or(false)
    }
}

/// A record together with its persons and attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordBundle {
    pub record: TranscriptionRecord,
    pub persons: Vec<TranscriptionPerson>,
    pub attributes: Vec<TranscriptionAttribute>,
}

impl RecordBundle {
    /// First person under the record type's principal roles, in priority order.
    pub fn principal(&self) -> Option<&TranscriptionPerson> {
        principal_person(&self.persons, self.record.record_type.principal_roles())
    }
}

/// First person whose role appears in `roles`, honouring `roles` order.
///
/// Falls back to the first person when `roles` is empty.
pub fn principal_person<'a>(
    persons: &'a [TranscriptionPerson],
    roles: &[impl AsRef<str>],
) -> Option<&'a TranscriptionPerson> {
    if roles.is_empty() {
        return persons.first();
    }
    roles
        .iter()
        .find_map(|role| persons.iter().find(|p| p.role == role.as_ref()))
}

// ─── Templates ──────────────────────────────────────────────────────

/// A stored, user-authored import template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportTemplate {
    pub id: i64,
    pub owner_id: Option<i64>,
    pub name: String,
    pub description: String,
    pub visibility: Visibility,
    pub default_separator: String,
    /// The declarative model document (JSON).
    pub model: serde_json::Value,
    /// SHA-256 of the compact model JSON.
    pub signature: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ImportTemplate {
    pub fn visible_to(&self, viewer: Option<i64>) -> bool {
        self.visibility == Visibility::Public
            || (viewer.is_some() && self.owner_id == viewer)
    }
}

// ─── Dictionaries ───────────────────────────────────────────────────

/// Preferred spelling of a surname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CognomCanonical {
    pub id: i64,
    pub form: String,
    pub key: String,
}

/// A spelling variant grouped under a canonical surname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CognomVariant {
    pub id: i64,
    pub canonical_id: i64,
    pub form: String,
    pub key: String,
    pub published: bool,
}

/// Which dictionary a frequency counter refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NameKind {
    Given,
    Surname,
}

impl NameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NameKind::Given => "nom",
            NameKind::Surname => "cognom",
        }
    }
}

// ─── Counters ───────────────────────────────────────────────────────

/// Demography bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DemographyBucket {
    Births,
    Marriages,
    Deaths,
}

impl DemographyBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            DemographyBucket::Births => "births",
            DemographyBucket::Marriages => "marriages",
            DemographyBucket::Deaths => "deaths",
        }
    }

    pub fn parse(s: &str) -> Option<DemographyBucket> {
        match s {
            "births" => Some(DemographyBucket::Births),
            "marriages" => Some(DemographyBucket::Marriages),
            "deaths" => Some(DemographyBucket::Deaths),
            _ => None,
        }
    }
}

/// Scope a counter is kept for: a municipality or an administrative level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CounterScope {
    Municipality(i64),
    Level(i64),
}

impl CounterScope {
    pub fn kind(&self) -> &'static str {
        match self {
            CounterScope::Municipality(_) => "municipi",
            CounterScope::Level(_) => "nivell",
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            CounterScope::Municipality(id) | CounterScope::Level(id) => *id,
        }
    }

    pub fn from_parts(kind: &str, id: i64) -> Option<CounterScope> {
        match kind {
            "municipi" => Some(CounterScope::Municipality(id)),
            "nivell" => Some(CounterScope::Level(id)),
            _ => None,
        }
    }
}

// ─── Search ─────────────────────────────────────────────────────────

/// Kind of publishable entity a search document describes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum SearchEntity {
    Persona,
    #[default]
    Registre,
    ArbreNode,
    Arbre,
}

impl SearchEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchEntity::Persona => "persona",
            SearchEntity::Registre => "registre",
            SearchEntity::ArbreNode => "arbre_node",
            SearchEntity::Arbre => "arbre",
        }
    }

    pub fn parse(s: &str) -> Option<SearchEntity> {
        match s {
            "persona" => Some(SearchEntity::Persona),
            "registre" => Some(SearchEntity::Registre),
            "arbre_node" => Some(SearchEntity::ArbreNode),
            "arbre" => Some(SearchEntity::Arbre),
            _ => None,
        }
    }
}

/// Denormalized, tokenized document describing one publishable entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchDoc {
    pub entity: SearchEntity,
    pub entity_id: i64,
    pub given_norm: String,
    pub surnames_norm: String,
    pub full_norm: String,
    pub person_tokens: String,
    pub surname_tokens: String,
    pub person_phonetic: String,
    pub surname_phonetic: String,
    pub surname_canon: String,
    pub municipality_id: Option<i64>,
    pub book_id: Option<i64>,
    pub archive_id: Option<i64>,
    pub ecclesiastic_entity_id: Option<i64>,
    pub act_date: Option<NaiveDate>,
    pub act_year: Option<i32>,
}

// ─── Activity and achievements ──────────────────────────────────────

/// One entry of the user-activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserActivity {
    pub id: i64,
    pub user_id: i64,
    pub rule_code: String,
    pub action: String,
    pub object_type: String,
    pub object_id: i64,
    pub points: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub details: serde_json::Value,
}

/// An achievement definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: i64,
    pub code: String,
    pub name: String,
    /// Declarative rule (see [`crate::achievements::AchievementRule`]).
    pub rule: serde_json::Value,
    pub repeatable: bool,
    pub enabled: bool,
    pub event_start: Option<DateTime<Utc>>,
    pub event_end: Option<DateTime<Utc>>,
}

/// An achievement awarded to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAchievement {
    pub id: i64,
    pub user_id: i64,
    pub achievement_id: i64,
    pub awarded_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

// ─── Territory ──────────────────────────────────────────────────────

/// Number of administrative-level slots a municipality carries.
pub const LEVEL_SLOTS: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    pub id: i64,
    /// ISO-3166 alpha-2.
    pub iso2: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminLevel {
    pub id: i64,
    pub country_id: i64,
    /// Depth of this level (1 = top).
    pub depth: i32,
    pub name: String,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Municipality {
    pub id: i64,
    pub name: String,
    pub country_id: Option<i64>,
    pub levels: [Option<i64>; LEVEL_SLOTS],
    pub parent_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_quality_keeps_worse() {
        assert_eq!(
            merge_quality(Some(Quality::Clear), Some(Quality::Doubtful)),
            Some(Quality::Doubtful)
        );
        assert_eq!(
            merge_quality(Some(Quality::NoRecord), Some(Quality::Clear)),
            Some(Quality::NoRecord)
        );
        assert_eq!(merge_quality(None, Some(Quality::Clear)), Some(Quality::Clear));
        assert_eq!(merge_quality(None, None), None);
    }

    #[test]
    fn test_merge_quality_monotone() {
        let all = [
            None,
            Some(Quality::Clear),
            Some(Quality::Doubtful),
            Some(Quality::Incomplete),
            Some(Quality::Illegible),
            Some(Quality::NoRecord),
        ];
        for a in all {
            for b in all {
                let m = merge_quality(a, b);
                assert!(quality_rank(m) >= quality_rank(a).max(quality_rank(b)));
            }
        }
    }

    #[test]
    fn test_quality_parse_aliases() {
        assert_eq!(Quality::parse("clar"), Some(Quality::Clear));
        assert_eq!(Quality::parse("no_consta"), Some(Quality::NoRecord));
        assert_eq!(Quality::parse("il·legible"), Some(Quality::Illegible));
        assert_eq!(Quality::parse(""), None);
    }

    #[test]
    fn test_settle_date_quality() {
        let mut r = TranscriptionRecord::new(1, RecordType::Baptism);
        r.settle_date_quality();
        assert_eq!(r.act_date_quality, Some(Quality::NoRecord));

        let mut r = TranscriptionRecord::new(1, RecordType::Baptism);
        r.act_date = NaiveDate::from_ymd_opt(1803, 3, 12);
        r.act_date_quality = Some(Quality::NoRecord);
        r.settle_date_quality();
        assert_eq!(r.act_date_quality, Some(Quality::Clear));
    }

    #[test]
    fn test_principal_person_priority() {
        let persons = vec![
            TranscriptionPerson::with_role("novia"),
            TranscriptionPerson::with_role("nuvi"),
        ];
        let p = principal_person(&persons, RecordType::Marriage.principal_roles()).unwrap();
        assert_eq!(p.role, "nuvi");
    }
}
