//! Storage abstraction for Arxiu.
//!
//! The [`Store`] trait is the data-access capability every core component
//! goes through: books, transcription records with their persons and
//! attributes, the territory hierarchy, denormalized counters, the surname
//! and given-name dictionaries, search documents, templates, and the
//! activity/achievement tables.
//!
//! Each method is individually atomic; the core never asks for a
//! multi-statement transaction. Implementations must be `Send + Sync` to
//! work with async runtimes.

pub mod memory;

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{
    Achievement, AdminLevel, Book, BookFilter, BookIndexingStats, CognomCanonical, CognomVariant,
    CounterScope, Country, DemographyBucket, ImportTemplate, Municipality, NameKind, RecordBundle,
    RecordFilter, SearchDoc, SearchEntity, TranscriptionAttribute, TranscriptionPerson,
    TranscriptionRecord, UserAchievement, UserActivity,
};

/// One demography counter row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DemographyRow {
    pub scope: CounterScope,
    pub year: i32,
    pub bucket: DemographyBucket,
    pub count: i64,
}

/// One name/surname frequency row. `year == None` is the all-years total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrequencyRow {
    pub kind: NameKind,
    pub entity_id: i64,
    pub scope: CounterScope,
    pub year: Option<i32>,
    pub count: i64,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Group | Methods |
/// |-------|---------|
/// | Books | [`upsert_book`](Store::upsert_book), [`list_books`](Store::list_books), [`save_book_stats`](Store::save_book_stats) |
/// | Records | [`insert_record`](Store::insert_record), [`update_record`](Store::update_record), [`list_records`](Store::list_records), persons, attributes |
/// | Territory | countries, levels, municipalities, [`admin_ancestors`](Store::admin_ancestors) |
/// | Counters | [`apply_demography_delta`](Store::apply_demography_delta), [`apply_frequency_delta`](Store::apply_frequency_delta) |
/// | Dictionaries | [`find_cognom_by_key`](Store::find_cognom_by_key), [`find_or_create_given_name`](Store::find_or_create_given_name) |
/// | Search | [`upsert_search_doc`](Store::upsert_search_doc), [`search_candidates`](Store::search_candidates) |
/// | Templates | [`insert_template`](Store::insert_template), [`list_templates`](Store::list_templates) |
/// | Achievements | [`append_activity`](Store::append_activity), [`award_achievement`](Store::award_achievement) |
#[async_trait]
pub trait Store: Send + Sync {
    // ── Books ──

    /// Insert (id 0) or replace a book. Returns its id.
    async fn upsert_book(&self, book: &Book) -> Result<i64>;

    async fn get_book(&self, id: i64) -> Result<Option<Book>>;

    /// Books matching the filter, ordered by id.
    async fn list_books(&self, filter: &BookFilter) -> Result<Vec<Book>>;

    async fn save_book_stats(&self, stats: &BookIndexingStats) -> Result<()>;

    async fn get_book_stats(&self, book_id: i64) -> Result<Option<BookIndexingStats>>;

    // ── Records ──

    /// Insert a record header. Returns the new id.
    async fn insert_record(&self, record: &TranscriptionRecord) -> Result<i64>;

    /// Overwrite a record header by id.
    async fn update_record(&self, record: &TranscriptionRecord) -> Result<()>;

    async fn get_record(&self, id: i64) -> Result<Option<TranscriptionRecord>>;

    /// Records matching the filter, ordered by id.
    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<TranscriptionRecord>>;

    async fn insert_person(&self, person: &TranscriptionPerson) -> Result<i64>;

    /// Persons of a record, in insertion order.
    async fn list_persons(&self, record_id: i64) -> Result<Vec<TranscriptionPerson>>;

    async fn insert_attribute(&self, attr: &TranscriptionAttribute) -> Result<i64>;

    /// Attributes of a record, in insertion order.
    async fn list_attributes(&self, record_id: i64) -> Result<Vec<TranscriptionAttribute>>;

    /// Number of records per non-empty page label in a book.
    async fn page_record_counts(&self, book_id: i64) -> Result<HashMap<String, i64>>;

    /// Record header plus persons and attributes.
    async fn load_bundle(&self, record_id: i64) -> Result<Option<RecordBundle>> {
        let Some(record) = self.get_record(record_id).await? else {
            return Ok(None);
        };
        let persons = self.list_persons(record_id).await?;
        let attributes = self.list_attributes(record_id).await?;
        Ok(Some(RecordBundle {
            record,
            persons,
            attributes,
        }))
    }

    // ── Territory ──

    async fn insert_country(&self, country: &Country) -> Result<i64>;

    async fn list_countries(&self) -> Result<Vec<Country>>;

    async fn insert_level(&self, level: &AdminLevel) -> Result<i64>;

    async fn set_level_parent(&self, id: i64, parent_id: Option<i64>) -> Result<()>;

    async fn get_level(&self, id: i64) -> Result<Option<AdminLevel>>;

    async fn list_levels(&self) -> Result<Vec<AdminLevel>>;

    async fn insert_municipality(&self, municipality: &Municipality) -> Result<i64>;

    async fn set_municipality_parent(&self, id: i64, parent_id: Option<i64>) -> Result<()>;

    async fn get_municipality(&self, id: i64) -> Result<Option<Municipality>>;

    async fn list_municipalities(&self) -> Result<Vec<Municipality>>;

    /// Administrative levels containing a municipality: its level slots
    /// plus every level reachable through `parent_id`, deduplicated, in
    /// slot-then-parent order.
    async fn admin_ancestors(&self, municipality_id: i64) -> Result<Vec<i64>> {
        let Some(m) = self.get_municipality(municipality_id).await? else {
            return Ok(Vec::new());
        };
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for slot in m.levels.iter().flatten() {
            let mut next = Some(*slot);
            while let Some(id) = next {
                if !seen.insert(id) {
                    break;
                }
                out.push(id);
                next = self.get_level(id).await?.and_then(|l| l.parent_id);
            }
        }
        Ok(out)
    }

    /// Municipalities whose administrative ancestors include `level_id`.
    async fn municipalities_in_level(&self, level_id: i64) -> Result<Vec<i64>> {
        let mut out = Vec::new();
        for m in self.list_municipalities().await? {
            if self.admin_ancestors(m.id).await?.contains(&level_id) {
                out.push(m.id);
            }
        }
        Ok(out)
    }

    // ── Counters ──

    /// Add `delta` to a demography counter. Rows reaching zero are removed.
    async fn apply_demography_delta(
        &self,
        scope: CounterScope,
        year: i32,
        bucket: DemographyBucket,
        delta: i64,
    ) -> Result<()>;

    async fn demography_count(
        &self,
        scope: CounterScope,
        year: i32,
        bucket: DemographyBucket,
    ) -> Result<i64>;

    /// Demography rows, all scopes when `scope` is `None`, ordered.
    async fn demography_rows(&self, scope: Option<CounterScope>) -> Result<Vec<DemographyRow>>;

    async fn clear_demography(&self, scope: Option<CounterScope>) -> Result<()>;

    /// Add `delta` to the per-year row (when `year` is set) and to the
    /// all-years total of a name/surname frequency.
    async fn apply_frequency_delta(
        &self,
        kind: NameKind,
        entity_id: i64,
        scope: CounterScope,
        year: Option<i32>,
        delta: i64,
    ) -> Result<()>;

    /// Per-year count, or the total when `year` is `None`.
    async fn frequency_count(
        &self,
        kind: NameKind,
        entity_id: i64,
        scope: CounterScope,
        year: Option<i32>,
    ) -> Result<i64>;

    async fn frequency_rows(&self, scope: Option<CounterScope>) -> Result<Vec<FrequencyRow>>;

    async fn clear_frequencies(&self, scope: Option<CounterScope>) -> Result<()>;

    // ── Dictionaries ──

    /// Canonical surname whose key, or one of whose published variants'
    /// keys, equals `key`.
    async fn find_cognom_by_key(&self, key: &str) -> Result<Option<CognomCanonical>>;

    async fn get_cognom(&self, id: i64) -> Result<Option<CognomCanonical>>;

    async fn create_cognom(&self, form: &str, key: &str) -> Result<CognomCanonical>;

    async fn add_cognom_variant(
        &self,
        canonical_id: i64,
        form: &str,
        key: &str,
        published: bool,
    ) -> Result<i64>;

    async fn list_cognom_variants(&self, canonical_id: i64) -> Result<Vec<CognomVariant>>;

    /// Id of the given name with this key, creating it from `form` if new.
    async fn find_or_create_given_name(&self, key: &str, form: &str) -> Result<i64>;

    // ── Search ──

    /// Insert or replace the document keyed by `(entity, entity_id)`.
    async fn upsert_search_doc(&self, doc: &SearchDoc) -> Result<()>;

    async fn delete_search_doc(&self, entity: SearchEntity, entity_id: i64) -> Result<()>;

    async fn get_search_doc(&self, entity: SearchEntity, entity_id: i64)
        -> Result<Option<SearchDoc>>;

    async fn list_search_docs(&self, entity: Option<SearchEntity>) -> Result<Vec<SearchDoc>>;

    async fn clear_search_docs(&self, entity: Option<SearchEntity>) -> Result<()>;

    /// Documents whose token, phonetic or canonical-surname fields contain
    /// any of `terms` as a whole word, at most `limit`.
    async fn search_candidates(&self, terms: &[String], limit: i64) -> Result<Vec<SearchDoc>>;

    // ── Templates ──

    async fn insert_template(&self, template: &ImportTemplate) -> Result<i64>;

    async fn update_template(&self, template: &ImportTemplate) -> Result<()>;

    async fn get_template(&self, id: i64) -> Result<Option<ImportTemplate>>;

    /// All templates, ordered by id.
    async fn list_templates(&self) -> Result<Vec<ImportTemplate>>;

    // ── Activity and achievements ──

    async fn append_activity(&self, activity: &UserActivity) -> Result<i64>;

    /// Activities of a user, oldest first.
    async fn list_activities(&self, user_id: i64) -> Result<Vec<UserActivity>>;

    async fn insert_achievement(&self, achievement: &Achievement) -> Result<i64>;

    async fn list_achievements(&self) -> Result<Vec<Achievement>>;

    async fn has_user_achievement(&self, user_id: i64, achievement_id: i64) -> Result<bool>;

    async fn award_achievement(&self, award: &UserAchievement) -> Result<i64>;

    async fn list_user_achievements(&self, user_id: i64) -> Result<Vec<UserAchievement>>;
}

/// True when `field` (space-separated words) contains `term` as a word.
pub fn contains_word(field: &str, term: &str) -> bool {
    field.split_whitespace().any(|w| w == term)
}
