//! In-memory [`Store`] implementation, used by tests and by callers without a database.
//!
//! Uses `HashMap`, `BTreeMap` and `Vec` behind `std::sync::RwLock` for
//! thread safety. Search candidates are found by a linear scan over the
//! stored documents.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{
    Achievement, AdminLevel, Book, BookFilter, BookIndexingStats, CognomCanonical, CognomVariant,
    CounterScope, Country, DemographyBucket, ImportTemplate, Municipality, NameKind, RecordFilter,
    SearchDoc, SearchEntity, TranscriptionAttribute, TranscriptionPerson, TranscriptionRecord,
    UserAchievement, UserActivity,
};

use super::{contains_word, DemographyRow, FrequencyRow, Store};

#[derive(Default)]
struct RecordTables {
    records: BTreeMap<i64, TranscriptionRecord>,
    persons: Vec<TranscriptionPerson>,
    attributes: Vec<TranscriptionAttribute>,
}

#[derive(Default)]
struct TerritoryTables {
    countries: BTreeMap<i64, Country>,
    levels: BTreeMap<i64, AdminLevel>,
    municipalities: BTreeMap<i64, Municipality>,
}

type DemographyKey = (CounterScope, i32, DemographyBucket);
type FrequencyKey = (NameKind, i64, CounterScope, Option<i32>);

#[derive(Default)]
struct CounterTables {
    demography: HashMap<DemographyKey, i64>,
    frequencies: HashMap<FrequencyKey, i64>,
}

#[derive(Default)]
struct DictionaryTables {
    cognoms: BTreeMap<i64, CognomCanonical>,
    variants: Vec<CognomVariant>,
    given_names: HashMap<String, i64>,
}

#[derive(Default)]
struct AchievementTables {
    activities: Vec<UserActivity>,
    achievements: BTreeMap<i64, Achievement>,
    awards: Vec<UserAchievement>,
}

/// In-memory store.
pub struct InMemoryStore {
    next_id: AtomicI64,
    fail_record_writes: AtomicBool,
    books: RwLock<BTreeMap<i64, Book>>,
    book_stats: RwLock<HashMap<i64, BookIndexingStats>>,
    records: RwLock<RecordTables>,
    territory: RwLock<TerritoryTables>,
    counters: RwLock<CounterTables>,
    dictionaries: RwLock<DictionaryTables>,
    search: RwLock<BTreeMap<(SearchEntity, i64), SearchDoc>>,
    templates: RwLock<BTreeMap<i64, ImportTemplate>>,
    achievements: RwLock<AchievementTables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            fail_record_writes: AtomicBool::new(false),
            books: RwLock::new(BTreeMap::new()),
            book_stats: RwLock::new(HashMap::new()),
            records: RwLock::new(RecordTables::default()),
            territory: RwLock::new(TerritoryTables::default()),
            counters: RwLock::new(CounterTables::default()),
            dictionaries: RwLock::new(DictionaryTables::default()),
            search: RwLock::new(BTreeMap::new()),
            templates: RwLock::new(BTreeMap::new()),
            achievements: RwLock::new(AchievementTables::default()),
        }
    }

    /// Make record/person/attribute writes fail, to exercise storage
    /// error paths.
    pub fn fail_record_writes(&self, fail: bool) {
        self.fail_record_writes.store(fail, Ordering::SeqCst);
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn check_record_writes(&self) -> Result<()> {
        if self.fail_record_writes.load(Ordering::SeqCst) {
            bail!("record storage is read-only");
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn scope_matches(scope: &CounterScope, filter: Option<CounterScope>) -> bool {
    filter.map(|f| f == *scope).unwrap_or(true)
}

fn bump<K: Hash + Eq>(map: &mut HashMap<K, i64>, key: K, delta: i64) {
    let count = map.get(&key).copied().unwrap_or(0) + delta;
    if count > 0 {
        map.insert(key, count);
    } else {
        map.remove(&key);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_book(&self, book: &Book) -> Result<i64> {
        let mut book = book.clone();
        if book.id == 0 {
            book.id = self.next_id();
        }
        let id = book.id;
        self.books.write().unwrap().insert(id, book);
        Ok(id)
    }

    async fn get_book(&self, id: i64) -> Result<Option<Book>> {
        Ok(self.books.read().unwrap().get(&id).cloned())
    }

    async fn list_books(&self, filter: &BookFilter) -> Result<Vec<Book>> {
        Ok(self
            .books
            .read()
            .unwrap()
            .values()
            .filter(|b| {
                filter
                    .municipality_id
                    .map(|m| b.municipality_id == Some(m))
                    .unwrap_or(true)
                    && filter
                        .archive_id
                        .map(|a| b.archive_id == Some(a))
                        .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn save_book_stats(&self, stats: &BookIndexingStats) -> Result<()> {
        self.book_stats
            .write()
            .unwrap()
            .insert(stats.book_id, stats.clone());
        Ok(())
    }

    async fn get_book_stats(&self, book_id: i64) -> Result<Option<BookIndexingStats>> {
        Ok(self.book_stats.read().unwrap().get(&book_id).cloned())
    }

    async fn insert_record(&self, record: &TranscriptionRecord) -> Result<i64> {
        self.check_record_writes()?;
        let mut record = record.clone();
        record.id = self.next_id();
        let id = record.id;
        self.records.write().unwrap().records.insert(id, record);
        Ok(id)
    }

    async fn update_record(&self, record: &TranscriptionRecord) -> Result<()> {
        self.check_record_writes()?;
        let mut tables = self.records.write().unwrap();
        match tables.records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => bail!("record {} not found", record.id),
        }
    }

    async fn get_record(&self, id: i64) -> Result<Option<TranscriptionRecord>> {
        Ok(self.records.read().unwrap().records.get(&id).cloned())
    }

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<TranscriptionRecord>> {
        let books_in_municipality: Option<Vec<i64>> = filter.municipality_id.map(|m| {
            self.books
                .read()
                .unwrap()
                .values()
                .filter(|b| b.municipality_id == Some(m))
                .map(|b| b.id)
                .collect()
        });
        Ok(self
            .records
            .read()
            .unwrap()
            .records
            .values()
            .filter(|r| filter.book_id.map(|b| r.book_id == b).unwrap_or(true))
            .filter(|r| filter.status.map(|s| r.status == s).unwrap_or(true))
            .filter(|r| {
                books_in_municipality
                    .as_ref()
                    .map(|ids| ids.contains(&r.book_id))
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn insert_person(&self, person: &TranscriptionPerson) -> Result<i64> {
        self.check_record_writes()?;
        let mut person = person.clone();
        person.id = self.next_id();
        let id = person.id;
        self.records.write().unwrap().persons.push(person);
        Ok(id)
    }

    async fn list_persons(&self, record_id: i64) -> Result<Vec<TranscriptionPerson>> {
        Ok(self
            .records
            .read()
            .unwrap()
            .persons
            .iter()
            .filter(|p| p.record_id == record_id)
            .cloned()
            .collect())
    }

    async fn insert_attribute(&self, attr: &TranscriptionAttribute) -> Result<i64> {
        self.check_record_writes()?;
        let mut attr = attr.clone();
        attr.id = self.next_id();
        let id = attr.id;
        self.records.write().unwrap().attributes.push(attr);
        Ok(id)
    }

    async fn list_attributes(&self, record_id: i64) -> Result<Vec<TranscriptionAttribute>> {
        Ok(self
            .records
            .read()
            .unwrap()
            .attributes
            .iter()
            .filter(|a| a.record_id == record_id)
            .cloned()
            .collect())
    }

    async fn page_record_counts(&self, book_id: i64) -> Result<HashMap<String, i64>> {
        let mut counts = HashMap::new();
        for r in self.records.read().unwrap().records.values() {
            let page = r.page_label.trim();
            if r.book_id == book_id && !page.is_empty() {
                *counts.entry(page.to_string()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn insert_country(&self, country: &Country) -> Result<i64> {
        let mut country = country.clone();
        if country.id == 0 {
            country.id = self.next_id();
        }
        let id = country.id;
        self.territory.write().unwrap().countries.insert(id, country);
        Ok(id)
    }

    async fn list_countries(&self) -> Result<Vec<Country>> {
        Ok(self
            .territory
            .read()
            .unwrap()
            .countries
            .values()
            .cloned()
            .collect())
    }

    async fn insert_level(&self, level: &AdminLevel) -> Result<i64> {
        let mut level = level.clone();
        if level.id == 0 {
            level.id = self.next_id();
        }
        let id = level.id;
        self.territory.write().unwrap().levels.insert(id, level);
        Ok(id)
    }

    async fn set_level_parent(&self, id: i64, parent_id: Option<i64>) -> Result<()> {
        let mut t = self.territory.write().unwrap();
        match t.levels.get_mut(&id) {
            Some(level) => {
                level.parent_id = parent_id;
                Ok(())
            }
            None => bail!("administrative level {} not found", id),
        }
    }

    async fn get_level(&self, id: i64) -> Result<Option<AdminLevel>> {
        Ok(self.territory.read().unwrap().levels.get(&id).cloned())
    }

    async fn list_levels(&self) -> Result<Vec<AdminLevel>> {
        Ok(self
            .territory
            .read()
            .unwrap()
            .levels
            .values()
            .cloned()
            .collect())
    }

    async fn insert_municipality(&self, municipality: &Municipality) -> Result<i64> {
        let mut municipality = municipality.clone();
        if municipality.id == 0 {
            municipality.id = self.next_id();
        }
        let id = municipality.id;
        self.territory
            .write()
            .unwrap()
            .municipalities
            .insert(id, municipality);
        Ok(id)
    }

    async fn set_municipality_parent(&self, id: i64, parent_id: Option<i64>) -> Result<()> {
        let mut t = self.territory.write().unwrap();
        match t.municipalities.get_mut(&id) {
            Some(m) => {
                m.parent_id = parent_id;
                Ok(())
            }
            None => bail!("municipality {} not found", id),
        }
    }

    async fn get_municipality(&self, id: i64) -> Result<Option<Municipality>> {
        Ok(self
            .territory
            .read()
            .unwrap()
            .municipalities
            .get(&id)
            .cloned())
    }

    async fn list_municipalities(&self) -> Result<Vec<Municipality>> {
        Ok(self
            .territory
            .read()
            .unwrap()
            .municipalities
            .values()
            .cloned()
            .collect())
    }

    async fn apply_demography_delta(
        &self,
        scope: CounterScope,
        year: i32,
        bucket: DemographyBucket,
        delta: i64,
    ) -> Result<()> {
        let mut c = self.counters.write().unwrap();
        bump(&mut c.demography, (scope, year, bucket), delta);
        Ok(())
    }

    async fn demography_count(
        &self,
        scope: CounterScope,
        year: i32,
        bucket: DemographyBucket,
    ) -> Result<i64> {
        Ok(self
            .counters
            .read()
            .unwrap()
            .demography
            .get(&(scope, year, bucket))
            .copied()
            .unwrap_or(0))
    }

    async fn demography_rows(&self, scope: Option<CounterScope>) -> Result<Vec<DemographyRow>> {
        let mut rows: Vec<DemographyRow> = self
            .counters
            .read()
            .unwrap()
            .demography
            .iter()
            .filter(|((s, _, _), _)| scope_matches(s, scope))
            .map(|((s, year, bucket), count)| DemographyRow {
                scope: *s,
                year: *year,
                bucket: *bucket,
                count: *count,
            })
            .collect();
        rows.sort_by_key(|r| (r.scope.kind(), r.scope.id(), r.year, r.bucket.as_str()));
        Ok(rows)
    }

    async fn clear_demography(&self, scope: Option<CounterScope>) -> Result<()> {
        self.counters
            .write()
            .unwrap()
            .demography
            .retain(|(s, _, _), _| !scope_matches(s, scope));
        Ok(())
    }

    async fn apply_frequency_delta(
        &self,
        kind: NameKind,
        entity_id: i64,
        scope: CounterScope,
        year: Option<i32>,
        delta: i64,
    ) -> Result<()> {
        let mut c = self.counters.write().unwrap();
        if year.is_some() {
            bump(&mut c.frequencies, (kind, entity_id, scope, year), delta);
        }
        bump(&mut c.frequencies, (kind, entity_id, scope, None), delta);
        Ok(())
    }

    async fn frequency_count(
        &self,
        kind: NameKind,
        entity_id: i64,
        scope: CounterScope,
        year: Option<i32>,
    ) -> Result<i64> {
        Ok(self
            .counters
            .read()
            .unwrap()
            .frequencies
            .get(&(kind, entity_id, scope, year))
            .copied()
            .unwrap_or(0))
    }

    async fn frequency_rows(&self, scope: Option<CounterScope>) -> Result<Vec<FrequencyRow>> {
        let mut rows: Vec<FrequencyRow> = self
            .counters
            .read()
            .unwrap()
            .frequencies
            .iter()
            .filter(|((_, _, s, _), _)| scope_matches(s, scope))
            .map(|((kind, entity_id, s, year), count)| FrequencyRow {
                kind: *kind,
                entity_id: *entity_id,
                scope: *s,
                year: *year,
                count: *count,
            })
            .collect();
        rows.sort_by_key(|r| {
            (
                r.kind.as_str(),
                r.entity_id,
                r.scope.kind(),
                r.scope.id(),
                r.year,
            )
        });
        Ok(rows)
    }

    async fn clear_frequencies(&self, scope: Option<CounterScope>) -> Result<()> {
        self.counters
            .write()
            .unwrap()
            .frequencies
            .retain(|(_, _, s, _), _| !scope_matches(s, scope));
        Ok(())
    }

    async fn find_cognom_by_key(&self, key: &str) -> Result<Option<CognomCanonical>> {
        let d = self.dictionaries.read().unwrap();
        if let Some(c) = d.cognoms.values().find(|c| c.key == key) {
            return Ok(Some(c.clone()));
        }
        Ok(d
            .variants
            .iter()
            .find(|v| v.published && v.key == key)
            .and_then(|v| d.cognoms.get(&v.canonical_id))
            .cloned())
    }

    async fn get_cognom(&self, id: i64) -> Result<Option<CognomCanonical>> {
        Ok(self.dictionaries.read().unwrap().cognoms.get(&id).cloned())
    }

    async fn create_cognom(&self, form: &str, key: &str) -> Result<CognomCanonical> {
        let c = CognomCanonical {
            id: self.next_id(),
            form: form.to_string(),
            key: key.to_string(),
        };
        self.dictionaries
            .write()
            .unwrap()
            .cognoms
            .insert(c.id, c.clone());
        Ok(c)
    }

    async fn add_cognom_variant(
        &self,
        canonical_id: i64,
        form: &str,
        key: &str,
        published: bool,
    ) -> Result<i64> {
        let mut d = self.dictionaries.write().unwrap();
        if !d.cognoms.contains_key(&canonical_id) {
            bail!("canonical surname {} not found", canonical_id);
        }
        let id = self.next_id();
        d.variants.push(CognomVariant {
            id,
            canonical_id,
            form: form.to_string(),
            key: key.to_string(),
            published,
        });
        Ok(id)
    }

    async fn list_cognom_variants(&self, canonical_id: i64) -> Result<Vec<CognomVariant>> {
        Ok(self
            .dictionaries
            .read()
            .unwrap()
            .variants
            .iter()
            .filter(|v| v.canonical_id == canonical_id)
            .cloned()
            .collect())
    }

    async fn find_or_create_given_name(&self, key: &str, _form: &str) -> Result<i64> {
        let mut d = self.dictionaries.write().unwrap();
        if let Some(id) = d.given_names.get(key) {
            return Ok(*id);
        }
        let id = self.next_id();
        d.given_names.insert(key.to_string(), id);
        Ok(id)
    }

    async fn upsert_search_doc(&self, doc: &SearchDoc) -> Result<()> {
        self.search
            .write()
            .unwrap()
            .insert((doc.entity, doc.entity_id), doc.clone());
        Ok(())
    }

    async fn delete_search_doc(&self, entity: SearchEntity, entity_id: i64) -> Result<()> {
        self.search.write().unwrap().remove(&(entity, entity_id));
        Ok(())
    }

    async fn get_search_doc(
        &self,
        entity: SearchEntity,
        entity_id: i64,
    ) -> Result<Option<SearchDoc>> {
        Ok(self.search.read().unwrap().get(&(entity, entity_id)).cloned())
    }

    async fn list_search_docs(&self, entity: Option<SearchEntity>) -> Result<Vec<SearchDoc>> {
        Ok(self
            .search
            .read()
            .unwrap()
            .values()
            .filter(|d| entity.map(|e| d.entity == e).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn clear_search_docs(&self, entity: Option<SearchEntity>) -> Result<()> {
        self.search
            .write()
            .unwrap()
            .retain(|(e, _), _| entity.map(|want| *e != want).unwrap_or(false));
        Ok(())
    }

    async fn search_candidates(&self, terms: &[String], limit: i64) -> Result<Vec<SearchDoc>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let docs = self.search.read().unwrap();
        Ok(docs
            .values()
            .filter(|d| {
                terms.iter().any(|t| {
                    contains_word(&d.person_tokens, t)
                        || contains_word(&d.surname_tokens, t)
                        || contains_word(&d.person_phonetic, t)
                        || contains_word(&d.surname_canon, t)
                })
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn insert_template(&self, template: &ImportTemplate) -> Result<i64> {
        let mut template = template.clone();
        template.id = self.next_id();
        let id = template.id;
        self.templates.write().unwrap().insert(id, template);
        Ok(id)
    }

    async fn update_template(&self, template: &ImportTemplate) -> Result<()> {
        let mut t = self.templates.write().unwrap();
        match t.get_mut(&template.id) {
            Some(existing) => {
                *existing = template.clone();
                Ok(())
            }
            None => bail!("template {} not found", template.id),
        }
    }

    async fn get_template(&self, id: i64) -> Result<Option<ImportTemplate>> {
        Ok(self.templates.read().unwrap().get(&id).cloned())
    }

    async fn list_templates(&self) -> Result<Vec<ImportTemplate>> {
        Ok(self.templates.read().unwrap().values().cloned().collect())
    }

    async fn append_activity(&self, activity: &UserActivity) -> Result<i64> {
        let mut activity = activity.clone();
        activity.id = self.next_id();
        let id = activity.id;
        self.achievements.write().unwrap().activities.push(activity);
        Ok(id)
    }

    async fn list_activities(&self, user_id: i64) -> Result<Vec<UserActivity>> {
        Ok(self
            .achievements
            .read()
            .unwrap()
            .activities
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_achievement(&self, achievement: &Achievement) -> Result<i64> {
        let mut achievement = achievement.clone();
        achievement.id = self.next_id();
        let id = achievement.id;
        self.achievements
            .write()
            .unwrap()
            .achievements
            .insert(id, achievement);
        Ok(id)
    }

    async fn list_achievements(&self) -> Result<Vec<Achievement>> {
        Ok(self
            .achievements
            .read()
            .unwrap()
            .achievements
            .values()
            .cloned()
            .collect())
    }

    async fn has_user_achievement(&self, user_id: i64, achievement_id: i64) -> Result<bool> {
        Ok(self
            .achievements
            .read()
            .unwrap()
            .awards
            .iter()
            .any(|a| a.user_id == user_id && a.achievement_id == achievement_id))
    }

    async fn award_achievement(&self, award: &UserAchievement) -> Result<i64> {
        let mut award = award.clone();
        award.id = self.next_id();
        let id = award.id;
        self.achievements.write().unwrap().awards.push(award);
        Ok(id)
    }

    async fn list_user_achievements(&self, user_id: i64) -> Result<Vec<UserAchievement>> {
        Ok(self
            .achievements
            .read()
            .unwrap()
            .awards
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters_drop_zero_rows() {
        let store = InMemoryStore::new();
        let scope = CounterScope::Municipality(7);
        store
            .apply_demography_delta(scope, 1803, DemographyBucket::Births, 1)
            .await
            .unwrap();
        assert_eq!(store.demography_rows(None).await.unwrap().len(), 1);
        store
            .apply_demography_delta(scope, 1803, DemographyBucket::Births, -1)
            .await
            .unwrap();
        assert!(store.demography_rows(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_frequency_delta_updates_year_and_total() {
        let store = InMemoryStore::new();
        let scope = CounterScope::Level(3);
        store
            .apply_frequency_delta(NameKind::Surname, 10, scope, Some(1803), 1)
            .await
            .unwrap();
        store
            .apply_frequency_delta(NameKind::Surname, 10, scope, Some(1804), 1)
            .await
            .unwrap();
        assert_eq!(
            store
                .frequency_count(NameKind::Surname, 10, scope, Some(1803))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .frequency_count(NameKind::Surname, 10, scope, None)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_cognom_lookup_through_published_variant() {
        let store = InMemoryStore::new();
        let puig = store.create_cognom("Puig", "PUIG").await.unwrap();
        store
            .add_cognom_variant(puig.id, "Puch", "PUCH", true)
            .await
            .unwrap();
        store
            .add_cognom_variant(puig.id, "Pujg", "PUJG", false)
            .await
            .unwrap();
        assert_eq!(
            store.find_cognom_by_key("PUCH").await.unwrap().map(|c| c.id),
            Some(puig.id)
        );
        assert!(store.find_cognom_by_key("PUJG").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_admin_ancestors_follow_parents() {
        let store = InMemoryStore::new();
        let top = store
            .insert_level(&AdminLevel {
                id: 0,
                country_id: 1,
                depth: 1,
                name: "Catalunya".into(),
                parent_id: None,
            })
            .await
            .unwrap();
        let comarca = store
            .insert_level(&AdminLevel {
                id: 0,
                country_id: 1,
                depth: 3,
                name: "Alt Camp".into(),
                parent_id: Some(top),
            })
            .await
            .unwrap();
        let mut levels = [None; crate::models::LEVEL_SLOTS];
        levels[2] = Some(comarca);
        let m = store
            .insert_municipality(&Municipality {
                id: 0,
                name: "Valls".into(),
                country_id: Some(1),
                levels,
                parent_id: None,
            })
            .await
            .unwrap();
        assert_eq!(store.admin_ancestors(m).await.unwrap(), vec![comarca, top]);
        assert_eq!(store.municipalities_in_level(top).await.unwrap(), vec![m]);
    }
}
