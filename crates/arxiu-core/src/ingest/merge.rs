//! Merging rows into records already present in a fully indexed book.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use tracing::debug;

use crate::models::{
    principal_person, Quality, RecordBundle, RecordFilter, TranscriptionPerson, TranscriptionRecord,
};
use crate::normalize::{canonical_given_name_key, canonical_surname_key};
use crate::store::Store;
use crate::template::program::MergePolicy;

use super::apply::RowDraft;

/// Identity key of a person: `GIVEN|SURNAME1|SURNAME2` canonical keys.
///
/// `None` when the person carries no name at all.
pub fn person_key(person: &TranscriptionPerson) -> Option<String> {
    let given = canonical_given_name_key(&person.given_name.value);
    let s1 = canonical_surname_key(&person.surname1.value);
    let s2 = canonical_surname_key(&person.surname2.value);
    if given.is_empty() && s1.is_empty() && s2.is_empty() {
        return None;
    }
    Some(format!("{given}|{s1}|{s2}"))
}

/// Key of the principal person among `persons`, by role priority.
pub fn principal_key(persons: &[TranscriptionPerson], roles: &[String]) -> Option<String> {
    principal_person(persons, roles).and_then(person_key)
}

/// Per-book index `principal key → record id`, loaded on first use.
#[derive(Debug, Default)]
pub struct PrincipalIndex {
    books: HashMap<i64, HashMap<String, i64>>,
}

impl PrincipalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    async fn ensure(&mut self, store: &dyn Store, book_id: i64, roles: &[String]) -> Result<()> {
        if self.books.contains_key(&book_id) {
            return Ok(());
        }
        let records = store
            .list_records(&RecordFilter {
                book_id: Some(book_id),
                ..Default::default()
            })
            .await?;
        let mut index = HashMap::new();
        for r in records {
            let persons = store.list_persons(r.id).await?;
            if let Some(key) = principal_key(&persons, roles) {
                index.entry(key).or_insert(r.id);
            }
        }
        debug!(book_id, entries = index.len(), "principal index loaded");
        self.books.insert(book_id, index);
        Ok(())
    }

    /// Existing record in `book_id` whose principal has `key`.
    pub async fn lookup(
        &mut self,
        store: &dyn Store,
        book_id: i64,
        roles: &[String],
        key: &str,
    ) -> Result<Option<i64>> {
        self.ensure(store, book_id, roles).await?;
        Ok(self.books.get(&book_id).and_then(|m| m.get(key).copied()))
    }

    /// Register a record created during this run. Only books already
    /// loaded are updated; unloaded ones will see it when loaded.
    pub fn insert(&mut self, book_id: i64, key: String, record_id: i64) {
        if let Some(m) = self.books.get_mut(&book_id) {
            m.entry(key).or_insert(record_id);
        }
    }
}

fn fill_text(slot: &mut String, incoming: &str) -> bool {
    if slot.trim().is_empty() && !incoming.trim().is_empty() {
        *slot = incoming.to_string();
        return true;
    }
    false
}

fn fill_option<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) -> bool {
    if slot.is_none() && incoming.is_some() {
        *slot = incoming.clone();
        return true;
    }
    false
}

/// Fill empty header fields of `existing` from `incoming`. Record type and
/// moderation status are never touched.
pub fn fill_missing_header(existing: &mut TranscriptionRecord, incoming: &TranscriptionRecord) -> bool {
    let mut changed = false;
    changed |= fill_text(&mut existing.page_label, &incoming.page_label);
    changed |= fill_option(&mut existing.page_position, &incoming.page_position);
    changed |= fill_option(&mut existing.document_year, &incoming.document_year);
    changed |= fill_text(&mut existing.act_date_text, &incoming.act_date_text);
    changed |= fill_option(&mut existing.act_date, &incoming.act_date);
    let quality_missing = matches!(existing.act_date_quality, None | Some(Quality::NoRecord));
    if quality_missing
        && incoming.act_date_quality.is_some()
        && incoming.act_date_quality != Some(Quality::NoRecord)
    {
        existing.act_date_quality = incoming.act_date_quality;
        changed = true;
    }
    changed |= fill_text(&mut existing.literal, &incoming.literal);
    changed |= fill_text(&mut existing.marginalia, &incoming.marginalia);
    if changed {
        existing.settle_date_quality();
    }
    changed
}

/// Outcome of merging one row into an existing record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeChanges {
    pub header: bool,
    pub persons_added: usize,
    pub attributes_added: usize,
}

impl MergeChanges {
    pub fn changed(&self) -> bool {
        self.header || self.persons_added > 0 || self.attributes_added > 0
    }
}

/// Merge `draft` into `existing` according to `policy`, writing through
/// the store. Returns what changed.
pub async fn merge_into(
    store: &dyn Store,
    existing: &RecordBundle,
    draft: &RowDraft,
    policy: &MergePolicy,
) -> Result<MergeChanges> {
    let mut changes = MergeChanges::default();
    let record_id = existing.record.id;

    if policy.update_missing_only {
        let mut header = existing.record.clone();
        if fill_missing_header(&mut header, &draft.record) {
            header.updated_at = chrono::Utc::now().timestamp();
            store
                .update_record(&header)
                .await
                .with_context(|| format!("updating record {record_id}"))?;
            changes.header = true;
        }
    }

    if policy.add_missing_people {
        let mut present: HashSet<(String, Option<String>)> = existing
            .persons
            .iter()
            .map(|p| (p.role.clone(), person_key(p)))
            .collect();
        for p in &draft.persons {
            let key = (p.role.clone(), person_key(p));
            if present.contains(&key) {
                continue;
            }
            let mut person = p.clone();
            person.record_id = record_id;
            store.insert_person(&person).await?;
            present.insert(key);
            changes.persons_added += 1;
        }
    }

    if policy.add_missing_attrs {
        let mut present: HashSet<String> =
            existing.attributes.iter().map(|a| a.key.clone()).collect();
        for a in &draft.attributes {
            if present.contains(&a.key) {
                continue;
            }
            let mut attr = a.clone();
            attr.record_id = record_id;
            store.insert_attribute(&attr).await?;
            present.insert(a.key.clone());
            changes.attributes_added += 1;
        }
    }

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QualifiedText, RecordType};

    fn person(role: &str, given: &str, s1: &str) -> TranscriptionPerson {
        let mut p = TranscriptionPerson::with_role(role);
        p.given_name = QualifiedText::new(given, None);
        p.surname1 = QualifiedText::new(s1, None);
        p
    }

    #[test]
    fn test_person_key_folds_and_joins() {
        assert_eq!(
            person_key(&person("batejat", "Josep", "Pérez de la Vila")).as_deref(),
            Some("JOSEP|PEREZDELAVILA|")
        );
        assert_eq!(person_key(&TranscriptionPerson::with_role("pare")), None);
    }

    #[test]
    fn test_principal_key_follows_role_priority() {
        let persons = vec![person("novia", "Maria", "Vidal"), person("nuvi", "Joan", "Puig")];
        let roles = vec!["nuvi".to_string(), "novia".to_string()];
        assert_eq!(principal_key(&persons, &roles).as_deref(), Some("JOAN|PUIG|"));
    }

    #[test]
    fn test_fill_missing_header_only_fills_gaps() {
        let mut existing = TranscriptionRecord::new(1, RecordType::Baptism);
        existing.page_label = "3".into();
        existing.act_date_quality = Some(Quality::NoRecord);
        let mut incoming = TranscriptionRecord::new(1, RecordType::Death);
        incoming.page_label = "4".into();
        incoming.document_year = Some(1803);
        incoming.act_date_quality = Some(Quality::Doubtful);

        assert!(fill_missing_header(&mut existing, &incoming));
        assert_eq!(existing.page_label, "3");
        assert_eq!(existing.document_year, Some(1803));
        assert_eq!(existing.act_date_quality, Some(Quality::Doubtful));
        assert_eq!(existing.record_type, RecordType::Baptism);
        assert!(!fill_missing_header(&mut existing, &incoming));
    }
}
