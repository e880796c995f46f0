//! Book lookup for ingested rows.

use std::collections::HashMap;

use anyhow::Result;

use crate::models::{Book, BookFilter};
use crate::store::Store;
use crate::template::program::{AmbiguityPolicy, BookMode, BookResolution};
use crate::template::transform::normalize_cronologia;

use super::RowErrorCode;

/// Pre-built lookup maps over the books in scope.
pub struct BookResolver {
    resolution: BookResolution,
    by_id: HashMap<i64, Book>,
    by_label: HashMap<String, Vec<i64>>,
    fixed: Option<Book>,
}

impl BookResolver {
    /// Load every book in `scope`. With `fixed`, every row goes to that
    /// book and the book column only has to agree with it.
    pub async fn load(
        store: &dyn Store,
        resolution: &BookResolution,
        scope: &BookFilter,
        fixed: Option<Book>,
    ) -> Result<Self> {
        let books = store.list_books(scope).await?;
        let mut by_label: HashMap<String, Vec<i64>> = HashMap::new();
        for b in &books {
            let key = label_key(&b.chronology, resolution.normalize_chronology);
            if !key.is_empty() {
                by_label.entry(key).or_default().push(b.id);
            }
        }
        for ids in by_label.values_mut() {
            ids.sort_unstable();
        }
        Ok(Self {
            resolution: resolution.clone(),
            by_id: books.into_iter().map(|b| (b.id, b)).collect(),
            by_label,
            fixed,
        })
    }

    pub fn book(&self, id: i64) -> Option<&Book> {
        match &self.fixed {
            Some(b) if b.id == id => Some(b),
            _ => self.by_id.get(&id),
        }
    }

    /// Resolve the book column value of one row.
    pub fn resolve(&self, raw: &str) -> Result<&Book, RowErrorCode> {
        let raw = raw.trim();
        if let Some(fixed) = &self.fixed {
            if raw.is_empty() || self.matches(fixed, raw) {
                return Ok(fixed);
            }
            return Err(RowErrorCode::BookMismatch);
        }
        if raw.is_empty() {
            return Err(RowErrorCode::BookNotFound);
        }
        match self.resolution.mode {
            BookMode::ById => raw
                .parse::<i64>()
                .ok()
                .and_then(|id| self.by_id.get(&id))
                .ok_or(RowErrorCode::BookNotFound),
            BookMode::ByChronologyLabel => {
                let key = label_key(raw, self.resolution.normalize_chronology);
                let ids = self
                    .by_label
                    .get(&key)
                    .filter(|ids| !ids.is_empty())
                    .ok_or(RowErrorCode::BookNotFound)?;
                if ids.len() > 1 && self.resolution.ambiguity == AmbiguityPolicy::Fail {
                    return Err(RowErrorCode::BookAmbiguous);
                }
                self.by_id.get(&ids[0]).ok_or(RowErrorCode::BookNotFound)
            }
        }
    }

    fn matches(&self, book: &Book, raw: &str) -> bool {
        match self.resolution.mode {
            BookMode::ById => raw.parse::<i64>().map(|id| id == book.id).unwrap_or(false),
            BookMode::ByChronologyLabel => {
                label_key(raw, self.resolution.normalize_chronology)
                    == label_key(&book.chronology, self.resolution.normalize_chronology)
            }
        }
    }
}

fn label_key(label: &str, normalize: bool) -> String {
    let label = if normalize {
        normalize_cronologia(label)
    } else {
        label.trim().to_string()
    };
    label.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    async fn store_with_books() -> InMemoryStore {
        let store = InMemoryStore::new();
        for (id, chrono) in [(10, "1801-1820"), (11, "1821.1840"), (12, "1821/1840")] {
            store
                .upsert_book(&Book {
                    id,
                    title: format!("Llibre {id}"),
                    chronology: chrono.into(),
                    municipality_id: Some(1),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        store
    }

    fn resolution(mode: BookMode, normalize: bool, ambiguity: AmbiguityPolicy) -> BookResolution {
        BookResolution {
            mode,
            column: "llibre".into(),
            normalize_chronology: normalize,
            ambiguity,
        }
    }

    #[tokio::test]
    async fn test_resolve_by_id_and_label() {
        let store = store_with_books().await;
        let r = BookResolver::load(
            &store,
            &resolution(BookMode::ById, false, AmbiguityPolicy::Fail),
            &BookFilter::default(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(r.resolve("10").unwrap().id, 10);
        assert_eq!(r.resolve("99").unwrap_err(), RowErrorCode::BookNotFound);
        assert_eq!(r.resolve("").unwrap_err(), RowErrorCode::BookNotFound);

        let r = BookResolver::load(
            &store,
            &resolution(BookMode::ByChronologyLabel, false, AmbiguityPolicy::Fail),
            &BookFilter::default(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(r.resolve(" 1801-1820 ").unwrap().id, 10);
        assert_eq!(r.resolve("1821.1840").unwrap().id, 11);
    }

    #[tokio::test]
    async fn test_normalized_labels_can_be_ambiguous() {
        let store = store_with_books().await;
        let fail = BookResolver::load(
            &store,
            &resolution(BookMode::ByChronologyLabel, true, AmbiguityPolicy::Fail),
            &BookFilter::default(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(
            fail.resolve("1821 . 1840").unwrap_err(),
            RowErrorCode::BookAmbiguous
        );
        let first = BookResolver::load(
            &store,
            &resolution(BookMode::ByChronologyLabel, true, AmbiguityPolicy::FirstMatch),
            &BookFilter::default(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(first.resolve("1821/1840").unwrap().id, 11);
    }

    #[tokio::test]
    async fn test_fixed_book_checks_column() {
        let store = store_with_books().await;
        let fixed = store.get_book(10).await.unwrap();
        let r = BookResolver::load(
            &store,
            &resolution(BookMode::ById, false, AmbiguityPolicy::Fail),
            &BookFilter::default(),
            fixed,
        )
        .await
        .unwrap();
        assert_eq!(r.resolve("").unwrap().id, 10);
        assert_eq!(r.resolve("10").unwrap().id, 10);
        assert_eq!(r.resolve("11").unwrap_err(), RowErrorCode::BookMismatch);
    }
}
