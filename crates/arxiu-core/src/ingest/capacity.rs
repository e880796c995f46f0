//! Per-page capacity check for batches coming from the interactive indexer.
//!
//! Books are usually transcribed page by page, and most pages hold the same
//! number of acts. That number, the *established page size*, is the most
//! frequent per-page record count of the book (ties go to the larger
//! count). A batch is rejected when it would push a page that already holds
//! exactly that many records past it.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::info;

use crate::lifecycle;
use crate::models::{Book, RecordBundle};
use crate::progress;
use crate::store::Store;

use super::insert_bundle;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapacityError {
    #[error("la pàgina {page} ja té {existing} registres (capacitat {capacity}), no se n'hi poden afegir {incoming}")]
    PageFull {
        page: String,
        existing: i64,
        incoming: i64,
        capacity: i64,
    },
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Most frequent non-zero page count; ties resolve to the larger count.
pub fn established_page_size(counts: &HashMap<String, i64>) -> Option<i64> {
    let mut freq: BTreeMap<i64, usize> = BTreeMap::new();
    for c in counts.values().filter(|c| **c > 0) {
        *freq.entry(*c).or_default() += 1;
    }
    freq.into_iter()
        .max_by(|(size_a, n_a), (size_b, n_b)| n_a.cmp(n_b).then(size_a.cmp(size_b)))
        .map(|(size, _)| size)
}

/// Check a batch of page labels against the existing per-page counts.
pub fn check_page_capacity<'a>(
    counts: &HashMap<String, i64>,
    pages: impl IntoIterator<Item = &'a str>,
) -> Result<(), CapacityError> {
    let Some(capacity) = established_page_size(counts) else {
        return Ok(());
    };
    let mut incoming: BTreeMap<&str, i64> = BTreeMap::new();
    for p in pages {
        let p = p.trim();
        if !p.is_empty() {
            *incoming.entry(p).or_default() += 1;
        }
    }
    for (page, new) in incoming {
        let existing = counts.get(page).copied().unwrap_or(0);
        if existing == capacity && existing + new > capacity {
            return Err(CapacityError::PageFull {
                page: page.to_string(),
                existing,
                incoming: new,
                capacity,
            });
        }
    }
    Ok(())
}

/// Insert an indexer batch into `book` after the capacity check. Published
/// records feed the roll-ups; the book's progress is recomputed once.
pub async fn create_batch(
    store: &dyn Store,
    book: &Book,
    mut batch: Vec<RecordBundle>,
) -> Result<Vec<i64>, BatchError> {
    let counts = store.page_record_counts(book.id).await?;
    check_page_capacity(&counts, batch.iter().map(|b| b.record.page_label.as_str()))?;

    let now = chrono::Utc::now().timestamp();
    let mut ids = Vec::with_capacity(batch.len());
    for bundle in &mut batch {
        bundle.record.book_id = book.id;
        bundle.record.created_at = now;
        bundle.record.updated_at = now;
        bundle.record.settle_date_quality();
        ids.push(insert_bundle(store, bundle).await?);
        if bundle.record.status.is_published() {
            lifecycle::apply_delta(store, book, bundle, 1).await;
        }
    }
    progress::recompute_book(store, book).await?;
    info!(book_id = book.id, records = ids.len(), "indexer batch created");
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecordType, TranscriptionRecord};
    use crate::store::memory::InMemoryStore;

    fn counts(pairs: &[(&str, i64)]) -> HashMap<String, i64> {
        pairs.iter().map(|(p, c)| (p.to_string(), *c)).collect()
    }

    #[test]
    fn test_established_size_prefers_frequency_then_size() {
        assert_eq!(established_page_size(&counts(&[])), None);
        assert_eq!(
            established_page_size(&counts(&[("1", 4), ("2", 4), ("3", 2)])),
            Some(4)
        );
        assert_eq!(
            established_page_size(&counts(&[("1", 3), ("2", 5)])),
            Some(5)
        );
    }

    #[test]
    fn test_only_full_established_pages_reject() {
        let c = counts(&[("1", 4), ("2", 4), ("3", 2)]);
        assert!(check_page_capacity(&c, ["3", "3"]).is_ok());
        assert!(check_page_capacity(&c, ["4", "4", "4", "4", "4"]).is_ok());
        let err = check_page_capacity(&c, ["2"]).unwrap_err();
        assert_eq!(
            err,
            CapacityError::PageFull {
                page: "2".into(),
                existing: 4,
                incoming: 1,
                capacity: 4
            }
        );
    }

    #[tokio::test]
    async fn test_create_batch_checks_then_inserts() {
        let store = InMemoryStore::new();
        let book = Book {
            id: 3,
            book_type: "baptismes".into(),
            ..Default::default()
        };
        store.upsert_book(&book).await.unwrap();
        let bundle = |page: &str| {
            let mut r = TranscriptionRecord::new(3, RecordType::Baptism);
            r.page_label = page.into();
            RecordBundle {
                record: r,
                persons: vec![],
                attributes: vec![],
            }
        };
        let ids = create_batch(&store, &book, vec![bundle("1"), bundle("1")])
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        let err = create_batch(&store, &book, vec![bundle("1")]).await.unwrap_err();
        assert!(matches!(err, BatchError::Capacity(_)));
        assert!(create_batch(&store, &book, vec![bundle("2")]).await.is_ok());
    }
}
