//! Moderation status transitions and the side effects they drive.
//!
//! A transition computes its delta with [`rollup::transition_delta`]; a
//! non-zero delta is applied to the demography and frequency counters and
//! to the search index, then the book's indexing progress is recomputed.
//! Moderating a record also logs a `transcripcio.moderada` activity for the
//! record's creator.

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::achievements::{self, AchievementEvaluator};
use crate::models::{Book, ModerationStatus, RecordBundle};
use crate::progress;
use crate::rollup;
use crate::search;
use crate::store::Store;

/// Activity rule code logged when a record is moderated.
pub const RULE_MODERATED: &str = "transcripcio.moderada";
/// Activity rule code logged when a record is created.
pub const RULE_CREATED: &str = "transcripcio.creada";

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("record {0} not found")]
    RecordNotFound(i64),
    #[error("book {0} not found")]
    BookNotFound(i64),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// What a transition did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub record_id: i64,
    pub from: ModerationStatus,
    pub to: ModerationStatus,
    pub delta: i64,
}

/// Apply `delta` for one record to counters and the search index.
///
/// Failures are logged, never returned.
pub async fn apply_delta(store: &dyn Store, book: &Book, bundle: &RecordBundle, delta: i64) {
    if delta == 0 {
        return;
    }
    if let Err(e) = rollup::apply_record_delta(store, book, bundle, delta).await {
        warn!(record = bundle.record.id, delta, error = %e, "roll-up delta failed");
    }
    if let Err(e) = search::apply_record_delta(store, Some(book), bundle, delta).await {
        warn!(record = bundle.record.id, delta, error = %e, "search index delta failed");
    }
}

async fn transition(
    store: &dyn Store,
    record_id: i64,
    to: ModerationStatus,
) -> Result<(Transition, Book, RecordBundle), TransitionError> {
    let mut bundle = store
        .load_bundle(record_id)
        .await?
        .ok_or(TransitionError::RecordNotFound(record_id))?;
    let book = store
        .get_book(bundle.record.book_id)
        .await?
        .ok_or(TransitionError::BookNotFound(bundle.record.book_id))?;
    let from = bundle.record.status;
    let delta = rollup::transition_delta(from, to);
    if from != to {
        bundle.record.status = to;
        bundle.record.updated_at = chrono::Utc::now().timestamp();
        store.update_record(&bundle.record).await?;
        apply_delta(store, &book, &bundle, delta).await;
        if let Err(e) = progress::recompute_book(store, &book).await {
            warn!(book_id = book.id, error = %e, "indexing progress recompute failed");
        }
    }
    let t = Transition {
        record_id,
        from,
        to,
        delta,
    };
    Ok((t, book, bundle))
}

/// Moderate a record. Publishing or rejecting logs a moderation activity
/// for the record's creator.
pub async fn set_status(
    store: &dyn Store,
    record_id: i64,
    to: ModerationStatus,
    evaluator: Option<&AchievementEvaluator>,
) -> Result<Transition, TransitionError> {
    let (t, _, bundle) = transition(store, record_id, to).await?;
    if t.from == t.to {
        return Ok(t);
    }
    info!(record = record_id, from = %t.from, to = %t.to, delta = t.delta, "record moderated");

    let outcome = match to {
        ModerationStatus::Published => Some(("validat", 1)),
        ModerationStatus::Rejected => Some(("rebutjat", 0)),
        ModerationStatus::Pending => None,
    };
    if let (Some(creator), Some((status, points))) = (bundle.record.created_by, outcome) {
        let activity = achievements::activity(
            creator,
            RULE_MODERATED,
            "moderar",
            "registre",
            record_id,
            points,
            status,
        );
        if let Err(e) = achievements::record_activity(store, evaluator, &activity).await {
            warn!(record = record_id, error = %e, "failed to log moderation activity");
        }
    }
    Ok(t)
}

/// A re-edited record goes back to `pending`.
pub async fn mark_edited(store: &dyn Store, record_id: i64) -> Result<Transition, TransitionError> {
    let (t, _, _) = transition(store, record_id, ModerationStatus::Pending).await?;
    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CounterScope, DemographyBucket, QualifiedText, RecordType, SearchEntity,
        TranscriptionPerson, TranscriptionRecord,
    };
    use crate::store::memory::InMemoryStore;

    async fn seed(store: &InMemoryStore) -> i64 {
        store
            .upsert_book(&Book {
                id: 1,
                municipality_id: Some(8),
                book_type: "baptismes".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut r = TranscriptionRecord::new(1, RecordType::Baptism);
        r.document_year = Some(1803);
        r.created_by = Some(42);
        let id = store.insert_record(&r).await.unwrap();
        let mut p = TranscriptionPerson::with_role("batejat");
        p.record_id = id;
        p.given_name = QualifiedText::new("Joan", None);
        p.surname1 = QualifiedText::new("Puig", None);
        store.insert_person(&p).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_publish_then_edit_rolls_back() {
        let store = InMemoryStore::new();
        let id = seed(&store).await;
        let scope = CounterScope::Municipality(8);

        let t = set_status(&store, id, ModerationStatus::Published, None)
            .await
            .unwrap();
        assert_eq!(t.delta, 1);
        assert_eq!(
            store
                .demography_count(scope, 1803, DemographyBucket::Births)
                .await
                .unwrap(),
            1
        );
        assert!(store
            .get_search_doc(SearchEntity::Registre, id)
            .await
            .unwrap()
            .is_some());
        assert_eq!(store.get_book_stats(1).await.unwrap().unwrap().total_records, 1);

        let activities = store.list_activities(42).await.unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].rule_code, RULE_MODERATED);
        assert_eq!(activities[0].status, "validat");

        let t = mark_edited(&store, id).await.unwrap();
        assert_eq!(t.delta, -1);
        assert!(store.demography_rows(None).await.unwrap().is_empty());
        assert!(store.frequency_rows(None).await.unwrap().is_empty());
        assert!(store
            .get_search_doc(SearchEntity::Registre, id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_same_status_is_a_no_op() {
        let store = InMemoryStore::new();
        let id = seed(&store).await;
        let t = set_status(&store, id, ModerationStatus::Pending, None)
            .await
            .unwrap();
        assert_eq!(t.delta, 0);
        assert!(store.list_activities(42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_record() {
        let store = InMemoryStore::new();
        let err = set_status(&store, 99, ModerationStatus::Published, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::RecordNotFound(99)));
    }
}
