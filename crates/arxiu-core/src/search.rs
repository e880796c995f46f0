//! Search documents and query-time variant expansion.
//!
//! # Documents
//!
//! Each published record gets one [`SearchDoc`] built from its principal
//! persons: folded name strings, deduplicated token lists, phonetic codes,
//! and a canonical surname string resolved through the surname dictionary.
//!
//! # Queries
//!
//! A query is tokenized; every token is resolved through the dictionary to
//! collect the canonical and published-variant forms. Candidates are then
//! scored as a weighted sum of four signals, each reported as a reason:
//!
//! | Reason | Signal |
//! |--------|--------|
//! | `exact_full` | the folded query equals the document's full name |
//! | `surname_variant` | a canonical/variant form hits the canonical surnames |
//! | `partial_tokens` | share of query tokens found in the person or surname tokens |
//! | `phonetic` | share of query phonetic codes found in the person codes |

use std::collections::HashMap;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::models::{
    Book, ModerationStatus, RecordBundle, RecordFilter, SearchDoc, SearchEntity,
    TranscriptionPerson,
};
use crate::normalize::{canonical_surname_key, fold, phonetic_code, phonetic_string, tokenize};
use crate::store::{contains_word, Store};

/// Weights of the four scoring signals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchWeights {
    pub exact_full: f64,
    pub surname_variant: f64,
    pub partial_tokens: f64,
    pub phonetic: f64,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            exact_full: 0.4,
            surname_variant: 0.3,
            partial_tokens: 0.2,
            phonetic: 0.1,
        }
    }
}

/// Persons a record's search document describes: the principal roles when
/// present, else every person.
fn indexed_persons(bundle: &RecordBundle) -> Vec<&TranscriptionPerson> {
    let roles = bundle.record.record_type.principal_roles();
    let principals: Vec<&TranscriptionPerson> = bundle
        .persons
        .iter()
        .filter(|p| roles.contains(&p.role.as_str()))
        .collect();
    if principals.is_empty() {
        bundle.persons.iter().collect()
    } else {
        principals
    }
}

/// Build the search document for a record.
pub async fn build_record_doc(
    store: &dyn Store,
    book: Option<&Book>,
    bundle: &RecordBundle,
) -> Result<SearchDoc> {
    let persons = indexed_persons(bundle);

    let given: Vec<&str> = persons.iter().map(|p| p.given_name.value.as_str()).collect();
    let surnames: Vec<&str> = persons
        .iter()
        .flat_map(|p| [p.surname1.value.as_str(), p.surname2.value.as_str()])
        .filter(|s| !s.trim().is_empty())
        .collect();

    let given_tokens = tokenize(&given);
    let surname_tokens = tokenize(&surnames);
    let mut person_parts = given.clone();
    person_parts.extend(surnames.iter().copied());
    let person_tokens = tokenize(&person_parts);

    let mut canon: Vec<String> = Vec::new();
    for s in &surnames {
        let key = canonical_surname_key(s);
        if key.is_empty() {
            continue;
        }
        let form = match store.find_cognom_by_key(&key).await? {
            Some(c) => fold(&c.form),
            None => fold(s),
        };
        for t in form.split_whitespace() {
            if !canon.iter().any(|c| c == t) {
                canon.push(t.to_string());
            }
        }
    }

    let record = &bundle.record;
    Ok(SearchDoc {
        entity: SearchEntity::Registre,
        entity_id: record.id,
        given_norm: given_tokens.join(" "),
        surnames_norm: surname_tokens.join(" "),
        full_norm: person_tokens.join(" "),
        person_tokens: person_tokens.join(" "),
        surname_tokens: surname_tokens.join(" "),
        person_phonetic: phonetic_string(&person_tokens),
        surname_phonetic: phonetic_string(&surname_tokens),
        surname_canon: canon.join(" "),
        municipality_id: book.and_then(|b| b.municipality_id),
        book_id: Some(record.book_id),
        archive_id: book.and_then(|b| b.archive_id),
        ecclesiastic_entity_id: book.and_then(|b| b.ecclesiastic_entity_id),
        act_date: record.act_date,
        act_year: record.effective_year(),
    })
}

/// Upsert (`delta > 0`) or delete (`delta < 0`) a record's document.
pub async fn apply_record_delta(
    store: &dyn Store,
    book: Option<&Book>,
    bundle: &RecordBundle,
    delta: i64,
) -> Result<()> {
    if delta > 0 {
        let doc = build_record_doc(store, book, bundle).await?;
        store.upsert_search_doc(&doc).await?;
    } else if delta < 0 {
        store
            .delete_search_doc(SearchEntity::Registre, bundle.record.id)
            .await?;
    }
    Ok(())
}

/// Summary of a [`rebuild_index`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub indexed: usize,
    pub failed: usize,
}

/// Re-derive the document of every published record. Per-record failures
/// are logged and counted.
pub async fn rebuild_index(store: &dyn Store) -> Result<IndexReport> {
    store.clear_search_docs(Some(SearchEntity::Registre)).await?;
    let records = store
        .list_records(&RecordFilter {
            status: Some(ModerationStatus::Published),
            ..Default::default()
        })
        .await?;
    let mut books: HashMap<i64, Option<Book>> = HashMap::new();
    let mut report = IndexReport::default();
    for r in records {
        if !books.contains_key(&r.book_id) {
            books.insert(r.book_id, store.get_book(r.book_id).await?);
        }
        let book = books.get(&r.book_id).and_then(|b| b.as_ref());
        let result: Result<()> = async {
            let Some(bundle) = store.load_bundle(r.id).await? else {
                return Ok(());
            };
            apply_record_delta(store, book, &bundle, 1).await
        }
        .await;
        match result {
            Ok(()) => report.indexed += 1,
            Err(e) => {
                warn!(record = r.id, error = %e, "failed to index record");
                report.failed += 1;
            }
        }
    }
    info!(indexed = report.indexed, failed = report.failed, "search index rebuilt");
    Ok(report)
}

/// A query after tokenization and dictionary expansion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpandedQuery {
    pub folded: String,
    pub tokens: Vec<String>,
    pub phonetic: Vec<String>,
    /// Folded canonical forms of resolved tokens.
    pub canon: Vec<String>,
    /// Folded forms of published variants of resolved tokens.
    pub variants: Vec<String>,
}

impl ExpandedQuery {
    /// Every term worth fetching candidates for.
    pub fn terms(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for t in self
            .tokens
            .iter()
            .chain(&self.phonetic)
            .chain(&self.canon)
            .chain(&self.variants)
        {
            if !out.contains(t) {
                out.push(t.clone());
            }
        }
        out
    }
}

fn push_words(target: &mut Vec<String>, text: &str) {
    for w in fold(text).split_whitespace() {
        if !target.iter().any(|t| t == w) {
            target.push(w.to_string());
        }
    }
}

/// Tokenize `query` and resolve every token through the surname dictionary.
pub async fn expand_query(store: &dyn Store, query: &str) -> Result<ExpandedQuery> {
    let tokens = tokenize(&[query]);
    let phonetic: Vec<String> = tokens
        .iter()
        .map(|t| phonetic_code(t))
        .filter(|c| !c.is_empty())
        .collect();
    let mut expanded = ExpandedQuery {
        folded: tokens.join(" "),
        tokens: tokens.clone(),
        phonetic,
        ..Default::default()
    };
    for token in &tokens {
        let key = canonical_surname_key(token);
        let Some(canonical) = store.find_cognom_by_key(&key).await? else {
            continue;
        };
        push_words(&mut expanded.canon, &canonical.form);
        for v in store.list_cognom_variants(canonical.id).await? {
            if v.published {
                push_words(&mut expanded.variants, &v.form);
            }
        }
    }
    Ok(expanded)
}

/// One scored search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub doc: SearchDoc,
    pub score: f64,
    pub reasons: Vec<&'static str>,
}

fn share(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Score one document against an expanded query.
pub fn score_doc(doc: &SearchDoc, q: &ExpandedQuery, w: &SearchWeights) -> (f64, Vec<&'static str>) {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    if !q.folded.is_empty() && doc.full_norm == q.folded {
        score += w.exact_full;
        reasons.push("exact_full");
    }

    let variant_hit = q
        .canon
        .iter()
        .chain(&q.variants)
        .any(|t| contains_word(&doc.surname_canon, t) || contains_word(&doc.surname_tokens, t));
    if variant_hit {
        score += w.surname_variant;
        reasons.push("surname_variant");
    }

    let token_hits = q
        .tokens
        .iter()
        .filter(|t| contains_word(&doc.person_tokens, t) || contains_word(&doc.surname_tokens, t))
        .count();
    if token_hits > 0 {
        score += w.partial_tokens * share(token_hits, q.tokens.len());
        reasons.push("partial_tokens");
    }

    let phonetic_hits = q
        .phonetic
        .iter()
        .filter(|c| contains_word(&doc.person_phonetic, c))
        .count();
    if phonetic_hits > 0 {
        score += w.phonetic * share(phonetic_hits, q.phonetic.len());
        reasons.push("phonetic");
    }

    (score, reasons)
}

/// Run a query: expand, fetch candidates, score, rank and truncate.
pub async fn search(
    store: &dyn Store,
    query: &str,
    weights: &SearchWeights,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    let expanded = expand_query(store, query).await?;
    let terms = expanded.terms();
    if terms.is_empty() {
        return Ok(Vec::new());
    }
    let candidates = store
        .search_candidates(&terms, (limit.max(1) * 10) as i64)
        .await?;
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .filter_map(|doc| {
            let (score, reasons) = score_doc(&doc, &expanded, weights);
            (score > 0.0).then_some(SearchHit {
                doc,
                score,
                reasons,
            })
        })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.doc.entity_id.cmp(&b.doc.entity_id))
    });
    hits.truncate(limit);
    Ok(hits)
}
