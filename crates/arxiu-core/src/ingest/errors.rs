//! Short-lived storage of import row errors and their CSV rendering.
//!
//! An import hands its row errors to [`ImportErrorStore::put`] and gets a
//! token back; the error CSV is later fetched once with
//! [`ImportErrorStore::take`]. Entries expire after a fixed TTL.

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::debug;

use super::RowError;

struct Entry {
    stored_at: Instant,
    errors: Vec<RowError>,
}

/// Mutex-guarded map of tokens to row-error lists.
pub struct ImportErrorStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl ImportErrorStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Store `errors` and return the download token.
    pub fn put(&self, errors: Vec<RowError>) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        self.entries.lock().unwrap().insert(
            token.clone(),
            Entry {
                stored_at: Instant::now(),
                errors,
            },
        );
        token
    }

    /// Remove and return the errors for `token`, unless expired.
    pub fn take(&self, token: &str) -> Option<Vec<RowError>> {
        let entry = self.entries.lock().unwrap().remove(token)?;
        if entry.stored_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.errors)
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, e| e.stored_at.elapsed() <= ttl);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "expired import error lists evicted");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write `row,error,<field keys…>` CSV, one line per error.
///
/// Field columns are the union of every failing-field key, sorted.
pub fn write_error_csv<W: Write>(errors: &[RowError], out: W) -> Result<()> {
    let keys: BTreeSet<&str> = errors
        .iter()
        .flat_map(|e| e.fields.keys().map(String::as_str))
        .collect();
    let mut wtr = csv::Writer::from_writer(out);
    let mut header = vec!["row", "error"];
    header.extend(keys.iter().copied());
    wtr.write_record(&header)?;
    for e in errors {
        let mut line = vec![e.row.to_string(), e.message.clone()];
        for k in &keys {
            line.push(e.fields.get(*k).cloned().unwrap_or_default());
        }
        wtr.write_record(&line)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::RowErrorCode;
    use std::collections::BTreeMap;

    fn error(row: u64, code: RowErrorCode, fields: &[(&str, &str)]) -> RowError {
        RowError {
            row,
            code,
            message: code.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_put_take_drains() {
        let store = ImportErrorStore::new(Duration::from_secs(60));
        let token = store.put(vec![error(2, RowErrorCode::BookNotFound, &[])]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.take(&token).unwrap().len(), 1);
        assert!(store.take(&token).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_expired_entries_are_evicted() {
        let store = ImportErrorStore::new(Duration::ZERO);
        let token = store.put(vec![]);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.evict_expired(), 1);
        assert!(store.take(&token).is_none());
    }

    #[test]
    fn test_error_csv_unions_field_keys() {
        let errors = vec![
            error(2, RowErrorCode::BookNotFound, &[("llibre", "1801, 1820")]),
            error(3, RowErrorCode::DuplicateRow, &[("duplicate_row", "2")]),
        ];
        let mut out = Vec::new();
        write_error_csv(&errors, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "row,error,duplicate_row,llibre");
        assert_eq!(lines[1], "2,llibre no trobat,,\"1801, 1820\"");
        assert_eq!(lines[2], "3,fila duplicada,2,");
    }
}
