//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation onto the schema created by
//! [`migrate`](crate::migrate). Qualified text fields are stored as a
//! value column plus a nullable `<field>_quality` column; dates as ISO
//! text; timestamps as Unix seconds.

use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use arxiu_core::models::{
    Achievement, AdminLevel, AttributeValue, Book, BookFilter, BookIndexingStats,
    CognomCanonical, CognomVariant, CounterScope, Country, DemographyBucket, ImportTemplate,
    Municipality, NameKind, PersonField, QualifiedText, Quality, RecordFilter, RecordType,
    SearchDoc, SearchEntity, TranscriptionAttribute, TranscriptionPerson, TranscriptionRecord,
    UserAchievement, UserActivity, Visibility, LEVEL_SLOTS,
};
use arxiu_core::store::{contains_word, DemographyRow, FrequencyRow, Store};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ─── Column mapping helpers ─────────────────────────────────────────

fn person_column(field: PersonField) -> &'static str {
    match field {
        PersonField::GivenName => "given_name",
        PersonField::Surname1 => "surname1",
        PersonField::Surname2 => "surname2",
        PersonField::MaidenSurname => "maiden_surname",
        PersonField::Sex => "sex",
        PersonField::Age => "age",
        PersonField::CivilStatus => "civil_status",
        PersonField::Municipality => "municipality",
        PersonField::Occupation => "occupation",
        PersonField::HouseName => "house_name",
    }
}

static INSERT_PERSON_SQL: LazyLock<String> = LazyLock::new(|| {
    let mut columns = vec!["record_id".to_string(), "role".to_string()];
    for f in PersonField::ALL {
        columns.push(person_column(f).to_string());
        columns.push(format!("{}_quality", person_column(f)));
    }
    columns.push("notes".to_string());
    columns.push("person_id".to_string());
    let marks = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO persons ({}) VALUES ({})",
        columns.join(", "),
        marks
    )
});

const MUNICIPALITY_COLUMNS: &str =
    "id, name, country_id, level_1, level_2, level_3, level_4, level_5, level_6, level_7, parent_id";

fn quality_label(q: Option<Quality>) -> Option<&'static str> {
    q.map(|q| q.as_str())
}

fn quality_from(label: Option<String>) -> Option<Quality> {
    label.as_deref().and_then(Quality::parse)
}

fn date_from(text: Option<String>) -> Option<NaiveDate> {
    text.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn date_label(d: Option<NaiveDate>) -> Option<String> {
    d.map(|d| d.format("%Y-%m-%d").to_string())
}

fn ts_to_utc(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn scope_from(kind: &str, id: i64) -> Result<CounterScope> {
    CounterScope::from_parts(kind, id).ok_or_else(|| anyhow!("unknown counter scope '{}'", kind))
}

fn name_kind_from(label: &str) -> Result<NameKind> {
    match label {
        "nom" => Ok(NameKind::Given),
        "cognom" => Ok(NameKind::Surname),
        other => bail!("unknown name kind '{}'", other),
    }
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
fn like_escape(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn book_from_row(row: &SqliteRow) -> Book {
    Book {
        id: row.get("id"),
        title: row.get("title"),
        chronology: row.get("chronology"),
        municipality_id: row.get("municipality_id"),
        archive_id: row.get("archive_id"),
        ecclesiastic_entity_id: row.get("ecclesiastic_entity_id"),
        fully_indexed: row.get("fully_indexed"),
        book_type: row.get("book_type"),
    }
}

fn record_from_row(row: &SqliteRow) -> Result<TranscriptionRecord> {
    let record_type: String = row.get("record_type");
    let status: String = row.get("status");
    Ok(TranscriptionRecord {
        id: row.get("id"),
        book_id: row.get("book_id"),
        record_type: record_type.parse::<RecordType>().map_err(|e| anyhow!(e))?,
        page_label: row.get("page_label"),
        page_position: row.get("page_position"),
        document_year: row.get("document_year"),
        act_date_text: row.get("act_date_text"),
        act_date: date_from(row.get("act_date")),
        act_date_quality: quality_from(row.get("act_date_quality")),
        literal: row.get("literal"),
        marginalia: row.get("marginalia"),
        status: status.parse().map_err(|e: String| anyhow!(e))?,
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn person_from_row(row: &SqliteRow) -> TranscriptionPerson {
    let mut person = TranscriptionPerson {
        id: row.get("id"),
        record_id: row.get("record_id"),
        role: row.get("role"),
        notes: row.get("notes"),
        person_id: row.get("person_id"),
        ..Default::default()
    };
    for f in PersonField::ALL {
        let column = person_column(f);
        let quality_column = format!("{}_quality", column);
        *person.field_mut(f) = QualifiedText::new(
            row.get::<String, _>(column),
            quality_from(row.get(quality_column.as_str())),
        );
    }
    person
}

fn attribute_from_row(row: &SqliteRow) -> Result<TranscriptionAttribute> {
    let value_json: Option<String> = row.get("value_json");
    let value: Option<AttributeValue> = match value_json {
        Some(json) => Some(serde_json::from_str(&json)?),
        None => None,
    };
    Ok(TranscriptionAttribute {
        id: row.get("id"),
        record_id: row.get("record_id"),
        key: row.get("key"),
        value,
        quality: quality_from(row.get("quality")),
        notes: row.get("notes"),
    })
}

fn municipality_from_row(row: &SqliteRow) -> Municipality {
    let mut levels = [None; LEVEL_SLOTS];
    for (i, slot) in levels.iter_mut().enumerate() {
        *slot = row.get(format!("level_{}", i + 1).as_str());
    }
    Municipality {
        id: row.get("id"),
        name: row.get("name"),
        country_id: row.get("country_id"),
        levels,
        parent_id: row.get("parent_id"),
    }
}

fn level_from_row(row: &SqliteRow) -> AdminLevel {
    AdminLevel {
        id: row.get("id"),
        country_id: row.get("country_id"),
        depth: row.get("depth"),
        name: row.get("name"),
        parent_id: row.get("parent_id"),
    }
}

fn search_doc_from_row(row: &SqliteRow) -> Result<SearchDoc> {
    let entity: String = row.get("entity");
    Ok(SearchDoc {
        entity: SearchEntity::parse(&entity)
            .ok_or_else(|| anyhow!("unknown search entity '{}'", entity))?,
        entity_id: row.get("entity_id"),
        given_norm: row.get("given_norm"),
        surnames_norm: row.get("surnames_norm"),
        full_norm: row.get("full_norm"),
        person_tokens: row.get("person_tokens"),
        surname_tokens: row.get("surname_tokens"),
        person_phonetic: row.get("person_phonetic"),
        surname_phonetic: row.get("surname_phonetic"),
        surname_canon: row.get("surname_canon"),
        municipality_id: row.get("municipality_id"),
        book_id: row.get("book_id"),
        archive_id: row.get("archive_id"),
        ecclesiastic_entity_id: row.get("ecclesiastic_entity_id"),
        act_date: date_from(row.get("act_date")),
        act_year: row.get("act_year"),
    })
}

fn template_from_row(row: &SqliteRow) -> Result<ImportTemplate> {
    let visibility: String = row.get("visibility");
    let model_json: String = row.get("model_json");
    Ok(ImportTemplate {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        description: row.get("description"),
        visibility: visibility.parse::<Visibility>().map_err(|e| anyhow!(e))?,
        default_separator: row.get("default_separator"),
        model: serde_json::from_str(&model_json)?,
        signature: row.get("signature"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn activity_from_row(row: &SqliteRow) -> Result<UserActivity> {
    let details_json: String = row.get("details_json");
    Ok(UserActivity {
        id: row.get("id"),
        user_id: row.get("user_id"),
        rule_code: row.get("rule_code"),
        action: row.get("action"),
        object_type: row.get("object_type"),
        object_id: row.get("object_id"),
        points: row.get("points"),
        status: row.get("status"),
        created_at: ts_to_utc(row.get("created_at")),
        details: serde_json::from_str(&details_json)?,
    })
}

fn achievement_from_row(row: &SqliteRow) -> Result<Achievement> {
    let rule_json: String = row.get("rule_json");
    Ok(Achievement {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        rule: serde_json::from_str(&rule_json)?,
        repeatable: row.get("repeatable"),
        enabled: row.get("enabled"),
        event_start: row.get::<Option<i64>, _>("event_start").map(ts_to_utc),
        event_end: row.get::<Option<i64>, _>("event_end").map(ts_to_utc),
    })
}

fn award_from_row(row: &SqliteRow) -> Result<UserAchievement> {
    let metadata_json: String = row.get("metadata_json");
    Ok(UserAchievement {
        id: row.get("id"),
        user_id: row.get("user_id"),
        achievement_id: row.get("achievement_id"),
        awarded_at: ts_to_utc(row.get("awarded_at")),
        metadata: serde_json::from_str(&metadata_json)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    // ── Books ──

    async fn upsert_book(&self, book: &Book) -> Result<i64> {
        if book.id == 0 {
            let result = sqlx::query(
                r#"
                INSERT INTO books (title, chronology, municipality_id, archive_id,
                                   ecclesiastic_entity_id, fully_indexed, book_type)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&book.title)
            .bind(&book.chronology)
            .bind(book.municipality_id)
            .bind(book.archive_id)
            .bind(book.ecclesiastic_entity_id)
            .bind(book.fully_indexed)
            .bind(&book.book_type)
            .execute(&self.pool)
            .await?;
            return Ok(result.last_insert_rowid());
        }

        sqlx::query(
            r#"
            INSERT INTO books (id, title, chronology, municipality_id, archive_id,
                               ecclesiastic_entity_id, fully_indexed, book_type)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                chronology = excluded.chronology,
                municipality_id = excluded.municipality_id,
                archive_id = excluded.archive_id,
                ecclesiastic_entity_id = excluded.ecclesiastic_entity_id,
                fully_indexed = excluded.fully_indexed,
                book_type = excluded.book_type
            "#,
        )
        .bind(book.id)
        .bind(&book.title)
        .bind(&book.chronology)
        .bind(book.municipality_id)
        .bind(book.archive_id)
        .bind(book.ecclesiastic_entity_id)
        .bind(book.fully_indexed)
        .bind(&book.book_type)
        .execute(&self.pool)
        .await?;
        Ok(book.id)
    }

    async fn get_book(&self, id: i64) -> Result<Option<Book>> {
        let row = sqlx::query("SELECT * FROM books WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(book_from_row))
    }

    async fn list_books(&self, filter: &BookFilter) -> Result<Vec<Book>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM books
            WHERE (? IS NULL OR municipality_id = ?)
              AND (? IS NULL OR archive_id = ?)
            ORDER BY id
            "#,
        )
        .bind(filter.municipality_id)
        .bind(filter.municipality_id)
        .bind(filter.archive_id)
        .bind(filter.archive_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(book_from_row).collect())
    }

    async fn save_book_stats(&self, stats: &BookIndexingStats) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO book_stats (book_id, total_records, total_fields, filled_fields,
                                    percentage, computed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(book_id) DO UPDATE SET
                total_records = excluded.total_records,
                total_fields = excluded.total_fields,
                filled_fields = excluded.filled_fields,
                percentage = excluded.percentage,
                computed_at = excluded.computed_at
            "#,
        )
        .bind(stats.book_id)
        .bind(stats.total_records)
        .bind(stats.total_fields)
        .bind(stats.filled_fields)
        .bind(stats.percentage)
        .bind(stats.computed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_book_stats(&self, book_id: i64) -> Result<Option<BookIndexingStats>> {
        let row = sqlx::query("SELECT * FROM book_stats WHERE book_id = ?")
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| BookIndexingStats {
            book_id: r.get("book_id"),
            total_records: r.get("total_records"),
            total_fields: r.get("total_fields"),
            filled_fields: r.get("filled_fields"),
            percentage: r.get("percentage"),
            computed_at: r.get("computed_at"),
        }))
    }

    // ── Records ──

    async fn insert_record(&self, record: &TranscriptionRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO records (book_id, record_type, page_label, page_position, document_year,
                                 act_date_text, act_date, act_date_quality, literal, marginalia,
                                 status, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.book_id)
        .bind(record.record_type.as_str())
        .bind(&record.page_label)
        .bind(record.page_position)
        .bind(record.document_year)
        .bind(&record.act_date_text)
        .bind(date_label(record.act_date))
        .bind(quality_label(record.act_date_quality))
        .bind(&record.literal)
        .bind(&record.marginalia)
        .bind(record.status.as_str())
        .bind(record.created_by)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn update_record(&self, record: &TranscriptionRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE records SET
                book_id = ?, record_type = ?, page_label = ?, page_position = ?,
                document_year = ?, act_date_text = ?, act_date = ?, act_date_quality = ?,
                literal = ?, marginalia = ?, status = ?, created_by = ?,
                created_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(record.book_id)
        .bind(record.record_type.as_str())
        .bind(&record.page_label)
        .bind(record.page_position)
        .bind(record.document_year)
        .bind(&record.act_date_text)
        .bind(date_label(record.act_date))
        .bind(quality_label(record.act_date_quality))
        .bind(&record.literal)
        .bind(&record.marginalia)
        .bind(record.status.as_str())
        .bind(record.created_by)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("record {} not found", record.id);
        }
        Ok(())
    }

    async fn get_record(&self, id: i64) -> Result<Option<TranscriptionRecord>> {
        let row = sqlx::query("SELECT * FROM records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<TranscriptionRecord>> {
        let status = filter.status.map(|s| s.as_str());
        let rows = sqlx::query(
            r#"
            SELECT r.* FROM records r
            LEFT JOIN books b ON b.id = r.book_id
            WHERE (? IS NULL OR r.book_id = ?)
              AND (? IS NULL OR r.status = ?)
              AND (? IS NULL OR b.municipality_id = ?)
            ORDER BY r.id
            "#,
        )
        .bind(filter.book_id)
        .bind(filter.book_id)
        .bind(status)
        .bind(status)
        .bind(filter.municipality_id)
        .bind(filter.municipality_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn insert_person(&self, person: &TranscriptionPerson) -> Result<i64> {
        let mut query = sqlx::query(INSERT_PERSON_SQL.as_str())
            .bind(person.record_id)
            .bind(&person.role);
        for f in PersonField::ALL {
            let text = person.field(f);
            query = query
                .bind(text.value.clone())
                .bind(quality_label(text.quality));
        }
        let result = query
            .bind(&person.notes)
            .bind(person.person_id)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_persons(&self, record_id: i64) -> Result<Vec<TranscriptionPerson>> {
        let rows = sqlx::query("SELECT * FROM persons WHERE record_id = ? ORDER BY id")
            .bind(record_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(person_from_row).collect())
    }

    async fn insert_attribute(&self, attr: &TranscriptionAttribute) -> Result<i64> {
        let value_json = attr.value.as_ref().map(serde_json::to_string).transpose()?;
        let result = sqlx::query(
            "INSERT INTO attributes (record_id, key, value_json, quality, notes) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(attr.record_id)
        .bind(&attr.key)
        .bind(value_json)
        .bind(quality_label(attr.quality))
        .bind(&attr.notes)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_attributes(&self, record_id: i64) -> Result<Vec<TranscriptionAttribute>> {
        let rows = sqlx::query("SELECT * FROM attributes WHERE record_id = ? ORDER BY id")
            .bind(record_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(attribute_from_row).collect()
    }

    async fn page_record_counts(&self, book_id: i64) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(
            r#"
            SELECT TRIM(page_label) AS page, COUNT(*) AS n
            FROM records
            WHERE book_id = ? AND TRIM(page_label) <> ''
            GROUP BY TRIM(page_label)
            "#,
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("page"), r.get::<i64, _>("n")))
            .collect())
    }

    // ── Territory ──

    async fn insert_country(&self, country: &Country) -> Result<i64> {
        let id = (country.id != 0).then_some(country.id);
        let result = sqlx::query("INSERT INTO countries (id, iso2, name) VALUES (?, ?, ?)")
            .bind(id)
            .bind(&country.iso2)
            .bind(&country.name)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_countries(&self) -> Result<Vec<Country>> {
        let rows = sqlx::query("SELECT id, iso2, name FROM countries ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| Country {
                id: r.get("id"),
                iso2: r.get("iso2"),
                name: r.get("name"),
            })
            .collect())
    }

    async fn insert_level(&self, level: &AdminLevel) -> Result<i64> {
        let id = (level.id != 0).then_some(level.id);
        let result = sqlx::query(
            "INSERT INTO levels (id, country_id, depth, name, parent_id) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(level.country_id)
        .bind(level.depth)
        .bind(&level.name)
        .bind(level.parent_id)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn set_level_parent(&self, id: i64, parent_id: Option<i64>) -> Result<()> {
        let result = sqlx::query("UPDATE levels SET parent_id = ? WHERE id = ?")
            .bind(parent_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("administrative level {} not found", id);
        }
        Ok(())
    }

    async fn get_level(&self, id: i64) -> Result<Option<AdminLevel>> {
        let row = sqlx::query("SELECT * FROM levels WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(level_from_row))
    }

    async fn list_levels(&self) -> Result<Vec<AdminLevel>> {
        let rows = sqlx::query("SELECT * FROM levels ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(level_from_row).collect())
    }

    async fn insert_municipality(&self, municipality: &Municipality) -> Result<i64> {
        let id = (municipality.id != 0).then_some(municipality.id);
        let mut query = sqlx::query(
            r#"
            INSERT INTO municipalities (id, name, country_id, level_1, level_2, level_3,
                                        level_4, level_5, level_6, level_7, parent_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(&municipality.name)
        .bind(municipality.country_id);
        for slot in municipality.levels {
            query = query.bind(slot);
        }
        let result = query
            .bind(municipality.parent_id)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn set_municipality_parent(&self, id: i64, parent_id: Option<i64>) -> Result<()> {
        let result = sqlx::query("UPDATE municipalities SET parent_id = ? WHERE id = ?")
            .bind(parent_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("municipality {} not found", id);
        }
        Ok(())
    }

    async fn get_municipality(&self, id: i64) -> Result<Option<Municipality>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM municipalities WHERE id = ?",
            MUNICIPALITY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(municipality_from_row))
    }

    async fn list_municipalities(&self) -> Result<Vec<Municipality>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM municipalities ORDER BY id",
            MUNICIPALITY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(municipality_from_row).collect())
    }

    // ── Counters ──

    async fn apply_demography_delta(
        &self,
        scope: CounterScope,
        year: i32,
        bucket: DemographyBucket,
        delta: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO demography (scope_kind, scope_id, year, bucket, count)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(scope_kind, scope_id, year, bucket) DO UPDATE SET
                count = count + excluded.count
            "#,
        )
        .bind(scope.kind())
        .bind(scope.id())
        .bind(year)
        .bind(bucket.as_str())
        .bind(delta)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            DELETE FROM demography
            WHERE scope_kind = ? AND scope_id = ? AND year = ? AND bucket = ? AND count <= 0
            "#,
        )
        .bind(scope.kind())
        .bind(scope.id())
        .bind(year)
        .bind(bucket.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn demography_count(
        &self,
        scope: CounterScope,
        year: i32,
        bucket: DemographyBucket,
    ) -> Result<i64> {
        let count: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT count FROM demography
            WHERE scope_kind = ? AND scope_id = ? AND year = ? AND bucket = ?
            "#,
        )
        .bind(scope.kind())
        .bind(scope.id())
        .bind(year)
        .bind(bucket.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(count.unwrap_or(0))
    }

    async fn demography_rows(&self, scope: Option<CounterScope>) -> Result<Vec<DemographyRow>> {
        let kind = scope.map(|s| s.kind());
        let id = scope.map(|s| s.id());
        let rows = sqlx::query(
            r#"
            SELECT scope_kind, scope_id, year, bucket, count FROM demography
            WHERE (? IS NULL OR (scope_kind = ? AND scope_id = ?))
            ORDER BY scope_kind, scope_id, year, bucket
            "#,
        )
        .bind(kind)
        .bind(kind)
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| -> Result<DemographyRow> {
                let bucket: String = r.get("bucket");
                Ok(DemographyRow {
                    scope: scope_from(&r.get::<String, _>("scope_kind"), r.get("scope_id"))?,
                    year: r.get("year"),
                    bucket: DemographyBucket::parse(&bucket)
                        .ok_or_else(|| anyhow!("unknown demography bucket '{}'", bucket))?,
                    count: r.get("count"),
                })
            })
            .collect()
    }

    async fn clear_demography(&self, scope: Option<CounterScope>) -> Result<()> {
        let kind = scope.map(|s| s.kind());
        sqlx::query("DELETE FROM demography WHERE (? IS NULL OR (scope_kind = ? AND scope_id = ?))")
            .bind(kind)
            .bind(kind)
            .bind(scope.map(|s| s.id()))
            .execute(&self.pool)
            .await?;
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
        let mut tx = self.pool.begin().await?;
        // Year 0 is the all-years total row.
        let mut years = vec![0];
        if let Some(y) = year {
            years.push(y);
        }
        for y in years {
            sqlx::query(
                r#"
                INSERT INTO frequencies (kind, entity_id, scope_kind, scope_id, year, count)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(kind, entity_id, scope_kind, scope_id, year) DO UPDATE SET
                    count = count + excluded.count
                "#,
            )
            .bind(kind.as_str())
            .bind(entity_id)
            .bind(scope.kind())
            .bind(scope.id())
            .bind(y)
            .bind(delta)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                r#"
                DELETE FROM frequencies
                WHERE kind = ? AND entity_id = ? AND scope_kind = ? AND scope_id = ?
                  AND year = ? AND count <= 0
                "#,
            )
            .bind(kind.as_str())
            .bind(entity_id)
            .bind(scope.kind())
            .bind(scope.id())
            .bind(y)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn frequency_count(
        &self,
        kind: NameKind,
        entity_id: i64,
        scope: CounterScope,
        year: Option<i32>,
    ) -> Result<i64> {
        let count: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT count FROM frequencies
            WHERE kind = ? AND entity_id = ? AND scope_kind = ? AND scope_id = ? AND year = ?
            "#,
        )
        .bind(kind.as_str())
        .bind(entity_id)
        .bind(scope.kind())
        .bind(scope.id())
        .bind(year.unwrap_or(0))
        .fetch_optional(&self.pool)
        .await?;
        Ok(count.unwrap_or(0))
    }

    async fn frequency_rows(&self, scope: Option<CounterScope>) -> Result<Vec<FrequencyRow>> {
        let kind = scope.map(|s| s.kind());
        let rows = sqlx::query(
            r#"
            SELECT kind, entity_id, scope_kind, scope_id, year, count FROM frequencies
            WHERE (? IS NULL OR (scope_kind = ? AND scope_id = ?))
            ORDER BY kind, entity_id, scope_kind, scope_id, year
            "#,
        )
        .bind(kind)
        .bind(kind)
        .bind(scope.map(|s| s.id()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| -> Result<FrequencyRow> {
                let year: i32 = r.get("year");
                Ok(FrequencyRow {
                    kind: name_kind_from(&r.get::<String, _>("kind"))?,
                    entity_id: r.get("entity_id"),
                    scope: scope_from(&r.get::<String, _>("scope_kind"), r.get("scope_id"))?,
                    year: (year != 0).then_some(year),
                    count: r.get("count"),
                })
            })
            .collect()
    }

    async fn clear_frequencies(&self, scope: Option<CounterScope>) -> Result<()> {
        let kind = scope.map(|s| s.kind());
        sqlx::query(
            "DELETE FROM frequencies WHERE (? IS NULL OR (scope_kind = ? AND scope_id = ?))",
        )
        .bind(kind)
        .bind(kind)
        .bind(scope.map(|s| s.id()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── Dictionaries ──

    async fn find_cognom_by_key(&self, key: &str) -> Result<Option<CognomCanonical>> {
        let row = sqlx::query(
            r#"
            SELECT id, form, key FROM cognoms WHERE key = ?
            UNION ALL
            SELECT * FROM (
                SELECT c.id, c.form, c.key FROM cognom_variants v
                JOIN cognoms c ON c.id = v.canonical_id
                WHERE v.published = 1 AND v.key = ?
                ORDER BY v.id
            )
            LIMIT 1
            "#,
        )
        .bind(key)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| CognomCanonical {
            id: r.get("id"),
            form: r.get("form"),
            key: r.get("key"),
        }))
    }

    async fn get_cognom(&self, id: i64) -> Result<Option<CognomCanonical>> {
        let row = sqlx::query("SELECT id, form, key FROM cognoms WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| CognomCanonical {
            id: r.get("id"),
            form: r.get("form"),
            key: r.get("key"),
        }))
    }

    async fn create_cognom(&self, form: &str, key: &str) -> Result<CognomCanonical> {
        let result = sqlx::query("INSERT INTO cognoms (form, key) VALUES (?, ?)")
            .bind(form)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(CognomCanonical {
            id: result.last_insert_rowid(),
            form: form.to_string(),
            key: key.to_string(),
        })
    }

    async fn add_cognom_variant(
        &self,
        canonical_id: i64,
        form: &str,
        key: &str,
        published: bool,
    ) -> Result<i64> {
        if self.get_cognom(canonical_id).await?.is_none() {
            bail!("canonical surname {} not found", canonical_id);
        }
        let result = sqlx::query(
            "INSERT INTO cognom_variants (canonical_id, form, key, published) VALUES (?, ?, ?, ?)",
        )
        .bind(canonical_id)
        .bind(form)
        .bind(key)
        .bind(published)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_cognom_variants(&self, canonical_id: i64) -> Result<Vec<CognomVariant>> {
        let rows = sqlx::query(
            "SELECT id, canonical_id, form, key, published FROM cognom_variants WHERE canonical_id = ? ORDER BY id",
        )
        .bind(canonical_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| CognomVariant {
                id: r.get("id"),
                canonical_id: r.get("canonical_id"),
                form: r.get("form"),
                key: r.get("key"),
                published: r.get("published"),
            })
            .collect())
    }

    async fn find_or_create_given_name(&self, key: &str, form: &str) -> Result<i64> {
        sqlx::query("INSERT INTO given_names (key, form) VALUES (?, ?) ON CONFLICT(key) DO NOTHING")
            .bind(key)
            .bind(form)
            .execute(&self.pool)
            .await?;
        let id: i64 = sqlx::query_scalar("SELECT id FROM given_names WHERE key = ?")
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    // ── Search ──

    async fn upsert_search_doc(&self, doc: &SearchDoc) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO search_docs (entity, entity_id, given_norm, surnames_norm, full_norm,
                                     person_tokens, surname_tokens, person_phonetic,
                                     surname_phonetic, surname_canon, municipality_id, book_id,
                                     archive_id, ecclesiastic_entity_id, act_date, act_year)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(entity, entity_id) DO UPDATE SET
                given_norm = excluded.given_norm,
                surnames_norm = excluded.surnames_norm,
                full_norm = excluded.full_norm,
                person_tokens = excluded.person_tokens,
                surname_tokens = excluded.surname_tokens,
                person_phonetic = excluded.person_phonetic,
                surname_phonetic = excluded.surname_phonetic,
                surname_canon = excluded.surname_canon,
                municipality_id = excluded.municipality_id,
                book_id = excluded.book_id,
                archive_id = excluded.archive_id,
                ecclesiastic_entity_id = excluded.ecclesiastic_entity_id,
                act_date = excluded.act_date,
                act_year = excluded.act_year
            "#,
        )
        .bind(doc.entity.as_str())
        .bind(doc.entity_id)
        .bind(&doc.given_norm)
        .bind(&doc.surnames_norm)
        .bind(&doc.full_norm)
        .bind(&doc.person_tokens)
        .bind(&doc.surname_tokens)
        .bind(&doc.person_phonetic)
        .bind(&doc.surname_phonetic)
        .bind(&doc.surname_canon)
        .bind(doc.municipality_id)
        .bind(doc.book_id)
        .bind(doc.archive_id)
        .bind(doc.ecclesiastic_entity_id)
        .bind(date_label(doc.act_date))
        .bind(doc.act_year)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_search_doc(&self, entity: SearchEntity, entity_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM search_docs WHERE entity = ? AND entity_id = ?")
            .bind(entity.as_str())
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_search_doc(
        &self,
        entity: SearchEntity,
        entity_id: i64,
    ) -> Result<Option<SearchDoc>> {
        let row = sqlx::query("SELECT * FROM search_docs WHERE entity = ? AND entity_id = ?")
            .bind(entity.as_str())
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(search_doc_from_row).transpose()
    }

    async fn list_search_docs(&self, entity: Option<SearchEntity>) -> Result<Vec<SearchDoc>> {
        let entity = entity.map(|e| e.as_str());
        let rows = sqlx::query(
            "SELECT * FROM search_docs WHERE (? IS NULL OR entity = ?) ORDER BY entity, entity_id",
        )
        .bind(entity)
        .bind(entity)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(search_doc_from_row).collect()
    }

    async fn clear_search_docs(&self, entity: Option<SearchEntity>) -> Result<()> {
        let entity = entity.map(|e| e.as_str());
        sqlx::query("DELETE FROM search_docs WHERE (? IS NULL OR entity = ?)")
            .bind(entity)
            .bind(entity)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search_candidates(&self, terms: &[String], limit: i64) -> Result<Vec<SearchDoc>> {
        if terms.is_empty() || limit <= 0 {
            return Ok(Vec::new());
        }
        const FIELDS: [&str; 4] = [
            "person_tokens",
            "surname_tokens",
            "person_phonetic",
            "surname_canon",
        ];
        let mut clauses = Vec::with_capacity(terms.len() * FIELDS.len());
        for _ in terms {
            for f in FIELDS {
                clauses.push(format!("(' ' || {} || ' ') LIKE ? ESCAPE '\\'", f));
            }
        }
        let sql = format!(
            "SELECT * FROM search_docs WHERE {} ORDER BY entity_id LIMIT ?",
            clauses.join(" OR ")
        );
        let mut query = sqlx::query(&sql);
        for term in terms {
            let pattern = format!("% {} %", like_escape(term));
            for _ in FIELDS {
                query = query.bind(pattern.clone());
            }
        }
        let rows = query.bind(limit).fetch_all(&self.pool).await?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in &rows {
            let doc = search_doc_from_row(row)?;
            let hit = terms.iter().any(|t| {
                contains_word(&doc.person_tokens, t)
                    || contains_word(&doc.surname_tokens, t)
                    || contains_word(&doc.person_phonetic, t)
                    || contains_word(&doc.surname_canon, t)
            });
            if hit {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    // ── Templates ──

    async fn insert_template(&self, template: &ImportTemplate) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO templates (owner_id, name, description, visibility, default_separator,
                                   model_json, signature, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(template.owner_id)
        .bind(&template.name)
        .bind(&template.description)
        .bind(template.visibility.as_str())
        .bind(&template.default_separator)
        .bind(serde_json::to_string(&template.model)?)
        .bind(&template.signature)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn update_template(&self, template: &ImportTemplate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE templates SET
                owner_id = ?, name = ?, description = ?, visibility = ?,
                default_separator = ?, model_json = ?, signature = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(template.owner_id)
        .bind(&template.name)
        .bind(&template.description)
        .bind(template.visibility.as_str())
        .bind(&template.default_separator)
        .bind(serde_json::to_string(&template.model)?)
        .bind(&template.signature)
        .bind(template.updated_at)
        .bind(template.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("template {} not found", template.id);
        }
        Ok(())
    }

    async fn get_template(&self, id: i64) -> Result<Option<ImportTemplate>> {
        let row = sqlx::query("SELECT * FROM templates WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(template_from_row).transpose()
    }

    async fn list_templates(&self) -> Result<Vec<ImportTemplate>> {
        let rows = sqlx::query("SELECT * FROM templates ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(template_from_row).collect()
    }

    // ── Activity and achievements ──

    async fn append_activity(&self, activity: &UserActivity) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO activities (user_id, rule_code, action, object_type, object_id, points,
                                    status, created_at, details_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(activity.user_id)
        .bind(&activity.rule_code)
        .bind(&activity.action)
        .bind(&activity.object_type)
        .bind(activity.object_id)
        .bind(activity.points)
        .bind(&activity.status)
        .bind(activity.created_at.timestamp())
        .bind(serde_json::to_string(&activity.details)?)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_activities(&self, user_id: i64) -> Result<Vec<UserActivity>> {
        let rows = sqlx::query("SELECT * FROM activities WHERE user_id = ? ORDER BY created_at, id")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(activity_from_row).collect()
    }

    async fn insert_achievement(&self, achievement: &Achievement) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO achievements (code, name, rule_json, repeatable, enabled,
                                      event_start, event_end)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&achievement.code)
        .bind(&achievement.name)
        .bind(serde_json::to_string(&achievement.rule)?)
        .bind(achievement.repeatable)
        .bind(achievement.enabled)
        .bind(achievement.event_start.map(|t| t.timestamp()))
        .bind(achievement.event_end.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_achievements(&self) -> Result<Vec<Achievement>> {
        let rows = sqlx::query("SELECT * FROM achievements ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(achievement_from_row).collect()
    }

    async fn has_user_achievement(&self, user_id: i64, achievement_id: i64) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM user_achievements WHERE user_id = ? AND achievement_id = ?",
        )
        .bind(user_id)
        .bind(achievement_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn award_achievement(&self, award: &UserAchievement) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_achievements (user_id, achievement_id, awarded_at, metadata_json)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(award.user_id)
        .bind(award.achievement_id)
        .bind(award.awarded_at.timestamp())
        .bind(serde_json::to_string(&award.metadata)?)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_user_achievements(&self, user_id: i64) -> Result<Vec<UserAchievement>> {
        let rows = sqlx::query("SELECT * FROM user_achievements WHERE user_id = ? ORDER BY id")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(award_from_row).collect()
    }
}
