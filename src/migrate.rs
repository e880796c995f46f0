use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

use crate::config::Config;
use crate::db;

/// Idempotent schema, one statement per table or index.
const SCHEMA: &[(&str, &str)] = &[
    (
        "books",
        r#"
        CREATE TABLE IF NOT EXISTS books (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL DEFAULT '',
            chronology TEXT NOT NULL DEFAULT '',
            municipality_id INTEGER,
            archive_id INTEGER,
            ecclesiastic_entity_id INTEGER,
            fully_indexed INTEGER NOT NULL DEFAULT 0,
            book_type TEXT NOT NULL DEFAULT ''
        )
        "#,
    ),
    (
        "book_stats",
        r#"
        CREATE TABLE IF NOT EXISTS book_stats (
            book_id INTEGER PRIMARY KEY,
            total_records INTEGER NOT NULL,
            total_fields INTEGER NOT NULL,
            filled_fields INTEGER NOT NULL,
            percentage INTEGER NOT NULL,
            computed_at INTEGER NOT NULL,
            FOREIGN KEY (book_id) REFERENCES books(id)
        )
        "#,
    ),
    (
        "records",
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            book_id INTEGER NOT NULL,
            record_type TEXT NOT NULL,
            page_label TEXT NOT NULL DEFAULT '',
            page_position INTEGER,
            document_year INTEGER,
            act_date_text TEXT NOT NULL DEFAULT '',
            act_date TEXT,
            act_date_quality TEXT,
            literal TEXT NOT NULL DEFAULT '',
            marginalia TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'pending',
            created_by INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (book_id) REFERENCES books(id)
        )
        "#,
    ),
    (
        "idx_records_book",
        "CREATE INDEX IF NOT EXISTS idx_records_book ON records(book_id, status)",
    ),
    (
        "persons",
        r#"
        CREATE TABLE IF NOT EXISTS persons (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_id INTEGER NOT NULL,
            role TEXT NOT NULL,
            given_name TEXT NOT NULL DEFAULT '',
            given_name_quality TEXT,
            surname1 TEXT NOT NULL DEFAULT '',
            surname1_quality TEXT,
            surname2 TEXT NOT NULL DEFAULT '',
            surname2_quality TEXT,
            maiden_surname TEXT NOT NULL DEFAULT '',
            maiden_surname_quality TEXT,
            sex TEXT NOT NULL DEFAULT '',
            sex_quality TEXT,
            age TEXT NOT NULL DEFAULT '',
            age_quality TEXT,
            civil_status TEXT NOT NULL DEFAULT '',
            civil_status_quality TEXT,
            municipality TEXT NOT NULL DEFAULT '',
            municipality_quality TEXT,
            occupation TEXT NOT NULL DEFAULT '',
            occupation_quality TEXT,
            house_name TEXT NOT NULL DEFAULT '',
            house_name_quality TEXT,
            notes TEXT NOT NULL DEFAULT '',
            person_id INTEGER,
            FOREIGN KEY (record_id) REFERENCES records(id)
        )
        "#,
    ),
    (
        "idx_persons_record",
        "CREATE INDEX IF NOT EXISTS idx_persons_record ON persons(record_id)",
    ),
    (
        "attributes",
        r#"
        CREATE TABLE IF NOT EXISTS attributes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_id INTEGER NOT NULL,
            key TEXT NOT NULL,
            value_json TEXT,
            quality TEXT,
            notes TEXT NOT NULL DEFAULT '',
            FOREIGN KEY (record_id) REFERENCES records(id)
        )
        "#,
    ),
    (
        "idx_attributes_record",
        "CREATE INDEX IF NOT EXISTS idx_attributes_record ON attributes(record_id)",
    ),
    (
        "countries",
        r#"
        CREATE TABLE IF NOT EXISTS countries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            iso2 TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        )
        "#,
    ),
    (
        "levels",
        r#"
        CREATE TABLE IF NOT EXISTS levels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            country_id INTEGER NOT NULL,
            depth INTEGER NOT NULL,
            name TEXT NOT NULL,
            parent_id INTEGER
        )
        "#,
    ),
    (
        "municipalities",
        r#"
        CREATE TABLE IF NOT EXISTS municipalities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            country_id INTEGER,
            level_1 INTEGER,
            level_2 INTEGER,
            level_3 INTEGER,
            level_4 INTEGER,
            level_5 INTEGER,
            level_6 INTEGER,
            level_7 INTEGER,
            parent_id INTEGER
        )
        "#,
    ),
    (
        "demography",
        r#"
        CREATE TABLE IF NOT EXISTS demography (
            scope_kind TEXT NOT NULL,
            scope_id INTEGER NOT NULL,
            year INTEGER NOT NULL,
            bucket TEXT NOT NULL,
            count INTEGER NOT NULL,
            PRIMARY KEY (scope_kind, scope_id, year, bucket)
        )
        "#,
    ),
    // year = 0 holds the all-years total.
    (
        "frequencies",
        r#"
        CREATE TABLE IF NOT EXISTS frequencies (
            kind TEXT NOT NULL,
            entity_id INTEGER NOT NULL,
            scope_kind TEXT NOT NULL,
            scope_id INTEGER NOT NULL,
            year INTEGER NOT NULL,
            count INTEGER NOT NULL,
            PRIMARY KEY (kind, entity_id, scope_kind, scope_id, year)
        )
        "#,
    ),
    (
        "cognoms",
        r#"
        CREATE TABLE IF NOT EXISTS cognoms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            form TEXT NOT NULL,
            key TEXT NOT NULL UNIQUE
        )
        "#,
    ),
    (
        "cognom_variants",
        r#"
        CREATE TABLE IF NOT EXISTS cognom_variants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            canonical_id INTEGER NOT NULL,
            form TEXT NOT NULL,
            key TEXT NOT NULL,
            published INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (canonical_id) REFERENCES cognoms(id)
        )
        "#,
    ),
    (
        "idx_cognom_variants_key",
        "CREATE INDEX IF NOT EXISTS idx_cognom_variants_key ON cognom_variants(key)",
    ),
    (
        "given_names",
        r#"
        CREATE TABLE IF NOT EXISTS given_names (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL UNIQUE,
            form TEXT NOT NULL
        )
        "#,
    ),
    (
        "search_docs",
        r#"
        CREATE TABLE IF NOT EXISTS search_docs (
            entity TEXT NOT NULL,
            entity_id INTEGER NOT NULL,
            given_norm TEXT NOT NULL DEFAULT '',
            surnames_norm TEXT NOT NULL DEFAULT '',
            full_norm TEXT NOT NULL DEFAULT '',
            person_tokens TEXT NOT NULL DEFAULT '',
            surname_tokens TEXT NOT NULL DEFAULT '',
            person_phonetic TEXT NOT NULL DEFAULT '',
            surname_phonetic TEXT NOT NULL DEFAULT '',
            surname_canon TEXT NOT NULL DEFAULT '',
            municipality_id INTEGER,
            book_id INTEGER,
            archive_id INTEGER,
            ecclesiastic_entity_id INTEGER,
            act_date TEXT,
            act_year INTEGER,
            PRIMARY KEY (entity, entity_id)
        )
        "#,
    ),
    (
        "templates",
        r#"
        CREATE TABLE IF NOT EXISTS templates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            visibility TEXT NOT NULL DEFAULT 'private',
            default_separator TEXT NOT NULL DEFAULT ';',
            model_json TEXT NOT NULL,
            signature TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    ),
    (
        "activities",
        r#"
        CREATE TABLE IF NOT EXISTS activities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            rule_code TEXT NOT NULL,
            action TEXT NOT NULL DEFAULT '',
            object_type TEXT NOT NULL DEFAULT '',
            object_id INTEGER NOT NULL DEFAULT 0,
            points INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            details_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    ),
    (
        "idx_activities_user",
        "CREATE INDEX IF NOT EXISTS idx_activities_user ON activities(user_id, created_at)",
    ),
    (
        "achievements",
        r#"
        CREATE TABLE IF NOT EXISTS achievements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            rule_json TEXT NOT NULL,
            repeatable INTEGER NOT NULL DEFAULT 0,
            enabled INTEGER NOT NULL DEFAULT 1,
            event_start INTEGER,
            event_end INTEGER
        )
        "#,
    ),
    (
        "user_achievements",
        r#"
        CREATE TABLE IF NOT EXISTS user_achievements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            achievement_id INTEGER NOT NULL,
            awarded_at INTEGER NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            FOREIGN KEY (achievement_id) REFERENCES achievements(id)
        )
        "#,
    ),
];

/// Create every table and index on an open pool.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    for (name, sql) in SCHEMA {
        sqlx::query(sql)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create {}", name))?;
        debug!(object = name, "schema object ready");
    }
    Ok(())
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;

    Ok(())
}
