//! SQLite store tests.
//!
//! Drive the ingestion engine and lifecycle hooks through [`SqliteStore`]
//! on a temporary database, checking that counters, the search index and
//! progress behave the same way they do in memory.

use std::path::Path;

use arxiu::config::{load_config, Config};
use arxiu::db;
use arxiu::migrate::apply_schema;
use arxiu::sqlite_store::SqliteStore;
use arxiu_core::ingest::{ingest, IngestRequest};
use arxiu_core::lifecycle::{mark_edited, set_status};
use arxiu_core::models::{
    AdminLevel, Book, CounterScope, Country, DemographyBucket, ModerationStatus, Municipality,
    NameKind, RecordFilter, SearchEntity, LEVEL_SLOTS,
};
use arxiu_core::normalize::canonical_surname_key;
use arxiu_core::rollup::{rebuild, RollupScope};
use arxiu_core::search::{search, SearchWeights};
use arxiu_core::store::Store;
use arxiu_core::template::registry::{create_template, TemplateDraft};
use arxiu_core::template::TemplateProgram;
use serde_json::json;
use sqlx::SqlitePool;
use tempfile::TempDir;

fn test_config(root: &Path) -> Config {
    let path = root.join("arxiu.toml");
    std::fs::write(
        &path,
        format!("[db]\npath = \"{}/arxiu.sqlite\"\n", root.display()),
    )
    .unwrap();
    load_config(&path).unwrap()
}

async fn open() -> (TempDir, SqlitePool, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let pool = db::connect(&config).await.unwrap();
    apply_schema(&pool).await.unwrap();
    let store = SqliteStore::new(pool.clone());
    (tmp, pool, store)
}

/// Municipality → comarca → provincia; returns (municipality, comarca, provincia).
async fn seed_territory(store: &SqliteStore) -> (i64, i64, i64) {
    let country = store
        .insert_country(&Country {
            id: 0,
            iso2: "ES".into(),
            name: "Espanya".into(),
        })
        .await
        .unwrap();
    let provincia = store
        .insert_level(&AdminLevel {
            id: 0,
            country_id: country,
            depth: 1,
            name: "Tarragona".into(),
            parent_id: None,
        })
        .await
        .unwrap();
    let comarca = store
        .insert_level(&AdminLevel {
            id: 0,
            country_id: country,
            depth: 2,
            name: "Alt Camp".into(),
            parent_id: Some(provincia),
        })
        .await
        .unwrap();
    let mut levels = [None; LEVEL_SLOTS];
    levels[1] = Some(comarca);
    let municipality = store
        .insert_municipality(&Municipality {
            id: 0,
            name: "Valls".into(),
            country_id: Some(country),
            levels,
            parent_id: None,
        })
        .await
        .unwrap();
    (municipality, comarca, provincia)
}

fn baptism_program() -> TemplateProgram {
    TemplateProgram::from_json(&json!({
        "metadata": {"record_type": "baptism"},
        "book_resolution": {"mode": "by_id", "column": "llibre"},
        "mapping": {"columns": [
            {"header": "cognoms", "required": true, "map_to": [
                {"target": "person.batejat", "transforms": ["parse_person_from_cognoms_v2"]}
            ]},
            {"header": "bateig", "map_to": [
                {"target": "base.data_acte", "transforms": ["parse_date_flexible_to_base_data_acte"]}
            ]},
            {"header": "pagina", "map_to": [{"target": "base.pagina"}]},
            {"header": "padrins", "map_to": [{"target": "attr.padrins"}]}
        ]},
        "policies": {"default_status": "published"}
    }))
    .unwrap()
}

async fn seed_book(store: &SqliteStore, municipality: i64) -> i64 {
    store
        .upsert_book(&Book {
            title: "Baptismes 1801-1820".into(),
            chronology: "1801-1820".into(),
            municipality_id: Some(municipality),
            book_type: "baptisme".into(),
            ..Default::default()
        })
        .await
        .unwrap()
}

// ─── Ingestion and roll-ups ─────────────────────────────────────────

#[tokio::test]
async fn test_ingest_feeds_counters_on_sqlite() {
    let (_tmp, pool, store) = open().await;
    let (municipality, comarca, provincia) = seed_territory(&store).await;
    let book = seed_book(&store, municipality).await;

    let program = baptism_program();
    let csv = format!(
        "llibre;cognoms;bateig;pagina;padrins\n\
         {book};Puig Ferrer Joan;12/03/1803;4;Pere Sala\n\
         {book};Vidal Soler Maria;02/05/1803;4;\n"
    );
    let outcome = ingest(&store, &IngestRequest::new(&program), csv.as_bytes()).await;
    assert_eq!(outcome.created, 2, "errors: {:?}", outcome.errors);

    for scope in [
        CounterScope::Municipality(municipality),
        CounterScope::Level(comarca),
        CounterScope::Level(provincia),
    ] {
        let n = store
            .demography_count(scope, 1803, DemographyBucket::Births)
            .await
            .unwrap();
        assert_eq!(n, 2);
    }

    let puig = store
        .find_cognom_by_key(&canonical_surname_key("Puig"))
        .await
        .unwrap()
        .unwrap();
    let scope = CounterScope::Municipality(municipality);
    assert_eq!(
        store
            .frequency_count(NameKind::Surname, puig.id, scope, Some(1803))
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        store
            .frequency_count(NameKind::Surname, puig.id, scope, None)
            .await
            .unwrap(),
        1
    );

    let pages = store.page_record_counts(book).await.unwrap();
    assert_eq!(pages.get("4"), Some(&2));

    pool.close().await;
}

#[tokio::test]
async fn test_rejecting_and_editing_roll_back() {
    let (_tmp, pool, store) = open().await;
    let (municipality, _, _) = seed_territory(&store).await;
    let book = seed_book(&store, municipality).await;

    let program = baptism_program();
    let csv = format!("llibre;cognoms;bateig\n{book};Puig Ferrer Joan;12/03/1803\n");
    ingest(&store, &IngestRequest::new(&program), csv.as_bytes()).await;
    let id = store.list_records(&RecordFilter::default()).await.unwrap()[0].id;
    assert!(store
        .get_search_doc(SearchEntity::Registre, id)
        .await
        .unwrap()
        .is_some());

    let t = mark_edited(&store, id).await.unwrap();
    assert_eq!(t.from, ModerationStatus::Published);
    assert_eq!(t.to, ModerationStatus::Pending);
    let scope = CounterScope::Municipality(municipality);
    assert_eq!(
        store
            .demography_count(scope, 1803, DemographyBucket::Births)
            .await
            .unwrap(),
        0
    );
    assert!(store
        .get_search_doc(SearchEntity::Registre, id)
        .await
        .unwrap()
        .is_none());

    set_status(&store, id, ModerationStatus::Published, None)
        .await
        .unwrap();
    assert_eq!(
        store
            .demography_count(scope, 1803, DemographyBucket::Births)
            .await
            .unwrap(),
        1
    );

    set_status(&store, id, ModerationStatus::Rejected, None)
        .await
        .unwrap();
    assert!(store.demography_rows(None).await.unwrap().is_empty());
    assert!(store.frequency_rows(None).await.unwrap().is_empty());

    pool.close().await;
}

#[tokio::test]
async fn test_rebuild_matches_incremental_on_sqlite() {
    let (_tmp, pool, store) = open().await;
    let (municipality, comarca, _) = seed_territory(&store).await;
    let book = seed_book(&store, municipality).await;

    let program = baptism_program();
    let csv = format!(
        "llibre;cognoms;bateig\n\
         {book};Puig Ferrer Joan;12/03/1803\n\
         {book};Puig Sala Anna;30/01/1805\n\
         {book};Vidal Soler Maria;\n"
    );
    ingest(&store, &IngestRequest::new(&program), csv.as_bytes()).await;

    let demography = store.demography_rows(None).await.unwrap();
    let frequencies = store.frequency_rows(None).await.unwrap();

    let report = rebuild(&store, RollupScope::All).await.unwrap();
    assert_eq!(report.records, 3);
    assert_eq!(store.demography_rows(None).await.unwrap(), demography);
    assert_eq!(store.frequency_rows(None).await.unwrap(), frequencies);

    // A level-scoped rebuild leaves the other scopes alone.
    rebuild(&store, RollupScope::Level(comarca)).await.unwrap();
    assert_eq!(store.demography_rows(None).await.unwrap(), demography);

    pool.close().await;
}

#[tokio::test]
async fn test_merge_and_moderation_match_rebuild_on_sqlite() {
    let (_tmp, pool, store) = open().await;
    let (municipality, _, _) = seed_territory(&store).await;
    let book = store
        .upsert_book(&Book {
            title: "Baptismes 1801-1820".into(),
            chronology: "1801-1820".into(),
            municipality_id: Some(municipality),
            book_type: "baptisme".into(),
            fully_indexed: true,
            ..Default::default()
        })
        .await
        .unwrap();

    let program = TemplateProgram::from_json(&json!({
        "metadata": {"record_type": "baptism"},
        "book_resolution": {"mode": "by_id", "column": "llibre"},
        "mapping": {"columns": [
            {"header": "cognoms", "required": true, "map_to": [
                {"target": "person.batejat", "transforms": ["parse_person_from_cognoms_v2"]}
            ]},
            {"header": "any", "map_to": [{"target": "base.any_doc"}]}
        ]},
        "policies": {
            "default_status": "published",
            "merge_existing": {
                "mode": "by_principal_person_if_book_indexed",
                "update_missing_only": true
            }
        }
    }))
    .unwrap();

    let csv = format!("llibre;cognoms;any\n{book};Vidal Maria;1803\n{book};Puig Joan;\n");
    ingest(&store, &IngestRequest::new(&program), csv.as_bytes()).await;
    let csv = format!("llibre;cognoms;any\n{book};Puig Joan;1803\n");
    let outcome = ingest(&store, &IngestRequest::new(&program), csv.as_bytes()).await;
    assert_eq!(outcome.updated, 1, "errors: {:?}", outcome.errors);

    let scope = CounterScope::Municipality(municipality);
    assert_eq!(
        store
            .demography_count(scope, 1803, DemographyBucket::Births)
            .await
            .unwrap(),
        2
    );

    let records = store.list_records(&RecordFilter::default()).await.unwrap();
    set_status(&store, records[0].id, ModerationStatus::Rejected, None)
        .await
        .unwrap();
    mark_edited(&store, records[1].id).await.unwrap();
    set_status(&store, records[1].id, ModerationStatus::Published, None)
        .await
        .unwrap();

    let demography = store.demography_rows(None).await.unwrap();
    let frequencies = store.frequency_rows(None).await.unwrap();
    assert_eq!(demography.iter().map(|r| r.count).max(), Some(1));
    rebuild(&store, RollupScope::All).await.unwrap();
    assert_eq!(store.demography_rows(None).await.unwrap(), demography);
    assert_eq!(store.frequency_rows(None).await.unwrap(), frequencies);

    pool.close().await;
}

// ─── Search and templates ───────────────────────────────────────────

#[tokio::test]
async fn test_search_ranks_exact_name_first() {
    let (_tmp, pool, store) = open().await;
    let (municipality, _, _) = seed_territory(&store).await;
    let book = seed_book(&store, municipality).await;

    let program = baptism_program();
    let csv = format!(
        "llibre;cognoms;bateig\n\
         {book};Puig Ferrer Joan;12/03/1803\n\
         {book};Puig Sala Anna;30/01/1805\n\
         {book};Vidal Soler Maria;02/05/1804\n"
    );
    ingest(&store, &IngestRequest::new(&program), csv.as_bytes()).await;

    let hits = search(&store, "Joan Puig Ferrer", &SearchWeights::default(), 10)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    let first = store.get_record(hits[0].doc.entity_id).await.unwrap().unwrap();
    let persons = store.list_persons(first.id).await.unwrap();
    assert_eq!(persons[0].surname2.value, "Ferrer");
    assert!(hits.iter().all(|h| h.doc.entity == SearchEntity::Registre));
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

    pool.close().await;
}

#[tokio::test]
async fn test_template_round_trip() {
    let (_tmp, pool, store) = open().await;

    let model = json!({
        "metadata": {"record_type": "death"},
        "book_resolution": {"mode": "by_id", "column": "llibre"},
        "mapping": {"columns": [
            {"header": "difunt", "map_to": [{"target": "person.difunt", "transforms": ["parse_person_from_nom_v2"]}]}
        ]}
    });
    let draft = TemplateDraft {
        model: model.clone(),
        name: "Obits".into(),
        description: String::new(),
        visibility: Default::default(),
        default_separator: ";".into(),
    };
    let created = create_template(&store, Some(7), draft).await.unwrap();
    let loaded = store.get_template(created.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "Obits");
    assert_eq!(loaded.owner_id, Some(7));
    assert_eq!(loaded.model, model);
    assert_eq!(loaded.signature, created.signature);

    pool.close().await;
}
