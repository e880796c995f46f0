//! End-to-end ingestion tests against the in-memory store: template
//! compilation, book lookup, dedup, merge, roll-ups and search together.

use arxiu_core::ingest::{ingest, IngestOutcome, IngestRequest, RowErrorCode};
use arxiu_core::lifecycle::{mark_edited, set_status};
use arxiu_core::models::{
    AdminLevel, AttributeValue, Book, CounterScope, Country, DemographyBucket, ModerationStatus,
    Municipality, NameKind, RecordFilter, SearchEntity, LEVEL_SLOTS,
};
use arxiu_core::normalize::canonical_surname_key;
use arxiu_core::rollup::{rebuild, RollupScope};
use arxiu_core::search::{search, SearchWeights};
use arxiu_core::store::memory::InMemoryStore;
use arxiu_core::store::Store;
use arxiu_core::template::sample::sample_table;
use arxiu_core::template::TemplateProgram;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

const BOOK_ID: i64 = 10;

struct Territory {
    municipality: i64,
    comarca: i64,
    provincia: i64,
}

/// Country → provincia → comarca, and one municipality in the comarca.
async fn territory(store: &InMemoryStore) -> Territory {
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
    Territory {
        municipality,
        comarca,
        provincia,
    }
}

async fn setup(fully_indexed: bool) -> (InMemoryStore, Territory) {
    let store = InMemoryStore::new();
    let t = territory(&store).await;
    store
        .upsert_book(&Book {
            id: BOOK_ID,
            title: "Baptismes".into(),
            chronology: "1801-1820".into(),
            municipality_id: Some(t.municipality),
            fully_indexed,
            book_type: "baptisme".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    (store, t)
}

fn model(policies: Value) -> Value {
    json!({
        "metadata": {"version": 1, "record_type": "baptism"},
        "book_resolution": {"mode": "by_chronology_label", "column": "llibre", "normalize_chronology": true},
        "mapping": {"columns": [
            {"header": "cognoms", "required": true, "map_to": [
                {"target": "person.batejat", "transforms": ["parse_person_from_cognoms_v2"]}
            ]},
            {"header": "bateig", "map_to": [
                {"target": "base.data_acte", "transforms": ["parse_date_flexible_to_base_data_acte"]}
            ]},
            {"header": "any", "map_to": [{"target": "base.any_doc"}]},
            {"header": "observacions", "map_to": [{"target": "attr.observacions"}]}
        ]},
        "policies": policies
    })
}

fn program(policies: Value) -> TemplateProgram {
    TemplateProgram::from_json(&model(policies)).unwrap()
}

async fn run(store: &InMemoryStore, program: &TemplateProgram, csv: &str) -> IngestOutcome {
    let req = IngestRequest::new(program);
    ingest(store, &req, csv.as_bytes()).await
}

#[tokio::test]
async fn test_within_file_dedup_reports_first_line() {
    let (store, _) = setup(false).await;
    let p = program(json!({"dedup": {"key_fields": ["llibre", "cognoms", "bateig"]}}));
    let csv = "llibre;cognoms;bateig\n\
               1801-1820;Puig Ferrer Joan;12/03/1803\n\
               1801-1820;Puig Ferrer Joan;12/03/1803\n";

    let outcome = run(&store, &p, csv).await;
    assert_eq!(outcome.created, 1);
    assert_eq!(outcome.failed, 1);
    let err = &outcome.errors[0];
    assert_eq!(err.code, RowErrorCode::DuplicateRow);
    assert_eq!(err.row, 3);
    assert_eq!(err.fields.get("duplicate_row").map(String::as_str), Some("2"));
}

#[tokio::test]
async fn test_merge_fills_missing_fields_of_indexed_book() {
    let (store, _) = setup(true).await;
    let p = program(json!({
        "merge_existing": {
            "mode": "by_principal_person_if_book_indexed",
            "update_missing_only": true,
            "add_missing_attrs": true
        }
    }));

    let first = run(&store, &p, "llibre;cognoms;any\n1801-1820;Puig Joan;\n").await;
    assert_eq!(first.created, 1);
    let second = run(
        &store,
        &p,
        "llibre;cognoms;any;observacions\n1801-1820;Puig Joan;1803;fill natural\n",
    )
    .await;
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 1);
    assert_eq!(second.failed, 0);

    let records = store.list_records(&RecordFilter::default()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].document_year, Some(1803));
    let attrs = store.list_attributes(records[0].id).await.unwrap();
    let obs = attrs.iter().find(|a| a.key == "observacions").unwrap();
    assert_eq!(obs.value, Some(AttributeValue::Text("fill natural".into())));

    // Nothing left to merge the second time round.
    let third = run(
        &store,
        &p,
        "llibre;cognoms;any;observacions\n1801-1820;Puig Joan;1803;fill natural\n",
    )
    .await;
    assert_eq!(third.unchanged, 1);
    assert_eq!(third.updated, 0);
}

#[tokio::test]
async fn test_published_baptism_feeds_every_ancestor_and_rolls_back() {
    let (store, t) = setup(false).await;
    let p = program(json!({"default_status": "published"}));
    let outcome = run(
        &store,
        &p,
        "llibre;cognoms;bateig\n1801-1820;Puig Ferrer Joan;12/03/1803\n",
    )
    .await;
    assert_eq!(outcome.created, 1);
    assert!(outcome.touched_books.contains(&BOOK_ID));

    let scopes = [
        CounterScope::Municipality(t.municipality),
        CounterScope::Level(t.comarca),
        CounterScope::Level(t.provincia),
    ];
    for scope in scopes {
        let n = store
            .demography_count(scope, 1803, DemographyBucket::Births)
            .await
            .unwrap();
        assert_eq!(n, 1, "births in {:?}", scope);
    }
    let puig = store
        .find_cognom_by_key(&canonical_surname_key("Puig"))
        .await
        .unwrap()
        .unwrap();
    let total = store
        .frequency_count(NameKind::Surname, puig.id, scopes[0], None)
        .await
        .unwrap();
    assert_eq!(total, 1);

    let hits = search(&store, "Puig Ferrer", &SearchWeights::default(), 10)
        .await
        .unwrap();
    let record_id = store.list_records(&RecordFilter::default()).await.unwrap()[0].id;
    assert_eq!(hits[0].doc.entity_id, record_id);

    let stats = store.get_book_stats(BOOK_ID).await.unwrap().unwrap();
    assert_eq!(stats.total_records, 1);
    assert!(stats.percentage > 0);

    set_status(&store, record_id, ModerationStatus::Rejected, None)
        .await
        .unwrap();
    for scope in scopes {
        let n = store
            .demography_count(scope, 1803, DemographyBucket::Births)
            .await
            .unwrap();
        assert_eq!(n, 0, "births in {:?} after rollback", scope);
    }
    assert!(store.frequency_rows(None).await.unwrap().is_empty());
    assert!(store
        .get_search_doc(SearchEntity::Registre, record_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_rebuild_reproduces_incremental_counters() {
    let (store, _) = setup(false).await;
    let p = program(json!({"default_status": "published"}));
    let csv = "llibre;cognoms;bateig\n\
               1801-1820;Puig Ferrer Joan;12/03/1803\n\
               1801-1820;Vidal Pons Maria;02/05/1804\n\
               1801-1820;Puig Sala Pere;19/11/1804\n";
    assert_eq!(run(&store, &p, csv).await.created, 3);

    let demography = store.demography_rows(None).await.unwrap();
    let frequencies = store.frequency_rows(None).await.unwrap();
    assert!(!demography.is_empty());

    let report = rebuild(&store, RollupScope::All).await.unwrap();
    assert_eq!(report.records, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(store.demography_rows(None).await.unwrap(), demography);
    assert_eq!(store.frequency_rows(None).await.unwrap(), frequencies);
}

/// Counters after a full rebuild must equal the incrementally maintained ones.
async fn assert_matches_rebuild(store: &InMemoryStore) {
    let demography = store.demography_rows(None).await.unwrap();
    let frequencies = store.frequency_rows(None).await.unwrap();
    let report = rebuild(store, RollupScope::All).await.unwrap();
    assert_eq!(report.failed, 0);
    assert_eq!(store.demography_rows(None).await.unwrap(), demography);
    assert_eq!(store.frequency_rows(None).await.unwrap(), frequencies);
}

fn published_merge_policies() -> Value {
    json!({
        "default_status": "published",
        "merge_existing": {
            "mode": "by_principal_person_if_book_indexed",
            "update_missing_only": true
        }
    })
}

async fn births_1803(store: &InMemoryStore, t: &Territory) -> i64 {
    store
        .demography_count(
            CounterScope::Municipality(t.municipality),
            1803,
            DemographyBucket::Births,
        )
        .await
        .unwrap()
}

async fn record_of(store: &InMemoryStore, surname: &str) -> i64 {
    for r in store.list_records(&RecordFilter::default()).await.unwrap() {
        let persons = store.list_persons(r.id).await.unwrap();
        if persons.iter().any(|p| p.surname1.value == surname) {
            return r.id;
        }
    }
    panic!("no record for {}", surname);
}

#[tokio::test]
async fn test_merge_into_published_record_moves_its_counters() {
    let (store, t) = setup(true).await;
    let p = program(published_merge_policies());
    let first = run(
        &store,
        &p,
        "llibre;cognoms;any\n1801-1820;Vidal Maria;1803\n1801-1820;Puig Joan;\n",
    )
    .await;
    assert_eq!(first.created, 2, "errors: {:?}", first.errors);
    assert_eq!(births_1803(&store, &t).await, 1);

    let second = run(&store, &p, "llibre;cognoms;any\n1801-1820;Puig Joan;1803\n").await;
    assert_eq!(second.updated, 1);
    assert_eq!(second.created, 0);
    assert_eq!(births_1803(&store, &t).await, 2);

    let puig = store
        .find_cognom_by_key(&canonical_surname_key("Puig"))
        .await
        .unwrap()
        .unwrap();
    let scope = CounterScope::Municipality(t.municipality);
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

    let id = record_of(&store, "Puig").await;
    let hits = search(&store, "Puig Joan", &SearchWeights::default(), 10)
        .await
        .unwrap();
    assert_eq!(hits.iter().filter(|h| h.doc.entity_id == id).count(), 1);
    assert_matches_rebuild(&store).await;
}

#[tokio::test]
async fn test_lifecycle_edits_after_merge_match_rebuild() {
    let (store, t) = setup(true).await;
    let p = program(published_merge_policies());
    run(
        &store,
        &p,
        "llibre;cognoms;any\n1801-1820;Vidal Maria;1803\n1801-1820;Puig Joan;\n",
    )
    .await;
    run(&store, &p, "llibre;cognoms;any\n1801-1820;Puig Joan;1803\n").await;

    assert_eq!(store.list_records(&RecordFilter::default()).await.unwrap().len(), 2);
    let puig = record_of(&store, "Puig").await;
    let vidal = record_of(&store, "Vidal").await;

    // Rejecting the merged record takes the merged year with it.
    set_status(&store, puig, ModerationStatus::Rejected, None)
        .await
        .unwrap();
    assert_eq!(births_1803(&store, &t).await, 1);
    assert!(store
        .get_search_doc(SearchEntity::Registre, puig)
        .await
        .unwrap()
        .is_none());
    assert_matches_rebuild(&store).await;

    // Edit then republish leaves the counters where they started.
    let before = store.demography_rows(None).await.unwrap();
    mark_edited(&store, vidal).await.unwrap();
    assert_eq!(births_1803(&store, &t).await, 0);
    assert_matches_rebuild(&store).await;
    set_status(&store, vidal, ModerationStatus::Published, None)
        .await
        .unwrap();
    assert_eq!(store.demography_rows(None).await.unwrap(), before);
    assert_matches_rebuild(&store).await;

    // Bringing the rejected record back counts it once, with its merged year.
    set_status(&store, puig, ModerationStatus::Published, None)
        .await
        .unwrap();
    assert_eq!(births_1803(&store, &t).await, 2);
    assert_matches_rebuild(&store).await;
}

#[tokio::test]
async fn test_sample_ingests_as_one_created_record() {
    let (store, _) = setup(false).await;
    let p = program(json!({}));
    let book = store.get_book(BOOK_ID).await.unwrap().unwrap();
    let csv = sample_table(&p, &book).to_csv(b';').unwrap();

    let outcome = run(&store, &p, &csv).await;
    assert_eq!(outcome.failed, 0, "errors: {:?}", outcome.errors);
    assert_eq!(outcome.created, 1);
}

#[tokio::test]
async fn test_samples_of_varied_templates_ingest_cleanly() {
    let cases = [
        ("surname first, by label", model(json!({}))),
        (
            "given first, by id",
            json!({
                "metadata": {"record_type": "baptism"},
                "book_resolution": {"mode": "by_id", "column": "llibre"},
                "mapping": {"columns": [
                    {"header": "nom", "required": true, "map_to": [
                        {"target": "person.batejat", "transforms": ["parse_person_from_nom_v2"]}
                    ]},
                    {"header": "pare", "map_to": [
                        {"target": "person.pare", "transforms": ["parse_person_from_nom"]}
                    ]},
                    {"header": "any", "map_to": [{"target": "base.any_doc"}]}
                ]}
            }),
        ),
        (
            "marriage couple",
            json!({
                "metadata": {"record_type": "marriage"},
                "book_resolution": {"mode": "by_chronology_label", "column": "llibre"},
                "mapping": {"columns": [
                    {"header": "parella", "required": true, "map_to": [
                        {"target": "person.nuvi", "transforms": [
                            {"name": "split_couple_i", "args": {"select": "left"}}, "parse_person_from_nom"
                        ]},
                        {"target": "person.novia", "transforms": [
                            {"name": "split_couple_i", "args": {"select": "right"}}, "parse_person_from_nom"
                        ]}
                    ]},
                    {"header": "data", "map_to": [
                        {"target": "base.data_acte", "transforms": ["parse_date_flexible_to_base_data_acte"]}
                    ]},
                    {"header": "ordre", "map_to": [{"target": "attr.ordre_matrimoni.int"}]}
                ]}
            }),
        ),
        (
            "mapped and defaulted values",
            json!({
                "metadata": {"record_type": "baptism"},
                "book_resolution": {"mode": "by_chronology_label", "column": "llibre"},
                "mapping": {"columns": [
                    {"header": "cognoms", "map_to": [
                        {"target": "person.batejat", "transforms": ["parse_person_from_cognoms_v2"]}
                    ]},
                    {"header": "sexe", "map_to": [
                        {"target": "person.batejat.sexe", "transforms": [
                            {"name": "map_values", "args": {"H": "home", "D": "dona"}}
                        ]}
                    ]},
                    {"header": "legitimitat", "map_to": [
                        {"target": "attr.legitimitat", "transforms": [
                            {"name": "set_default", "value": "legitim"}
                        ]}
                    ]}
                ]}
            }),
        ),
        (
            "conditional columns",
            json!({
                "metadata": {"record_type": "baptism"},
                "book_resolution": {"mode": "by_chronology_label", "column": "llibre"},
                "mapping": {"columns": [
                    {"header": "cognoms", "required": true,
                     "condition": {"expr": "not_empty", "else": [{"target": "attr.observacions"}]},
                     "map_to": [
                        {"target": "person.batejat", "transforms": ["parse_person_from_cognoms_v2"]}
                    ]},
                    {"header": "observacions", "map_to": [{"target": "attr.observacions"}]},
                    {"header": "sexe", "condition": {
                        "expr": "column:tipus == 'bateig'",
                        "then": [{"target": "person.batejat.sexe"}],
                        "else": [{"target": "base.any_doc"}]
                    }},
                    {"header": "ordre", "condition": {
                        "expr": "column:observacions == 'fill natural'",
                        "then": [{"target": "attr.ordre_fill.int"}],
                        "else": [{"target": "base.any_doc"}]
                    }},
                    {"header": "any", "condition": {
                        "expr": "column:cognoms != 'Puig Ferrer Joan'",
                        "then": [{"target": "person.batejat.sexe"}],
                        "else": [{"target": "base.any_doc"}]
                    }}
                ]}
            }),
        ),
        (
            "census head of household",
            json!({
                "metadata": {"record_type": "census"},
                "book_resolution": {"mode": "by_chronology_label", "column": "llibre"},
                "mapping": {"columns": [
                    {"header": "cap", "required": true, "map_to": [
                        {"target": "person.cap_familia", "transforms": ["parse_person_from_cognoms_v2"]}
                    ]},
                    {"header": "adreca", "map_to": [{"target": "attr.adreca"}]}
                ]}
            }),
        ),
    ];

    for (name, doc) in cases {
        let (store, _) = setup(false).await;
        let p = TemplateProgram::from_json(&doc).unwrap_or_else(|e| panic!("{}: {}", name, e));
        let book = store.get_book(BOOK_ID).await.unwrap().unwrap();
        let table = sample_table(&p, &book);
        let csv = table.to_csv(b';').unwrap();

        let outcome = run(&store, &p, &csv).await;
        assert_eq!(outcome.failed, 0, "{}: {:?}", name, outcome.errors);
        assert_eq!(outcome.created, table.rows.len(), "{}", name);

        let record = &store.list_records(&RecordFilter::default()).await.unwrap()[0];
        let persons = store.list_persons(record.id).await.unwrap();
        assert!(!persons.is_empty(), "{}: no people", name);
    }
}

#[tokio::test]
async fn test_missing_required_column_rejects_whole_file() {
    let (store, _) = setup(false).await;
    let p = program(json!({}));
    let outcome = run(&store, &p, "llibre;bateig\n1801-1820;12/03/1803\n").await;
    assert_eq!(outcome.created, 0);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].row, 0);
    assert_eq!(outcome.errors[0].code, RowErrorCode::MissingRequiredColumn);
    assert!(store.list_records(&RecordFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_book_is_a_row_error() {
    let (store, _) = setup(false).await;
    let p = program(json!({}));
    let outcome = run(
        &store,
        &p,
        "llibre;cognoms\n1900-1910;Puig Joan\n1801-1820;Vidal Anna\n",
    )
    .await;
    assert_eq!(outcome.created, 1);
    assert_eq!(outcome.errors[0].code, RowErrorCode::BookNotFound);
    assert_eq!(outcome.errors[0].row, 2);
}

#[tokio::test]
async fn test_cancelled_run_returns_partial_outcome() {
    let (store, _) = setup(false).await;
    let p = program(json!({}));
    let token = CancellationToken::new();
    token.cancel();
    let mut req = IngestRequest::new(&p);
    req.cancel = Some(&token);

    let outcome = ingest(&store, &req, "llibre;cognoms\n1801-1820;Puig Joan\n".as_bytes()).await;
    assert!(outcome.cancelled);
    assert_eq!(outcome.created, 0);
    assert_eq!(outcome.errors.last().map(|e| e.code), Some(RowErrorCode::Cancelled));
}
