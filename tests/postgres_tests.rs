mod common;

use common::{owner, patients_fields, payload, project};
use serde_json::{Value, json};
use std::sync::Arc;
use tenantdb::core::ColumnType;
use tenantdb::{
    Engine, EngineError, FieldDefinition, FieldType, ListQuery, NewTable, PostgresStorage,
    SortDirection,
};
use uuid::Uuid;

async fn maybe_engine() -> Option<Engine> {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
        .filter(|url| url.starts_with("postgres"))?;

    let storage = PostgresStorage::connect(&database_url, 2).await.ok()?;
    storage.migrate().await.expect("migrations should run");
    Some(Engine::new(Arc::new(storage), common::test_config()).expect("engine"))
}

fn unique_email() -> String {
    format!("owner-{}@example.com", Uuid::new_v4().simple())
}

#[tokio::test]
async fn postgres_patients_scenario() {
    let Some(engine) = maybe_engine().await else {
        eprintln!(
            "Skipping postgres_patients_scenario: TEST_DATABASE_URL/DATABASE_URL is not set or database is unreachable."
        );
        return;
    };

    let alice = owner(&engine, &unique_email()).await;
    let clinic = project(&engine, &alice, "clinic").await;

    let table = engine
        .define_table(&alice, clinic.id, NewTable::new("patients", patients_fields()))
        .await
        .expect("define patients");
    let columns = engine
        .table_columns(&alice, clinic.id, "patients")
        .await
        .expect("columns");
    let name = columns
        .iter()
        .find(|c| c.name == "name")
        .expect("name column");
    assert_eq!(name.column_type, ColumnType::Text);
    assert!(!name.nullable);

    let ada = engine
        .create_record(&alice, clinic.id, "patients", &payload(json!({"name": "Ada"})))
        .await
        .expect("insert Ada");
    assert_eq!(ada.get("age"), Some(&Value::Null));

    let err = engine
        .create_record(&alice, clinic.id, "patients", &payload(json!({"age": 30})))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::MissingRequiredField("name".into()));

    engine
        .add_field(
            &alice,
            clinic.id,
            "patients",
            FieldDefinition::new("email", FieldType::Text),
        )
        .await
        .expect("add email");
    let fetched = engine
        .get_record(&alice, clinic.id, "patients", ada.id)
        .await
        .expect("get Ada");
    assert_eq!(fetched.get("email"), Some(&Value::Null));

    // a required column cannot be added once rows exist; metadata stays put
    let err = engine
        .add_field(
            &alice,
            clinic.id,
            "patients",
            FieldDefinition::new("ward", FieldType::Text).required(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Ddl(_)), "{err:?}");
    let report = engine
        .verify_table(&alice, clinic.id, &table.id.to_string())
        .await
        .expect("verify");
    assert!(report.is_consistent(), "{report:?}");

    for i in 0..6 {
        engine
            .create_record(
                &alice,
                clinic.id,
                "patients",
                &payload(json!({"name": format!("p{i}"), "age": i})),
            )
            .await
            .expect("insert");
    }
    let page = engine
        .list_records(
            &alice,
            clinic.id,
            "patients",
            &ListQuery::default()
                .page(2)
                .page_size(3)
                .sort("age", SortDirection::Asc),
        )
        .await
        .expect("list");
    assert_eq!(page.total, 7);
    assert_eq!(page.total_pages, 3);
    let ages: Vec<&Value> = page.records.iter().filter_map(|r| r.get("age")).collect();
    assert_eq!(ages, [&json!(3), &json!(4), &json!(5)]);

    engine
        .delete_table(&alice, clinic.id, "patients")
        .await
        .expect("delete table");
    assert!(
        !engine
            .table_exists(&alice, clinic.id, "patients")
            .await
            .expect("exists")
    );

    engine
        .delete_project(&alice, clinic.id)
        .await
        .expect("delete project");
}

#[tokio::test]
async fn postgres_failed_request_rolls_back_metadata() {
    let Some(engine) = maybe_engine().await else {
        eprintln!(
            "Skipping postgres_failed_request_rolls_back_metadata: TEST_DATABASE_URL/DATABASE_URL is not set or database is unreachable."
        );
        return;
    };

    let alice = owner(&engine, &unique_email()).await;
    let lab = project(&engine, &alice, "lab").await;
    engine
        .define_table(&alice, lab.id, NewTable::new("samples", vec![]))
        .await
        .expect("define");
    let err = engine
        .define_table(&alice, lab.id, NewTable::new("Samples", vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NameConflict(_)), "{err:?}");

    let tables = engine.list_tables(&alice, lab.id).await.expect("list");
    assert_eq!(tables.len(), 1);

    engine
        .delete_project(&alice, lab.id)
        .await
        .expect("delete project");
}

#[tokio::test]
async fn postgres_field_named_like_the_row_alias_reads_back() {
    let Some(engine) = maybe_engine().await else {
        eprintln!(
            "Skipping postgres_field_named_like_the_row_alias_reads_back: TEST_DATABASE_URL/DATABASE_URL is not set or database is unreachable."
        );
        return;
    };

    let alice = owner(&engine, &unique_email()).await;
    let desk = project(&engine, &alice, "desk").await;
    engine
        .define_table(
            &alice,
            desk.id,
            NewTable::new(
                "notes",
                vec![
                    FieldDefinition::new("t", FieldType::Text),
                    FieldDefinition::new("body", FieldType::Text),
                ],
            ),
        )
        .await
        .expect("define");

    let created = engine
        .create_record(&alice, desk.id, "notes", &payload(json!({"t": "x", "body": "hello"})))
        .await
        .expect("insert");
    assert_eq!(created.get("t"), Some(&json!("x")));
    assert_eq!(created.get("body"), Some(&json!("hello")));

    let fetched = engine
        .get_record(&alice, desk.id, "notes", created.id)
        .await
        .expect("get");
    assert_eq!(fetched, created);

    let page = engine
        .list_records(&alice, desk.id, "notes", &ListQuery::default().sort("t", SortDirection::Asc))
        .await
        .expect("list");
    assert_eq!(page.records, vec![created]);

    engine
        .delete_project(&alice, desk.id)
        .await
        .expect("delete project");
}

#[tokio::test]
async fn postgres_wide_decimals_read_back_exactly() {
    let Some(engine) = maybe_engine().await else {
        eprintln!(
            "Skipping postgres_wide_decimals_read_back_exactly: TEST_DATABASE_URL/DATABASE_URL is not set or database is unreachable."
        );
        return;
    };

    let alice = owner(&engine, &unique_email()).await;
    let shop = project(&engine, &alice, "shop").await;
    engine
        .define_table(
            &alice,
            shop.id,
            NewTable::new(
                "orders",
                vec![
                    FieldDefinition::new("total", FieldType::Currency),
                    FieldDefinition::new("n", FieldType::Number),
                ],
            ),
        )
        .await
        .expect("define");

    let created = engine
        .create_record(
            &alice,
            shop.id,
            "orders",
            &payload(json!({"total": "12345678901234567.89", "n": "0.12345678901234567891"})),
        )
        .await
        .expect("insert");
    let fetched = engine
        .get_record(&alice, shop.id, "orders", created.id)
        .await
        .expect("get");
    assert_eq!(fetched.get("total").unwrap().to_string(), "12345678901234567.89");
    assert_eq!(fetched.get("n").unwrap().to_string(), "0.12345678901234567891");

    engine
        .delete_project(&alice, shop.id)
        .await
        .expect("delete project");
}

#[tokio::test]
async fn postgres_concurrent_defines_leave_a_single_winner() {
    let Some(engine) = maybe_engine().await else {
        eprintln!(
            "Skipping postgres_concurrent_defines_leave_a_single_winner: TEST_DATABASE_URL/DATABASE_URL is not set or database is unreachable."
        );
        return;
    };

    let alice = owner(&engine, &unique_email()).await;
    let lab = project(&engine, &alice, "lab").await;
    let (a, b) = tokio::join!(
        engine.define_table(&alice, lab.id, NewTable::new("dup", patients_fields())),
        engine.define_table(&alice, lab.id, NewTable::new("DUP", patients_fields())),
    );
    let loser = match (a, b) {
        (Ok(_), Err(err)) | (Err(err), Ok(_)) => err,
        other => panic!("expected exactly one winner, got {other:?}"),
    };
    assert!(matches!(loser, EngineError::NameConflict(_)), "{loser:?}");
    let tables = engine.list_tables(&alice, lab.id).await.expect("list");
    assert_eq!(tables.len(), 1);

    engine
        .delete_project(&alice, lab.id)
        .await
        .expect("delete project");
}
