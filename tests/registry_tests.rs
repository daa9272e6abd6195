mod common;

use common::{engine, owner, patients_fields, payload, project};
use serde_json::json;
use tenantdb::core::{ColumnInfo, ColumnType};
use tenantdb::schema::PhysicalTableManager;
use tenantdb::storage::{MemoryStorage, Storage};
use tenantdb::{
    Engine, EngineError, FieldDefinition, FieldType, NewProject, NewTable, ProjectSettings,
};
use std::sync::Arc;

#[tokio::test]
async fn define_table_materializes_columns_matching_type_mapping() {
    let engine = engine();
    let alice = owner(&engine, "alice@example.com").await;
    let clinic = project(&engine, &alice, "clinic").await;

    let fields = vec![
        FieldDefinition::new("title", FieldType::Text).max_length(80).required(),
        FieldDefinition::new("notes", FieldType::Text),
        FieldDefinition::new("score", FieldType::Number),
        FieldDefinition::new("done", FieldType::Boolean),
        FieldDefinition::new("due", FieldType::Datetime),
        FieldDefinition::new("meta", FieldType::Object),
        FieldDefinition::new("tags", FieldType::Array),
        FieldDefinition::new("price", FieldType::Currency),
        FieldDefinition::new("mass", FieldType::Weight),
        FieldDefinition::new("owner", FieldType::Relation),
    ];
    let table = engine
        .define_table(&alice, clinic.id, NewTable::new("Tasks", fields.clone()))
        .await
        .expect("define table should succeed");
    assert_eq!(table.name, "Tasks");
    assert_eq!(table.fields, fields);

    assert!(
        engine
            .table_exists(&alice, clinic.id, "Tasks")
            .await
            .expect("table_exists")
    );

    let columns = engine
        .table_columns(&alice, clinic.id, "tasks")
        .await
        .expect("columns");
    assert_eq!(columns, PhysicalTableManager::expected_columns(&fields));
    assert_eq!(
        columns.iter().find(|c| c.name == "title"),
        Some(&ColumnInfo {
            name: "title".into(),
            column_type: ColumnType::VarChar(80),
            nullable: false,
        })
    );

    let report = engine
        .verify_table(&alice, clinic.id, &table.id.to_string())
        .await
        .expect("verify");
    assert!(report.is_consistent(), "{report:?}");
}

#[tokio::test]
async fn duplicate_table_name_conflicts_case_insensitively() {
    let engine = engine();
    let alice = owner(&engine, "alice@example.com").await;
    let clinic = project(&engine, &alice, "clinic").await;

    engine
        .define_table(&alice, clinic.id, NewTable::new("patients", patients_fields()))
        .await
        .expect("first define");
    let err = engine
        .define_table(&alice, clinic.id, NewTable::new("PATIENTS", vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NameConflict(_)), "{err:?}");

    // same name in another project is fine
    let other = project(&engine, &alice, "lab").await;
    engine
        .define_table(&alice, other.id, NewTable::new("patients", vec![]))
        .await
        .expect("other project define");
}

#[tokio::test]
async fn invalid_names_are_rejected_before_any_ddl() {
    let engine = engine();
    let alice = owner(&engine, "alice@example.com").await;
    let clinic = project(&engine, &alice, "clinic").await;

    for name in ["", "1st", "bad-name", "x\"; DROP TABLE accounts; --"] {
        let err = engine
            .define_table(&alice, clinic.id, NewTable::new(name, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "{name}: {err:?}");
    }

    let err = engine
        .define_table(
            &alice,
            clinic.id,
            NewTable::new(
                "visits",
                vec![FieldDefinition::new("created_at", FieldType::Datetime)],
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "{err:?}");

    let err = engine
        .define_table(
            &alice,
            clinic.id,
            NewTable::new(
                "visits",
                vec![
                    FieldDefinition::new("Reason", FieldType::Text),
                    FieldDefinition::new("reason", FieldType::Text),
                ],
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NameConflict(_)), "{err:?}");

    assert!(
        engine
            .list_tables(&alice, clinic.id)
            .await
            .expect("list")
            .is_empty()
    );
}

#[tokio::test]
async fn table_quota_comes_from_project_settings() {
    let engine = engine();
    let alice = owner(&engine, "alice@example.com").await;
    let small = engine
        .create_project(
            &alice,
            NewProject::new("small").settings(ProjectSettings::new(2, 600)),
        )
        .await
        .expect("create project");

    for name in ["a", "b"] {
        engine
            .define_table(&alice, small.id, NewTable::new(name, vec![]))
            .await
            .expect("within quota");
    }
    let err = engine
        .define_table(&alice, small.id, NewTable::new("c", vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)), "{err:?}");
    assert_eq!(err.code(), "LIMIT_EXCEEDED");
}

#[tokio::test]
async fn add_and_remove_field_keep_columns_in_step() {
    let engine = engine();
    let alice = owner(&engine, "alice@example.com").await;
    let clinic = project(&engine, &alice, "clinic").await;
    engine
        .define_table(&alice, clinic.id, NewTable::new("patients", patients_fields()))
        .await
        .expect("define");

    let table = engine
        .add_field(
            &alice,
            clinic.id,
            "patients",
            FieldDefinition::new("email", FieldType::Text),
        )
        .await
        .expect("add field");
    assert_eq!(table.fields.len(), 3);

    let err = engine
        .add_field(
            &alice,
            clinic.id,
            "patients",
            FieldDefinition::new("EMAIL", FieldType::Text),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NameConflict(_)), "{err:?}");

    let columns = engine
        .table_columns(&alice, clinic.id, "patients")
        .await
        .expect("columns");
    assert!(columns.iter().any(|c| c.name == "email"));

    let table = engine
        .remove_field(&alice, clinic.id, "patients", "Age")
        .await
        .expect("remove field");
    assert!(table.find_field("age").is_none());
    let columns = engine
        .table_columns(&alice, clinic.id, "patients")
        .await
        .expect("columns");
    assert!(!columns.iter().any(|c| c.name == "age"));

    let err = engine
        .remove_field(&alice, clinic.id, "patients", "age")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)), "{err:?}");

    let report = engine
        .verify_table(&alice, clinic.id, "patients")
        .await
        .expect("verify");
    assert!(report.is_consistent(), "{report:?}");
}

#[tokio::test]
async fn failed_column_add_leaves_metadata_untouched() {
    let engine = engine();
    let alice = owner(&engine, "alice@example.com").await;
    let clinic = project(&engine, &alice, "clinic").await;
    engine
        .define_table(&alice, clinic.id, NewTable::new("patients", patients_fields()))
        .await
        .expect("define");
    engine
        .create_record(&alice, clinic.id, "patients", &payload(json!({"name": "Ada"})))
        .await
        .expect("insert");

    // NOT NULL column on a non-empty table cannot be added
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

    let table = engine
        .get_table(&alice, clinic.id, "patients")
        .await
        .expect("get");
    assert!(table.find_field("ward").is_none());
    let report = engine
        .verify_table(&alice, clinic.id, "patients")
        .await
        .expect("verify");
    assert!(report.is_consistent(), "{report:?}");
}

#[tokio::test]
async fn replace_fields_reconciles_physical_columns() {
    let engine = engine();
    let alice = owner(&engine, "alice@example.com").await;
    let clinic = project(&engine, &alice, "clinic").await;
    engine
        .define_table(&alice, clinic.id, NewTable::new("patients", patients_fields()))
        .await
        .expect("define");

    let replacement = vec![
        FieldDefinition::new("name", FieldType::Text)
            .required()
            .describe("full name"),
        FieldDefinition::new("phone", FieldType::Text),
    ];
    let table = engine
        .replace_fields(&alice, clinic.id, "patients", replacement.clone())
        .await
        .expect("replace");
    assert_eq!(table.fields, replacement);

    let columns = engine
        .table_columns(&alice, clinic.id, "patients")
        .await
        .expect("columns");
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["id", "created_at", "updated_at", "name", "phone"]);

    let err = engine
        .replace_fields(
            &alice,
            clinic.id,
            "patients",
            vec![FieldDefinition::new("name", FieldType::Number).required()],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "{err:?}");

    let report = engine
        .verify_table(&alice, clinic.id, "patients")
        .await
        .expect("verify");
    assert!(report.is_consistent(), "{report:?}");
}

#[tokio::test]
async fn delete_table_drops_storage_and_drop_is_idempotent() {
    let storage = MemoryStorage::new();
    let engine = Engine::new(Arc::new(storage.clone()), common::test_config()).expect("engine");
    let alice = owner(&engine, "alice@example.com").await;
    let clinic = project(&engine, &alice, "clinic").await;
    engine
        .define_table(&alice, clinic.id, NewTable::new("patients", patients_fields()))
        .await
        .expect("define");

    let defined = engine
        .get_table(&alice, clinic.id, "patients")
        .await
        .expect("get");
    let removed = engine
        .delete_table(&alice, clinic.id, "PATIENTS")
        .await
        .expect("delete");
    assert_eq!(removed, defined);
    assert!(
        !engine
            .table_exists(&alice, clinic.id, "patients")
            .await
            .expect("exists")
    );
    let err = engine
        .get_table(&alice, clinic.id, "patients")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::TableNotFound(_)), "{err:?}");

    let physical = PhysicalTableManager::new();
    let mut tx = storage.begin().await.expect("begin");
    for _ in 0..2 {
        physical
            .drop_table(tx.as_mut(), clinic.id, "patients")
            .await
            .expect("drop of absent table succeeds");
    }
    physical
        .drop_table(tx.as_mut(), clinic.id, "never_existed")
        .await
        .expect("drop of unknown table succeeds");
    tx.commit().await.expect("commit");
}

#[tokio::test]
async fn deleting_a_project_drops_its_tables() {
    let storage = MemoryStorage::new();
    let engine = Engine::new(Arc::new(storage.clone()), common::test_config()).expect("engine");
    let alice = owner(&engine, "alice@example.com").await;
    let clinic = project(&engine, &alice, "clinic").await;
    engine
        .define_table(&alice, clinic.id, NewTable::new("patients", patients_fields()))
        .await
        .expect("define");

    engine
        .delete_project(&alice, clinic.id)
        .await
        .expect("delete project");

    let physical = PhysicalTableManager::new();
    let mut tx = storage.begin().await.expect("begin");
    assert!(
        !physical
            .table_exists(tx.as_mut(), clinic.id, "patients")
            .await
            .expect("exists")
    );
    drop(tx);

    let err = engine.get_project(&alice, clinic.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn concurrent_defines_of_one_name_leave_a_single_winner() {
    let engine = engine();
    let alice = owner(&engine, "alice@example.com").await;
    let clinic = project(&engine, &alice, "clinic").await;

    let (a, b) = tokio::join!(
        engine.define_table(&alice, clinic.id, NewTable::new("dup", patients_fields())),
        engine.define_table(&alice, clinic.id, NewTable::new("DUP", patients_fields())),
    );
    let (winner, loser) = match (a, b) {
        (Ok(table), Err(err)) | (Err(err), Ok(table)) => (table, err),
        other => panic!("expected exactly one winner, got {other:?}"),
    };
    assert!(matches!(loser, EngineError::NameConflict(_)), "{loser:?}");

    let tables = engine.list_tables(&alice, clinic.id).await.expect("list");
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].id, winner.id);
}
