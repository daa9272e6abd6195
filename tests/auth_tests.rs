mod common;

use chrono::{Duration, Utc};
use common::{engine, key_caller, owner, patients_fields, payload, project};
use serde_json::json;
use std::sync::Arc;
use tenantdb::core::ErrorKind;
use tenantdb::storage::{MemoryStorage, Storage};
use tenantdb::{
    Caller, Credentials, Engine, EngineError, FieldDefinition, FieldType, ListQuery, NewApiKey,
    NewTable, Permission, PermissionSet, ProjectSettings,
};

async fn clinic_with_patients(engine: &Engine) -> (Caller, tenantdb::Project) {
    let alice = owner(engine, "alice@example.com").await;
    let clinic = project(engine, &alice, "clinic").await;
    engine
        .define_table(&alice, clinic.id, NewTable::new("patients", patients_fields()))
        .await
        .expect("define");
    (alice, clinic)
}

#[tokio::test]
async fn missing_or_unknown_credentials_are_rejected() {
    let engine = engine();
    let err = engine.authenticate(&Credentials::default()).await.unwrap_err();
    assert_eq!(err, EngineError::MissingCredentials);

    let err = engine
        .authenticate(&Credentials::bearer("not-a-session"))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::SessionInvalid);

    let err = engine
        .authenticate(&Credentials::api_key("sk_unknown"))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::KeyInvalid);
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn login_logout_and_bad_passwords() {
    let engine = engine();
    let alice = owner(&engine, "Alice@Example.com").await;

    let err = engine
        .login("alice@example.com", "wrong password")
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::InvalidLogin);
    let err = engine
        .register("ALICE@example.com", common::PASSWORD)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NameConflict(_)), "{err:?}");
    let err = engine.register("bob@example.com", "short").await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "{err:?}");

    let Caller::Owner(session) = &alice else {
        panic!("expected owner session");
    };
    engine.logout(&alice).await.expect("logout");
    let err = engine
        .authenticate(&Credentials::bearer(session.token.clone()))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::SessionInvalid);
}

#[tokio::test]
async fn registration_can_be_disabled() {
    let engine = Engine::in_memory(common::test_config().allow_registration(false)).expect("engine");
    let err = engine
        .register("alice@example.com", common::PASSWORD)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied(_)), "{err:?}");

    // the configured admin still gets in
    engine
        .bootstrap_admin("admin@example.com", common::PASSWORD)
        .await
        .expect("bootstrap");
    engine
        .bootstrap_admin("admin@example.com", common::PASSWORD)
        .await
        .expect("bootstrap is repeatable");
    engine
        .login("admin@example.com", common::PASSWORD)
        .await
        .expect("admin login");
}

#[tokio::test]
async fn key_without_write_cannot_mutate_records() {
    let engine = engine();
    let (alice, clinic) = clinic_with_patients(&engine).await;
    engine
        .create_record(&alice, clinic.id, "patients", &payload(json!({"name": "Ada"})))
        .await
        .expect("seed");

    let key = engine
        .create_key(
            &alice,
            clinic.id,
            NewApiKey::new("dashboard", PermissionSet::read_only()),
        )
        .await
        .expect("create key");
    let reader = key_caller(&engine, &key.key).await;

    let page = engine
        .list_records(&reader, clinic.id, "patients", &ListQuery::default())
        .await
        .expect("read allowed");
    assert_eq!(page.total, 1);
    let record_id = page.records[0].id;

    let create = engine
        .create_record(&reader, clinic.id, "patients", &payload(json!({"name": "Bo"})))
        .await
        .unwrap_err();
    let update = engine
        .update_record(&reader, clinic.id, "patients", record_id, &payload(json!({"age": 1})))
        .await
        .unwrap_err();
    let delete = engine
        .delete_record(&reader, clinic.id, "patients", record_id)
        .await
        .unwrap_err();
    for err in [create, update, delete] {
        assert_eq!(err, EngineError::InsufficientPermission(Permission::Write));
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    let writer_key = engine
        .create_key(
            &alice,
            clinic.id,
            NewApiKey::new(
                "importer",
                PermissionSet::new([Permission::Read, Permission::Write]),
            ),
        )
        .await
        .expect("create key");
    let writer = key_caller(&engine, &writer_key.key).await;
    engine
        .create_record(&writer, clinic.id, "patients", &payload(json!({"name": "Bo"})))
        .await
        .expect("write allowed");
    let err = engine
        .delete_record(&writer, clinic.id, "patients", record_id)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::InsufficientPermission(Permission::Delete));
}

#[tokio::test]
async fn admin_and_primary_keys_pass_every_record_check() {
    let engine = engine();
    let (alice, clinic) = clinic_with_patients(&engine).await;
    let admin_key = engine
        .create_key(
            &alice,
            clinic.id,
            NewApiKey::new("ops", PermissionSet::new([Permission::Admin])),
        )
        .await
        .expect("create key");

    for key in [admin_key.key.as_str(), clinic.project_key.as_str()] {
        let caller = key_caller(&engine, key).await;
        let record = engine
            .create_record(&caller, clinic.id, "patients", &payload(json!({"name": "Ada"})))
            .await
            .expect("create");
        engine
            .update_record(&caller, clinic.id, "patients", record.id, &payload(json!({"age": 3})))
            .await
            .expect("update");
        engine
            .get_record(&caller, clinic.id, "patients", record.id)
            .await
            .expect("get");
        engine
            .delete_record(&caller, clinic.id, "patients", record.id)
            .await
            .expect("delete");

        // validation still applies
        let err = engine
            .create_record(&caller, clinic.id, "patients", &payload(json!({})))
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::MissingRequiredField("name".into()));
    }
}

#[tokio::test]
async fn schema_changes_require_an_owner_session() {
    let engine = engine();
    let (alice, clinic) = clinic_with_patients(&engine).await;
    let primary = key_caller(&engine, &clinic.project_key).await;

    let err = engine
        .define_table(&primary, clinic.id, NewTable::new("visits", vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied(_)), "{err:?}");
    let err = engine
        .add_field(
            &primary,
            clinic.id,
            "patients",
            FieldDefinition::new("email", FieldType::Text),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied(_)), "{err:?}");
    let err = engine
        .delete_table(&primary, clinic.id, "patients")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied(_)), "{err:?}");
    let err = engine.list_keys(&primary, clinic.id).await.unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied(_)), "{err:?}");

    // reads are fine with a key
    let tables = engine
        .list_tables(&primary, clinic.id)
        .await
        .expect("list tables");
    assert_eq!(tables.len(), 1);
    engine
        .get_table(&alice, clinic.id, "patients")
        .await
        .expect("owner read");
}

#[tokio::test]
async fn expired_and_deactivated_keys_are_rejected() {
    let engine = engine();
    let (alice, clinic) = clinic_with_patients(&engine).await;

    let expired = engine
        .create_key(
            &alice,
            clinic.id,
            NewApiKey::new("old", PermissionSet::full()).expires_at(Utc::now() - Duration::minutes(1)),
        )
        .await
        .expect("create key");
    let err = engine
        .authenticate(&Credentials::api_key(&expired.key))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::KeyExpired);

    let live = engine
        .create_key(
            &alice,
            clinic.id,
            NewApiKey::new("live", PermissionSet::full()).expires_at(Utc::now() + Duration::hours(1)),
        )
        .await
        .expect("create key");
    key_caller(&engine, &live.key).await;

    engine
        .deactivate_key(&alice, clinic.id, live.id)
        .await
        .expect("deactivate");
    let err = engine
        .authenticate(&Credentials::api_key(&live.key))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::KeyInvalid);

    engine
        .delete_key(&alice, clinic.id, expired.id)
        .await
        .expect("delete key");
    let err = engine
        .delete_key(&alice, clinic.id, expired.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn key_usage_is_recorded() {
    let engine = engine();
    let (alice, clinic) = clinic_with_patients(&engine).await;
    let key = engine
        .create_key(&alice, clinic.id, NewApiKey::new("ci", PermissionSet::read_only()))
        .await
        .expect("create key");
    assert_eq!(key.usage_count, 0);
    assert!(key.last_used_at.is_none());

    for _ in 0..3 {
        key_caller(&engine, &key.key).await;
    }

    let keys = engine.list_keys(&alice, clinic.id).await.expect("list keys");
    let stored = keys.iter().find(|k| k.id == key.id).expect("key listed");
    assert_eq!(stored.usage_count, 3);
    assert!(stored.last_used_at.is_some());
}

#[tokio::test]
async fn keys_and_sessions_stay_inside_their_projects() {
    let engine = engine();
    let (alice, clinic) = clinic_with_patients(&engine).await;
    let bob = owner(&engine, "bob@example.com").await;
    let lab = project(&engine, &bob, "lab").await;

    // another owner cannot even see the project
    let err = engine.list_tables(&bob, clinic.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)), "{err:?}");
    let err = engine.get_project(&bob, clinic.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)), "{err:?}");

    // a key is bound to its own project
    let lab_key = key_caller(&engine, &lab.project_key).await;
    let err = engine
        .list_records(&lab_key, clinic.id, "patients", &ListQuery::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied(_)), "{err:?}");

    let projects = engine.list_projects(&alice).await.expect("list projects");
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].id, clinic.id);
}

#[tokio::test]
async fn rotated_primary_key_stops_working() {
    let engine = engine();
    let (alice, clinic) = clinic_with_patients(&engine).await;
    let rotated = engine
        .rotate_project_key(&alice, clinic.id)
        .await
        .expect("rotate");
    assert_ne!(rotated.project_key, clinic.project_key);

    let err = engine
        .authenticate(&Credentials::api_key(&clinic.project_key))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::KeyInvalid);
    key_caller(&engine, &rotated.project_key).await;
}

#[tokio::test]
async fn rate_limits_and_feature_flags_come_from_project_settings() {
    let engine = engine();
    let (alice, clinic) = clinic_with_patients(&engine).await;
    let key = engine
        .create_key(
            &alice,
            clinic.id,
            NewApiKey::new("burst", PermissionSet::read_only()).rate_limit(2),
        )
        .await
        .expect("create key");

    key_caller(&engine, &key.key).await;
    key_caller(&engine, &key.key).await;
    let err = engine
        .authenticate(&Credentials::api_key(&key.key))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::RateLimited);
    assert_eq!(err.code(), "RATE_LIMITED");

    // rejected requests are not counted as usage
    let keys = engine.list_keys(&alice, clinic.id).await.expect("list");
    assert_eq!(keys[0].usage_count, 2);

    let mut settings = ProjectSettings::default();
    settings.features.insert("api_keys".into(), false);
    engine
        .update_project_settings(&alice, clinic.id, settings)
        .await
        .expect("update settings");
    let err = engine
        .create_key(&alice, clinic.id, NewApiKey::new("new", PermissionSet::full()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "{err:?}");
}

#[tokio::test]
async fn deadline_rolls_back_and_reports_timeout() {
    let storage = MemoryStorage::new();
    let engine = Engine::new(
        Arc::new(storage.clone()),
        common::test_config().request_timeout(std::time::Duration::from_millis(100)),
    )
    .expect("engine");
    let (alice, clinic) = clinic_with_patients(&engine).await;

    // hold the writer so the next operation cannot start in time
    let blocker = storage.begin().await.expect("begin");
    let err = engine
        .create_record(&alice, clinic.id, "patients", &payload(json!({"name": "Ada"})))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Timeout);
    drop(blocker);

    let page = engine
        .list_records(&alice, clinic.id, "patients", &ListQuery::default())
        .await
        .expect("list");
    assert_eq!(page.total, 0);
}
