#![allow(dead_code)]

use serde_json::{Map, Value};
use tenantdb::{
    Caller, Credentials, Engine, EngineConfig, FieldDefinition, FieldType, NewProject, Project,
};

pub const PASSWORD: &str = "correct horse battery";

pub fn test_config() -> EngineConfig {
    EngineConfig::new().bcrypt_cost(4)
}

pub fn engine() -> Engine {
    Engine::in_memory(test_config()).expect("engine should start")
}

pub async fn owner(engine: &Engine, email: &str) -> Caller {
    engine
        .register(email, PASSWORD)
        .await
        .expect("register should succeed");
    let session = engine
        .login(email, PASSWORD)
        .await
        .expect("login should succeed");
    engine
        .authenticate(&Credentials::bearer(session.token))
        .await
        .expect("session should authenticate")
}

pub async fn project(engine: &Engine, owner: &Caller, name: &str) -> Project {
    engine
        .create_project(owner, NewProject::new(name))
        .await
        .expect("create project should succeed")
}

pub async fn key_caller(engine: &Engine, key: &str) -> Caller {
    engine
        .authenticate(&Credentials::api_key(key))
        .await
        .expect("key should authenticate")
}

pub fn patients_fields() -> Vec<FieldDefinition> {
    vec![
        FieldDefinition::new("name", FieldType::Text).required(),
        FieldDefinition::new("age", FieldType::Number),
    ]
}

pub fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("payload must be a JSON object, got {other}"),
    }
}
