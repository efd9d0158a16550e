#[allow(dead_code)]
mod helpers;

use quarry::error::ServiceError;
use serde_json::json;

fn user_schema() -> serde_json::Value {
    json!([{"name": "user_id", "type": "STRING", "mode": "NULLABLE"}])
}

#[tokio::test]
async fn registering_identical_json_twice_is_idempotent() {
    let (service, _shutdown) = helpers::start_service(4).await;

    let id = service
        .register_schema_from_json(&user_schema(), "users", "demo")
        .await
        .unwrap();
    assert_eq!(id, "demo.users");

    let id = service
        .register_schema_from_json(&user_schema(), "users", "demo")
        .await
        .unwrap();
    assert_eq!(id, "demo.users");

    let schemas = service.list_schemas().await.unwrap();
    assert_eq!(schemas.len(), 1);
    assert_eq!(schemas[0].total_versions, 1);
    assert_eq!(schemas[0].field_count, 1);
}

#[tokio::test]
async fn adding_a_field_advances_the_version() {
    let (service, _shutdown) = helpers::start_service(4).await;

    service
        .register_schema_from_json(&user_schema(), "users", "demo")
        .await
        .unwrap();
    let first = service.get_schema("demo.users").await.unwrap();

    let extended = json!([
        {"name": "user_id", "type": "STRING", "mode": "NULLABLE"},
        {"name": "email", "type": "STRING", "mode": "NULLABLE"}
    ]);
    service
        .register_schema_from_json(&extended, "users", "demo")
        .await
        .unwrap();

    let second = service.get_schema("demo.users").await.unwrap();
    assert_ne!(first.version_hash, second.version_hash);
    assert_eq!(second.fields.len(), 2);

    let schemas = service.list_schemas().await.unwrap();
    assert_eq!(schemas[0].total_versions, 2);
}

#[tokio::test]
async fn invalid_identifiers_are_rejected_at_the_boundary() {
    let (service, _shutdown) = helpers::start_service(4).await;

    for bad in ["bad-name", "1users", "users;drop", ""] {
        let err = service
            .register_schema_from_json(&user_schema(), bad, "demo")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)), "name: {bad:?}");
    }

    let err = service
        .register_schema_from_json(&user_schema(), "users", "no.dots")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));
}

#[tokio::test]
async fn unknown_schema_lookups_are_not_found() {
    let (service, _shutdown) = helpers::start_service(4).await;

    let err = service.get_schema("demo.absent").await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    let err = service.delete_schema("demo.absent").await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn delete_removes_the_schema_but_not_the_table() {
    let (service, _shutdown) = helpers::start_service(4).await;

    service
        .register_schema_from_json(&user_schema(), "users", "demo")
        .await
        .unwrap();
    service
        .create_tables("demo.users", &["local".to_string()], true, false)
        .await
        .unwrap();

    service.delete_schema("demo.users").await.unwrap();
    assert!(service.list_schemas().await.unwrap().is_empty());

    // The engine-side table survives schema deletion.
    let report = service
        .validate("SELECT COUNT(*) FROM \"demo.users\"", "local")
        .await
        .unwrap();
    assert!(report.valid, "errors: {:?}", report.errors);
}

#[tokio::test]
async fn create_tables_materializes_every_schema_field() {
    let (service, _shutdown) = helpers::start_service(4).await;

    let schema = json!([
        {"name": "id", "type": "INTEGER", "mode": "REQUIRED"},
        {"name": "name", "type": "STRING", "mode": "NULLABLE"},
        {"name": "score", "type": "FLOAT", "mode": "NULLABLE"},
        {"name": "active", "type": "BOOLEAN", "mode": "NULLABLE"},
        {"name": "seen_at", "type": "TIMESTAMP", "mode": "NULLABLE"}
    ]);
    service
        .register_schema_from_json(&schema, "players", "demo")
        .await
        .unwrap();

    let results = service
        .create_tables("demo.players", &["local".to_string()], true, false)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].created, "error: {:?}", results[0].error);

    // Round-trip: every schema field appears in the engine's view of
    // the table.
    let record = service.get_schema("demo.players").await.unwrap();
    assert_eq!(record.engines_created, vec!["local"]);

    let report = service
        .validate("SELECT id, name, score, active, seen_at FROM \"demo.players\"", "local")
        .await
        .unwrap();
    assert!(report.valid, "errors: {:?}", report.errors);

    // Creating again with if_not_exists stays idempotent.
    let results = service
        .create_tables("demo.players", &["local".to_string()], true, false)
        .await
        .unwrap();
    assert!(results[0].created);

    // Unknown engines are reported per-engine, not as a hard failure.
    let results = service
        .create_tables("demo.players", &["warehouse".to_string()], true, false)
        .await
        .unwrap();
    assert!(!results[0].created);
    assert!(results[0].error.as_deref().unwrap().contains("warehouse"));
}

#[tokio::test]
async fn flattened_view_covers_nested_leaves() {
    let (service, _shutdown) = helpers::start_service(4).await;

    let schema = json!([
        {"name": "user_id", "type": "STRING", "mode": "NULLABLE"},
        {"name": "metadata", "type": "RECORD", "mode": "NULLABLE", "fields": [
            {"name": "browser", "type": "STRING", "mode": "NULLABLE"},
            {"name": "is_premium", "type": "BOOLEAN", "mode": "NULLABLE"}
        ]}
    ]);
    service
        .register_schema_from_json(&schema, "events", "demo")
        .await
        .unwrap();

    let view_sql = service
        .get_flattened_view_sql("demo.events", "local")
        .await
        .unwrap()
        .expect("nested schema gets a flattened view");
    assert!(view_sql.contains("\"metadata.browser\""));
    assert!(view_sql.contains("\"metadata.is_premium\""));

    let results = service
        .create_tables("demo.events", &["local".to_string()], true, true)
        .await
        .unwrap();
    assert!(results[0].created);
    assert!(results[0].flattened_view_created);

    let report = service
        .validate(
            "SELECT \"metadata.browser\" FROM \"demo.events_flattened\"",
            "local",
        )
        .await
        .unwrap();
    assert!(report.valid, "errors: {:?}", report.errors);
}

#[tokio::test]
async fn flat_schema_has_no_flattened_view() {
    let (service, _shutdown) = helpers::start_service(4).await;

    service
        .register_schema_from_json(&user_schema(), "users", "demo")
        .await
        .unwrap();
    let view_sql = service
        .get_flattened_view_sql("demo.users", "local")
        .await
        .unwrap();
    assert!(view_sql.is_none());
}

#[tokio::test]
async fn proto_registration_keeps_the_source() {
    let (service, _shutdown) = helpers::start_service(4).await;

    let id = service
        .register_schema_from_proto(helpers::EVENT_PROTO, "user_events", "analytics")
        .await
        .unwrap();
    assert_eq!(id, "analytics.user_events");

    let record = service.get_schema(&id).await.unwrap();
    assert!(record.proto_source.as_deref().unwrap().contains("UserEvent"));
    assert_eq!(record.fields.len(), 3);
}
