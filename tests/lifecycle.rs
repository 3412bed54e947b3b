//! End-to-end lifecycle tests against the in-memory ClickHouse server.

use std::sync::Arc;

use hemmer_provider_clickhouse::testing::{
    assert_plan_changes_attribute, assert_plan_creates, assert_plan_no_changes,
    assert_plan_replaces, assert_plan_updates_in_place, MockConnection, ProviderTester,
};
use hemmer_provider_clickhouse::{ClickHouseProvider, Connection, ProviderError, Statement};
use serde_json::{json, Value};

async fn configured(connection: Arc<MockConnection>) -> ProviderTester<ClickHouseProvider> {
    let tester = ProviderTester::mock(connection);
    tester
        .configure(json!({
            "host": "localhost",
            "username": "admin",
            "password": "admin-pw"
        }))
        .await
        .unwrap();
    tester
}

fn database(name: &str) -> Value {
    json!({ "database": name })
}

fn user(username: &str, password: &str) -> Value {
    json!({ "username": username, "password": password })
}

#[tokio::test]
async fn database_create_then_read_returns_created_record() {
    let connection = Arc::new(MockConnection::new());
    let tester = configured(connection.clone()).await;

    for name in ["analytics", "events_2024", "staging"] {
        let state = tester
            .lifecycle_create("clickhouse_database", database(name))
            .await
            .unwrap();
        assert_eq!(state, database(name));
    }

    assert_eq!(
        connection.databases(),
        vec!["analytics", "events_2024", "staging"]
    );
}

#[tokio::test]
async fn database_delete_twice_succeeds() {
    let connection = Arc::new(MockConnection::new().with_database("analytics"));
    let tester = configured(connection.clone()).await;

    tester
        .delete("clickhouse_database", database("analytics"))
        .await
        .unwrap();
    tester
        .delete("clickhouse_database", database("analytics"))
        .await
        .unwrap();

    assert!(!connection.has_database("analytics"));
}

#[tokio::test]
async fn database_update_always_fails_and_issues_nothing() {
    let connection = Arc::new(MockConnection::new().with_database("analytics"));
    let tester = configured(connection.clone()).await;

    let cases = [
        (database("analytics"), database("analytics")),
        (database("analytics"), database("renamed")),
        (database("analytics"), json!({})),
    ];
    for (prior, planned) in cases {
        let err = tester
            .update("clickhouse_database", prior, planned)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UpdateNotPermitted(_)));
        assert_eq!(err.category(), "Update not permitted");
    }

    assert!(connection.statements().is_empty());
    assert_eq!(connection.databases(), vec!["analytics"]);
}

#[tokio::test]
async fn database_read_after_out_of_band_drop() {
    let connection = Arc::new(MockConnection::new());
    let tester = configured(connection.clone()).await;

    let state = tester
        .create("clickhouse_database", database("analytics"))
        .await
        .unwrap();

    // Dropped by someone else.
    connection
        .execute(&Statement::new("DROP DATABASE IF EXISTS ?").identifier("analytics"))
        .await
        .unwrap();

    let err = tester.read("clickhouse_database", state).await.unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)));
    assert!(err.message().contains("does not exist"));
}

#[tokio::test]
async fn database_rename_plans_replacement() {
    let tester = configured(Arc::new(MockConnection::new())).await;

    let plan = tester
        .plan_create("clickhouse_database", database("analytics"))
        .await
        .unwrap();
    assert_plan_creates(&plan);

    let plan = tester
        .plan_update("clickhouse_database", database("analytics"), database("events"))
        .await
        .unwrap();
    assert_plan_replaces(&plan);
    assert_plan_changes_attribute(&plan, "database");

    let plan = tester
        .plan_update("clickhouse_database", database("analytics"), database("analytics"))
        .await
        .unwrap();
    assert_plan_no_changes(&plan);
}

#[tokio::test]
async fn user_crud_lifecycle() {
    let connection = Arc::new(MockConnection::new());
    let tester = configured(connection.clone()).await;

    let final_state = tester
        .lifecycle_crud(
            "clickhouse_user",
            user("alice", "first"),
            user("alice", "second"),
        )
        .await
        .unwrap();

    assert_eq!(final_state, user("alice", "second"));
    assert!(connection.users().is_empty());
    assert_eq!(
        connection.statements(),
        vec![
            "CREATE USER `alice` IDENTIFIED BY '***'",
            "SELECT count() AS count FROM system.users WHERE name = 'alice'",
            "ALTER USER `alice` IDENTIFIED BY '***'",
            "SELECT count() AS count FROM system.users WHERE name = 'alice'",
            "DROP USER `alice`",
        ]
    );
}

#[tokio::test]
async fn user_update_replaces_only_password() {
    let connection = Arc::new(MockConnection::new().with_user("alice", "old"));
    let tester = configured(connection.clone()).await;

    let plan = tester
        .plan_update("clickhouse_user", user("alice", "old"), user("alice", "new"))
        .await
        .unwrap();
    assert_plan_updates_in_place(&plan);
    assert_plan_changes_attribute(&plan, "password");
    assert_eq!(plan.changes[0].after, Some(json!("(sensitive value)")));

    let state = tester
        .update("clickhouse_user", user("alice", "old"), plan.planned_state)
        .await
        .unwrap();
    assert_eq!(state["username"], "alice");
    assert_eq!(state["password"], "new");
    assert_eq!(connection.password_of("alice").as_deref(), Some("new"));
}

#[tokio::test]
async fn user_rename_plans_replacement() {
    let tester = configured(Arc::new(MockConnection::new())).await;

    let plan = tester
        .plan_update("clickhouse_user", user("alice", "pw"), user("bob", "pw"))
        .await
        .unwrap();
    assert_plan_replaces(&plan);
}

#[tokio::test]
async fn user_delete_twice_fails() {
    let connection = Arc::new(MockConnection::new().with_user("alice", "pw"));
    let tester = configured(connection).await;

    tester
        .delete("clickhouse_user", user("alice", "pw"))
        .await
        .unwrap();

    let err = tester
        .delete("clickhouse_user", user("alice", "pw"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Execution(_)));
    assert!(err.message().contains("UNKNOWN_USER"));
}

#[tokio::test]
async fn user_read_missing() {
    let tester = configured(Arc::new(MockConnection::new())).await;

    let err = tester
        .read("clickhouse_user", user("ghost", "pw"))
        .await
        .unwrap_err();
    assert_eq!(err.category(), "Resource does not exist");
    assert_eq!(err.message(), "The ClickHouse user ghost does not exist.");
}

#[tokio::test]
async fn import_database_only() {
    let connection = Arc::new(
        MockConnection::new()
            .with_database("events")
            .with_user("alice", "pw"),
    );
    let tester = configured(connection).await;

    let imported = tester
        .import_resource("clickhouse_database", "events")
        .await
        .unwrap();
    assert_eq!(imported[0].state, database("events"));

    let err = tester
        .import_resource("clickhouse_user", "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Unimplemented(_)));
}
