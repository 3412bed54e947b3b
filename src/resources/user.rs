//! `clickhouse_user`: a user with password authentication.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{decode, execution_error, Resource};
use crate::connection::{Connection, Statement};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

const CREATE: &str = "CREATE USER ? IDENTIFIED BY ?";
const EXISTS: &str = "SELECT count() AS count FROM system.users WHERE name = ?";
const ALTER: &str = "ALTER USER ? IDENTIFIED BY ?";
const DROP: &str = "DROP USER ?";

/// Record shape of a `clickhouse_user`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserModel {
    /// Login name.
    pub username: String,
    /// Password the user authenticates with.
    pub password: String,
}

impl fmt::Debug for UserModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserModel")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Lifecycle adapter for `clickhouse_user`.
///
/// Only the password can change in place. The server cannot return a
/// password, so state is never refreshed from it and import is unsupported.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserResource;

#[async_trait]
impl Resource for UserResource {
    fn type_name(&self) -> &'static str {
        "clickhouse_user"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A ClickHouse user authenticated by password.")
            .with_attribute(
                "username",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Login name of the user."),
            )
            .with_attribute(
                "password",
                Attribute::required_string()
                    .sensitive()
                    .with_description("Password of the user."),
            )
    }

    async fn create(&self, conn: &dyn Connection, planned: Value) -> Result<Value, ProviderError> {
        let model: UserModel = decode(planned.clone())?;
        info!(username = %model.username, "Creating user");

        let statement = Statement::new(CREATE)
            .identifier(model.username.as_str())
            .secret(model.password.as_str());
        conn.execute(&statement)
            .await
            .map_err(|e| execution_error("create", "user", e))?;

        Ok(planned)
    }

    async fn read(&self, conn: &dyn Connection, current: Value) -> Result<Value, ProviderError> {
        let model: UserModel = decode(current.clone())?;
        debug!(username = %model.username, "Checking user exists");

        let count = conn
            .query_count(&Statement::new(EXISTS).literal(model.username.as_str()))
            .await
            .map_err(|e| execution_error("read", "user", e))?;

        if count == 0 {
            return Err(ProviderError::NotFound(format!(
                "The ClickHouse user {} does not exist.",
                model.username
            )));
        }
        Ok(current)
    }

    async fn update(
        &self,
        conn: &dyn Connection,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: UserModel = decode(prior)?;
        let planned: UserModel = decode(planned)?;

        if planned.username != prior.username {
            return Err(ProviderError::UpdateNotPermitted(format!(
                "Renaming ClickHouse user {} to {} is not permitted. Please recreate the user \
                 instead of attempting to update it.",
                prior.username, planned.username
            )));
        }

        info!(username = %prior.username, "Updating user password");
        let statement = Statement::new(ALTER)
            .identifier(prior.username.as_str())
            .secret(planned.password.as_str());
        conn.execute(&statement)
            .await
            .map_err(|e| execution_error("update", "user", e))?;

        let state = UserModel {
            username: prior.username,
            password: planned.password,
        };
        Ok(serde_json::to_value(state)?)
    }

    async fn delete(&self, conn: &dyn Connection, current: Value) -> Result<(), ProviderError> {
        let model: UserModel = decode(current)?;
        info!(username = %model.username, "Dropping user");

        conn.execute(&Statement::new(DROP).identifier(model.username.as_str()))
            .await
            .map_err(|e| execution_error("delete", "user", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnection;
    use serde_json::json;

    fn record(username: &str, password: &str) -> Value {
        json!({ "username": username, "password": password })
    }

    #[tokio::test]
    async fn test_create_then_read() {
        let conn = MockConnection::new();

        let state = UserResource
            .create(&conn, record("alice", "s3cret"))
            .await
            .unwrap();
        assert_eq!(state, record("alice", "s3cret"));
        assert_eq!(conn.password_of("alice").as_deref(), Some("s3cret"));

        let refreshed = UserResource.read(&conn, state.clone()).await.unwrap();
        assert_eq!(refreshed, state);
    }

    #[tokio::test]
    async fn test_password_never_appears_in_rendered_statements() {
        let conn = MockConnection::new();

        UserResource
            .create(&conn, record("alice", "hunter2"))
            .await
            .unwrap();
        UserResource
            .update(&conn, record("alice", "hunter2"), record("alice", "hunter3"))
            .await
            .unwrap();

        let statements = conn.statements();
        assert_eq!(
            statements,
            vec![
                "CREATE USER `alice` IDENTIFIED BY '***'",
                "ALTER USER `alice` IDENTIFIED BY '***'",
            ]
        );
        assert!(statements.iter().all(|s| !s.contains("hunter")));
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let conn = MockConnection::new().with_user("alice", "pw");

        let err = UserResource
            .create(&conn, record("alice", "other"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Execution(_)));
        assert!(err.message().starts_with("Could not create ClickHouse user"));
        assert_eq!(conn.password_of("alice").as_deref(), Some("pw"));
    }

    #[tokio::test]
    async fn test_read_missing_user() {
        let conn = MockConnection::new();

        let err = UserResource
            .read(&conn, record("ghost", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
        assert_eq!(err.message(), "The ClickHouse user ghost does not exist.");
    }

    #[tokio::test]
    async fn test_update_replaces_only_password() {
        let conn = MockConnection::new().with_user("alice", "old");

        let state = UserResource
            .update(&conn, record("alice", "old"), record("alice", "new"))
            .await
            .unwrap();

        assert_eq!(state, record("alice", "new"));
        assert_eq!(conn.password_of("alice").as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_update_rejects_rename() {
        let conn = MockConnection::new().with_user("alice", "pw");

        let err = UserResource
            .update(&conn, record("alice", "pw"), record("bob", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UpdateNotPermitted(_)));
        assert!(conn.statements().is_empty());
        assert!(conn.has_user("alice"));
    }

    #[tokio::test]
    async fn test_update_missing_user_fails() {
        let conn = MockConnection::new();

        let err = UserResource
            .update(&conn, record("ghost", "a"), record("ghost", "b"))
            .await
            .unwrap_err();
        assert!(err.message().starts_with("Could not update ClickHouse user"));
    }

    #[tokio::test]
    async fn test_delete_is_not_idempotent() {
        let conn = MockConnection::new().with_user("alice", "pw");

        UserResource
            .delete(&conn, record("alice", "pw"))
            .await
            .unwrap();
        assert!(!conn.has_user("alice"));

        let err = UserResource
            .delete(&conn, record("alice", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Execution(_)));
        assert!(err.message().starts_with("Could not delete ClickHouse user"));
    }

    #[tokio::test]
    async fn test_import_is_unsupported() {
        let conn = MockConnection::new().with_user("alice", "pw");

        let err = UserResource.import(&conn, "alice").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unimplemented(_)));
    }

    #[test]
    fn test_debug_hides_password() {
        let model = UserModel {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{:?}", model);
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }
}
