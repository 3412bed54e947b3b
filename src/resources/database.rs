//! `clickhouse_database`: a database in the server catalog.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{decode, execution_error, Resource};
use crate::connection::{Connection, Statement};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

const CREATE: &str = "CREATE DATABASE ?";
const EXISTS: &str = "SELECT count() AS count FROM system.databases WHERE name = ?";
const DROP: &str = "DROP DATABASE IF EXISTS ?";

/// Record shape of a `clickhouse_database`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseModel {
    /// Name of the database.
    pub database: String,
}

/// Lifecycle adapter for `clickhouse_database`.
///
/// Databases cannot be altered; a rename is a replacement.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatabaseResource;

impl DatabaseResource {
    async fn exists(&self, conn: &dyn Connection, name: &str) -> Result<bool, ProviderError> {
        let count = conn
            .query_count(&Statement::new(EXISTS).literal(name))
            .await
            .map_err(|e| execution_error("read", "database", e))?;
        Ok(count > 0)
    }
}

fn not_found(name: &str) -> ProviderError {
    ProviderError::NotFound(format!("The ClickHouse database {} does not exist.", name))
}

#[async_trait]
impl Resource for DatabaseResource {
    fn type_name(&self) -> &'static str {
        "clickhouse_database"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A ClickHouse database.")
            .with_attribute(
                "database",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Name of the database."),
            )
    }

    async fn create(&self, conn: &dyn Connection, planned: Value) -> Result<Value, ProviderError> {
        let model: DatabaseModel = decode(planned.clone())?;
        info!(database = %model.database, "Creating database");

        conn.execute(&Statement::new(CREATE).identifier(model.database.as_str()))
            .await
            .map_err(|e| execution_error("create", "database", e))?;

        Ok(planned)
    }

    async fn read(&self, conn: &dyn Connection, current: Value) -> Result<Value, ProviderError> {
        let model: DatabaseModel = decode(current.clone())?;
        debug!(database = %model.database, "Checking database exists");

        if !self.exists(conn, &model.database).await? {
            return Err(not_found(&model.database));
        }
        Ok(current)
    }

    async fn update(
        &self,
        _conn: &dyn Connection,
        _prior: Value,
        _planned: Value,
    ) -> Result<Value, ProviderError> {
        Err(ProviderError::UpdateNotPermitted(
            "Updating an existing ClickHouse database is not permitted. Please recreate the \
             database instead of attempting to update it."
                .to_string(),
        ))
    }

    async fn delete(&self, conn: &dyn Connection, current: Value) -> Result<(), ProviderError> {
        let model: DatabaseModel = decode(current)?;
        info!(database = %model.database, "Dropping database");

        conn.execute(&Statement::new(DROP).identifier(model.database.as_str()))
            .await
            .map_err(|e| execution_error("delete", "database", e))
    }

    async fn import(&self, conn: &dyn Connection, id: &str) -> Result<Value, ProviderError> {
        if !self.exists(conn, id).await? {
            return Err(not_found(id));
        }
        Ok(json!({ "database": id }))
    }
}
