//! Lifecycle adapters for managed ClickHouse objects.
//!
//! Each adapter maps one resource type onto the statements that create,
//! check, alter and drop the object. Adapters are stateless; the connection
//! is passed into every call.

mod database;
mod user;

pub use database::{DatabaseModel, DatabaseResource};
pub use user::{UserModel, UserResource};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::connection::{ClientError, Connection};
use crate::error::ProviderError;
use crate::schema::Schema;

/// Create/read/update/delete contract of a managed resource type.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Resource type name, e.g. `clickhouse_database`.
    fn type_name(&self) -> &'static str;

    /// Schema of the resource record.
    fn schema(&self) -> Schema;

    /// Create the object. Returns the new state.
    async fn create(&self, conn: &dyn Connection, planned: Value) -> Result<Value, ProviderError>;

    /// Check the object still exists. Returns the refreshed state.
    ///
    /// Fails with [`ProviderError::NotFound`] when the object is gone.
    async fn read(&self, conn: &dyn Connection, current: Value) -> Result<Value, ProviderError>;

    /// Apply an in-place change. Returns the new state.
    async fn update(
        &self,
        conn: &dyn Connection,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError>;

    /// Drop the object.
    async fn delete(&self, conn: &dyn Connection, current: Value) -> Result<(), ProviderError>;

    /// Build state for an existing object identified by `id`.
    async fn import(&self, conn: &dyn Connection, id: &str) -> Result<Value, ProviderError> {
        let _ = (conn, id);
        Err(ProviderError::Unimplemented(format!(
            "Import not supported for resource type: {}",
            self.type_name()
        )))
    }
}

/// Every resource type the provider manages.
pub fn all() -> Vec<Box<dyn Resource>> {
    vec![Box::new(DatabaseResource), Box::new(UserResource)]
}

fn decode<T: DeserializeOwned>(record: Value) -> Result<T, ProviderError> {
    Ok(serde_json::from_value(record)?)
}

fn execution_error(action: &str, object: &str, err: ClientError) -> ProviderError {
    ProviderError::Execution(format!(
        "Could not {} ClickHouse {}, unexpected error: {}",
        action, object, err
    ))
}
