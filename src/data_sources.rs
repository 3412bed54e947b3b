//! Read-only listings of server catalog objects.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::connection::{Connection, Statement};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

/// A data source that produces a record from the server on every read.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Data source type name, e.g. `clickhouse_databases`.
    fn type_name(&self) -> &'static str;

    /// Schema of the produced record.
    fn schema(&self) -> Schema;

    /// Build the record from scratch.
    async fn read(&self, conn: &dyn Connection) -> Result<Value, ProviderError>;
}

/// One of the server catalogs that can be listed by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Catalog {
    /// `SHOW DATABASES`
    Databases,
    /// `SHOW USERS`
    Users,
    /// `SHOW ROLES`
    Roles,
}

impl Catalog {
    /// Every listable catalog.
    pub const ALL: [Catalog; 3] = [Catalog::Databases, Catalog::Users, Catalog::Roles];

    /// Statement that lists the catalog.
    pub fn statement(self) -> Statement {
        Statement::new(match self {
            Self::Databases => "SHOW DATABASES",
            Self::Users => "SHOW USERS",
            Self::Roles => "SHOW ROLES",
        })
    }

    /// Name of the list attribute in the produced record.
    pub fn attribute(self) -> &'static str {
        match self {
            Self::Databases => "databases",
            Self::Users => "users",
            Self::Roles => "roles",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Databases => "Databases",
            Self::Users => "Users",
            Self::Roles => "Roles",
        }
    }
}

#[async_trait]
impl DataSource for Catalog {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Databases => "clickhouse_databases",
            Self::Users => "clickhouse_users",
            Self::Roles => "clickhouse_roles",
        }
    }

    fn schema(&self) -> Schema {
        Schema::v0().with_attribute(
            self.attribute(),
            Attribute::computed_string_list()
                .with_description(format!("List of {} in the ClickHouse server.", self.label())),
        )
    }

    async fn read(&self, conn: &dyn Connection) -> Result<Value, ProviderError> {
        let names = conn.query_names(&self.statement()).await.map_err(|e| {
            ProviderError::Listing(format!(
                "An error occurred while listing the {}: {}",
                self.attribute(),
                e
            ))
        })?;

        debug!(catalog = self.attribute(), count = names.len(), "Listed catalog");
        Ok(json!({ self.attribute(): names }))
    }
}

/// Every data source type the provider exposes.
pub fn all() -> Vec<Box<dyn DataSource>> {
    Catalog::ALL
        .into_iter()
        .map(|catalog| Box::new(catalog) as Box<dyn DataSource>)
        .collect()
}
