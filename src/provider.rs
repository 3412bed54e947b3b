//! The ClickHouse provider.
//!
//! [`ClickHouseProvider`] resolves connection parameters on `Configure`,
//! opens a single connection and shares it with every resource and data
//! source until `Stop` or the next `Configure`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::{self, ProviderConfig};
use crate::connection::{ClickHouseConnector, Connection, Connector};
use crate::data_sources::{self, DataSource};
use crate::error::ProviderError;
use crate::plan;
use crate::resources::{self, Resource};
use crate::schema::{has_errors, Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities};
use crate::validation::{validate, validate_identifiers};

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Provider managing ClickHouse databases and users.
pub struct ClickHouseProvider {
    connector: Arc<dyn Connector>,
    env: EnvLookup,
    connection: RwLock<Option<Arc<dyn Connection>>>,
    resources: BTreeMap<&'static str, Box<dyn Resource>>,
    data_sources: BTreeMap<&'static str, Box<dyn DataSource>>,
}

impl ClickHouseProvider {
    /// Create a provider that connects over HTTP and reads the process
    /// environment for missing configuration.
    pub fn new() -> Self {
        Self::with_connector(Arc::new(ClickHouseConnector))
    }

    /// Create a provider that opens connections through `connector`.
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            env: Box::new(|key: &str| std::env::var(key).ok()),
            connection: RwLock::new(None),
            resources: resources::all()
                .into_iter()
                .map(|r| (r.type_name(), r))
                .collect(),
            data_sources: data_sources::all()
                .into_iter()
                .map(|d| (d.type_name(), d))
                .collect(),
        }
    }

    /// Replace the environment lookup used for configuration fallback.
    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Box::new(env);
        self
    }

    /// Whether `Configure` has succeeded and `Stop` has not been called since.
    pub async fn is_configured(&self) -> bool {
        self.connection.read().await.is_some()
    }

    async fn connection(&self) -> Result<Arc<dyn Connection>, ProviderError> {
        self.connection.read().await.clone().ok_or_else(|| {
            ProviderError::Configuration(
                "The provider has not been configured. Configure must succeed before resources \
                 or data sources are used."
                    .to_string(),
            )
        })
    }

    fn resource(&self, resource_type: &str) -> Result<&dyn Resource, ProviderError> {
        self.resources
            .get(resource_type)
            .map(|r| r.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    fn data_source(&self, data_source_type: &str) -> Result<&dyn DataSource, ProviderError> {
        self.data_sources
            .get(data_source_type)
            .map(|d| d.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(data_source_type.to_string()))
    }
}

/// An absent provider block is the same as an empty one.
fn provider_block(config: Value) -> Value {
    if config.is_null() {
        Value::Object(Default::default())
    } else {
        config
    }
}

impl Default for ClickHouseProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ProviderService for ClickHouseProvider {
    fn schema(&self) -> ProviderSchema {
        let schema = ProviderSchema::new().with_provider_config(config::provider_schema());

        let schema = self
            .resources
            .values()
            .fold(schema, |s, r| s.with_resource(r.type_name(), r.schema()));

        self.data_sources
            .values()
            .fold(schema, |s, d| s.with_data_source(d.type_name(), d.schema()))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            resources: self.resources.keys().map(|k| k.to_string()).collect(),
            data_sources: self.data_sources.keys().map(|k| k.to_string()).collect(),
            capabilities: ServerCapabilities { plan_destroy: true },
        }
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validate(&config::provider_schema(), &provider_block(config)))
    }

    #[instrument(skip_all)]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let config = provider_block(config);
        let diagnostics = validate(&config::provider_schema(), &config);
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }

        let params = match ProviderConfig::from_value(config)?.resolve(self.env.as_ref()) {
            Ok(params) => params,
            Err(diagnostics) => {
                warn!(missing = diagnostics.len(), "Connection parameters are incomplete");
                return Ok(diagnostics);
            },
        };

        debug!(params = ?params, "Opening ClickHouse connection");
        let connection = self.connector.connect(&params).await.map_err(|e| {
            ProviderError::Connection(format!(
                "An unexpected error occurred when creating the ClickHouse client. If the error \
                 is not clear, please contact the provider developers.\n\nClickHouse Client \
                 Error: {}",
                e
            ))
        })?;

        *self.connection.write().await = Some(connection);
        info!(host = %params.host, username = %params.username, "Connected to ClickHouse");

        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        if self.connection.write().await.take().is_some() {
            info!("Released ClickHouse connection");
        }
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let schema = self.resource(resource_type)?.schema();

        let mut diagnostics = validate(&schema, &config);
        diagnostics.extend(validate_identifiers(&schema, &config));
        Ok(diagnostics)
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let schema = self.resource(resource_type)?.schema();
        Ok(plan::plan(&schema, prior_state.as_ref(), &proposed_state))
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let conn = self.connection().await?;
        resource.create(conn.as_ref(), planned_state).await
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let conn = self.connection().await?;
        resource.read(conn.as_ref(), current_state).await
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let conn = self.connection().await?;
        resource
            .update(conn.as_ref(), prior_state, planned_state)
            .await
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let resource = self.resource(resource_type)?;
        let conn = self.connection().await?;
        resource.delete(conn.as_ref(), current_state).await
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let conn = self.connection().await?;
        let state = resource.import(conn.as_ref(), id).await?;
        Ok(vec![ImportedResource::new(resource_type, state)])
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let schema = self.data_source(data_source_type)?.schema();
        Ok(validate(&schema, &config))
    }

    async fn read_data_source(
        &self,
        data_source_type: &str,
        _config: Value,
    ) -> Result<Value, ProviderError> {
        let data_source = self.data_source(data_source_type)?;
        let conn = self.connection().await?;
        data_source.read(conn.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnection, MockConnector};
    use serde_json::json;
    use tokio_test::assert_ok;

    fn provider(connection: Arc<MockConnection>) -> (ClickHouseProvider, Arc<MockConnector>) {
        let connector = Arc::new(MockConnector::new(connection));
        let provider = ClickHouseProvider::with_connector(connector.clone()).with_env(|_| None);
        (provider, connector)
    }

    fn credentials() -> Value {
        json!({"host": "localhost", "username": "admin", "password": "pw"})
    }

    #[test]
    fn test_schema_lists_every_type() {
        let (provider, _) = provider(Arc::new(MockConnection::new()));
        let schema = provider.schema();

        assert!(schema.resources.contains_key("clickhouse_database"));
        assert!(schema.resources.contains_key("clickhouse_user"));
        assert_eq!(schema.data_sources.len(), 3);
        assert_eq!(schema.provider.block.attributes.len(), 3);

        let metadata = provider.metadata();
        assert_eq!(
            metadata.data_sources,
            vec!["clickhouse_databases", "clickhouse_roles", "clickhouse_users"]
        );
        assert!(metadata.capabilities.plan_destroy);
    }

    #[tokio::test]
    async fn test_configure_opens_connection_once() {
        let (provider, connector) = provider(Arc::new(MockConnection::new()));

        let diagnostics = assert_ok!(provider.configure(credentials()).await);
        assert!(diagnostics.is_empty());
        assert!(provider.is_configured().await);

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].database, "default");
    }

    #[tokio::test]
    async fn test_configure_reports_missing_fields_without_connecting() {
        let (provider, connector) = provider(Arc::new(MockConnection::new()));

        let diagnostics = provider
            .configure(json!({"host": "localhost"}))
            .await
            .unwrap();
        assert_eq!(diagnostics.len(), 2);
        assert!(connector.attempts().is_empty());
        assert!(!provider.is_configured().await);
    }

    #[tokio::test]
    async fn test_configure_falls_back_to_env() {
        let connector = Arc::new(MockConnector::new(Arc::new(MockConnection::new())));
        let provider = ClickHouseProvider::with_connector(connector.clone()).with_env(|key| {
            match key {
                "CLICKHOUSE_HOST" => Some("env-host".to_string()),
                "CLICKHOUSE_USERNAME" => Some("env-user".to_string()),
                "CLICKHOUSE_PASSWORD" => Some("env-pass".to_string()),
                _ => None,
            }
        });

        let diagnostics = provider
            .configure(json!({"username": "explicit"}))
            .await
            .unwrap();
        assert!(diagnostics.is_empty());

        let attempts = connector.attempts();
        assert_eq!(attempts[0].host, "env-host");
        assert_eq!(attempts[0].username, "explicit");
        assert_eq!(attempts[0].password, "env-pass");
    }

    #[tokio::test]
    async fn test_configure_connection_failure() {
        let connector = Arc::new(MockConnector::failing("Connection refused"));
        let provider = ClickHouseProvider::with_connector(connector).with_env(|_| None);

        let err = provider.configure(credentials()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Connection(_)));
        assert!(err.message().contains("Connection refused"));
        assert!(!provider.is_configured().await);
    }

    #[tokio::test]
    async fn test_configure_rejects_wrong_types() {
        let (provider, connector) = provider(Arc::new(MockConnection::new()));

        let diagnostics = provider
            .configure(json!({"host": 8123, "username": "u", "password": "p"}))
            .await
            .unwrap();
        assert!(has_errors(&diagnostics));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("host"));
        assert!(connector.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_operations_require_configure() {
        let (provider, _) = provider(Arc::new(MockConnection::new()));

        let err = provider
            .create("clickhouse_database", json!({"database": "a"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));

        let err = provider
            .read_data_source("clickhouse_users", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_stop_releases_connection() {
        let (provider, _) = provider(Arc::new(MockConnection::new()));
        provider.configure(credentials()).await.unwrap();

        provider.stop().await.unwrap();
        assert!(!provider.is_configured().await);

        let err = provider
            .read("clickhouse_database", json!({"database": "a"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_unknown_types() {
        let (provider, _) = provider(Arc::new(MockConnection::new()));
        provider.configure(credentials()).await.unwrap();

        let err = provider
            .create("clickhouse_table", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));

        let err = provider
            .read_data_source("clickhouse_tables", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }

    #[tokio::test]
    async fn test_validate_resource_config() {
        let (provider, _) = provider(Arc::new(MockConnection::new()));

        let diagnostics = provider
            .validate_resource_config("clickhouse_user", json!({"username": "alice"}))
            .await
            .unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("password"));

        let diagnostics = provider
            .validate_resource_config("clickhouse_database", json!({"database": ""}))
            .await
            .unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Empty value"));
    }

    #[tokio::test]
    async fn test_null_configs() {
        let connector = Arc::new(MockConnector::new(Arc::new(MockConnection::new())));
        let provider = ClickHouseProvider::with_connector(connector.clone()).with_env(|key| {
            Some(format!("{}-value", key.to_lowercase()))
        });

        let diagnostics = provider
            .validate_resource_config("clickhouse_user", Value::Null)
            .await
            .unwrap();
        assert_eq!(diagnostics.len(), 2);
        assert!(has_errors(&diagnostics));

        let diagnostics = assert_ok!(provider.validate_provider_config(Value::Null).await);
        assert!(diagnostics.is_empty());

        let diagnostics = assert_ok!(provider.configure(Value::Null).await);
        assert!(diagnostics.is_empty());
        assert_eq!(connector.attempts()[0].host, "clickhouse_host-value");
    }

    #[tokio::test]
    async fn test_import_database() {
        let connection = Arc::new(MockConnection::new().with_database("events"));
        let (provider, _) = provider(connection);
        provider.configure(credentials()).await.unwrap();

        let imported = provider
            .import_resource("clickhouse_database", "events")
            .await
            .unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].resource_type, "clickhouse_database");
        assert_eq!(imported[0].state, json!({"database": "events"}));
    }
}
