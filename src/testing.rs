//! Testing utilities for the ClickHouse provider.
//!
//! [`MockConnection`] is an in-memory stand-in for a ClickHouse server. It
//! keeps catalogs of databases, users and roles, applies the statements the
//! adapters issue against them, and records every statement as it would be
//! logged. [`MockConnector`] hands it out from `Configure`, and
//! [`ProviderTester`] drives a provider without a gRPC server.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hemmer_provider_clickhouse::testing::{MockConnection, ProviderTester};
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_database() {
//!     let connection = Arc::new(MockConnection::new());
//!     let tester = ProviderTester::mock(connection.clone());
//!
//!     tester
//!         .configure(json!({"host": "localhost", "username": "admin", "password": "pw"}))
//!         .await
//!         .unwrap();
//!
//!     tester
//!         .create("clickhouse_database", json!({"database": "analytics"}))
//!         .await
//!         .unwrap();
//!     assert!(connection.has_database("analytics"));
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ConnectionParams;
use crate::connection::{ClientError, Connection, Connector, Statement};
use crate::error::ProviderError;
use crate::provider::ClickHouseProvider;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

// =========================================================================
// Mock Connection
// =========================================================================

#[derive(Default)]
struct MockState {
    databases: Vec<String>,
    users: Vec<(String, String)>,
    roles: Vec<String>,
    statements: Vec<String>,
    failures: Vec<(String, String)>,
}

/// In-memory [`Connection`] that behaves like a single ClickHouse server.
///
/// Catalogs keep insertion order, which is the order listings return.
/// Duplicate creates, and `ALTER USER`/`DROP USER` on a missing user, fail
/// with the server's error text.
#[derive(Default)]
pub struct MockConnection {
    state: Mutex<MockState>,
}

impl MockConnection {
    /// Create a server with empty catalogs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a database.
    pub fn with_database(self, name: impl Into<String>) -> Self {
        self.state().databases.push(name.into());
        self
    }

    /// Seed a user.
    pub fn with_user(self, name: impl Into<String>, password: impl Into<String>) -> Self {
        self.state().users.push((name.into(), password.into()));
        self
    }

    /// Seed a role.
    pub fn with_role(self, name: impl Into<String>) -> Self {
        self.state().roles.push(name.into());
        self
    }

    /// Fail every statement whose template starts with `prefix`.
    pub fn with_failure(self, prefix: impl Into<String>, message: impl Into<String>) -> Self {
        self.inject_failure(prefix, message);
        self
    }

    /// Fail every statement whose template starts with `prefix`, from now on.
    pub fn inject_failure(&self, prefix: impl Into<String>, message: impl Into<String>) {
        self.state().failures.push((prefix.into(), message.into()));
    }

    /// Stop failing statements.
    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Every statement received so far, rendered with secrets masked.
    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    /// Database names, in creation order.
    pub fn databases(&self) -> Vec<String> {
        self.state().databases.clone()
    }

    /// User names, in creation order.
    pub fn users(&self) -> Vec<String> {
        self.state().users.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Whether the database exists.
    pub fn has_database(&self, name: &str) -> bool {
        self.state().databases.iter().any(|d| d == name)
    }

    /// Whether the user exists.
    pub fn has_user(&self, name: &str) -> bool {
        self.password_of(name).is_some()
    }

    /// Current password of a user.
    pub fn password_of(&self, name: &str) -> Option<String> {
        self.state()
            .users
            .iter()
            .find(|(user, _)| user == name)
            .map(|(_, password)| password.clone())
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the statement, then apply any injected failure.
    fn receive(&self, statement: &Statement) -> Result<MutexGuard<'_, MockState>, ClientError> {
        let mut state = self.state();
        state.statements.push(statement.to_string());

        let failure = state
            .failures
            .iter()
            .find(|(prefix, _)| statement.template().starts_with(prefix.as_str()))
            .map(|(_, message)| message.clone());

        match failure {
            Some(message) => Err(ClientError::Server(message)),
            None => Ok(state),
        }
    }
}

fn unsupported(statement: &Statement) -> ClientError {
    ClientError::Server(format!(
        "Code: 62. DB::Exception: Syntax error: unsupported statement {}. (SYNTAX_ERROR)",
        statement.template()
    ))
}

fn unknown_user(name: &str) -> ClientError {
    ClientError::Server(format!(
        "Code: 192. DB::Exception: There is no user `{}` in local_directory. (UNKNOWN_USER)",
        name
    ))
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&self, statement: &Statement) -> Result<(), ClientError> {
        let mut state = self.receive(statement)?;
        let name = statement.arg(0).unwrap_or_default().to_string();

        match statement.template() {
            "CREATE DATABASE ?" => {
                if state.databases.contains(&name) {
                    return Err(ClientError::Server(format!(
                        "Code: 82. DB::Exception: Database {} already exists. (DATABASE_ALREADY_EXISTS)",
                        name
                    )));
                }
                state.databases.push(name);
            },
            "DROP DATABASE IF EXISTS ?" => {
                state.databases.retain(|d| *d != name);
            },
            "CREATE USER ? IDENTIFIED BY ?" => {
                if state.users.iter().any(|(user, _)| *user == name) {
                    return Err(ClientError::Server(format!(
                        "Code: 493. DB::Exception: user `{}`: cannot insert because user `{}` \
                         already exists in local_directory. (ACCESS_ENTITY_ALREADY_EXISTS)",
                        name, name
                    )));
                }
                let password = statement.arg(1).unwrap_or_default().to_string();
                state.users.push((name, password));
            },
            "ALTER USER ? IDENTIFIED BY ?" => {
                let password = statement.arg(1).unwrap_or_default().to_string();
                match state.users.iter_mut().find(|(user, _)| *user == name) {
                    Some(entry) => entry.1 = password,
                    None => return Err(unknown_user(&name)),
                }
            },
            "DROP USER ?" => match state.users.iter().position(|(user, _)| *user == name) {
                Some(index) => {
                    state.users.remove(index);
                },
                None => return Err(unknown_user(&name)),
            },
            _ => return Err(unsupported(statement)),
        }

        Ok(())
    }

    async fn query_count(&self, statement: &Statement) -> Result<u64, ClientError> {
        let state = self.receive(statement)?;
        let name = statement.arg(0).unwrap_or_default();
        let template = statement.template();

        let count = if template.contains("system.databases") {
            state.databases.iter().filter(|d| *d == name).count()
        } else if template.contains("system.users") {
            state.users.iter().filter(|(user, _)| user == name).count()
        } else {
            return Err(unsupported(statement));
        };

        Ok(count as u64)
    }

    async fn query_names(&self, statement: &Statement) -> Result<Vec<String>, ClientError> {
        let state = self.receive(statement)?;

        match statement.template() {
            "SHOW DATABASES" => Ok(state.databases.clone()),
            "SHOW USERS" => Ok(state.users.iter().map(|(name, _)| name.clone()).collect()),
            "SHOW ROLES" => Ok(state.roles.clone()),
            _ => Err(unsupported(statement)),
        }
    }
}

/// [`Connector`] that hands out a shared [`MockConnection`].
pub struct MockConnector {
    connection: Arc<MockConnection>,
    failure: Option<String>,
    attempts: Mutex<Vec<ConnectionParams>>,
}

impl MockConnector {
    /// Connect every time to `connection`.
    pub fn new(connection: Arc<MockConnection>) -> Self {
        Self {
            connection,
            failure: None,
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Fail every connection attempt with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new(Arc::new(MockConnection::new()))
        }
    }

    /// Parameters of every connection attempt so far.
    pub fn attempts(&self) -> Vec<ConnectionParams> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn Connection>, ClientError> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(params.clone());

        match &self.failure {
            Some(message) => Err(ClientError::Server(message.clone())),
            None => {
                let connection: Arc<dyn Connection> = self.connection.clone();
                Ok(connection)
            },
        }
    }
}

// =========================================================================
// Provider Tester
// =========================================================================

/// Drives a provider through the same calls the engine makes, without a
/// gRPC server in between.
///
/// Calls that answer with diagnostics return `Err(TestError::Diagnostics)`
/// when any of them is an error, so tests can `unwrap()` the happy path.
pub struct ProviderTester<P: ProviderService = ClickHouseProvider> {
    provider: P,
}

impl ProviderTester<ClickHouseProvider> {
    /// A ClickHouse provider that connects to `connection` and sees an
    /// empty environment.
    pub fn mock(connection: Arc<MockConnection>) -> Self {
        let connector = Arc::new(MockConnector::new(connection));
        Self::new(ClickHouseProvider::with_connector(connector).with_env(|_| None))
    }
}

impl<P: ProviderService> ProviderTester<P> {
    /// Wrap `provider`.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// `GetSchema`.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Resource type names from `GetMetadata`.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Data source type names from `GetMetadata`.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    /// `ValidateProviderConfig`.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        check_diagnostics(self.provider.validate_provider_config(config).await)
    }

    /// `Configure`.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        check_diagnostics(self.provider.configure(config).await)
    }

    /// `Stop`.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    /// `ValidateResourceConfig`.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        check_diagnostics(
            self.provider
                .validate_resource_config(resource_type, config)
                .await,
        )
    }

    /// `Plan` for an object that does not exist yet. The proposed state
    /// doubles as the configuration.
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, proposed.clone(), proposed)
            .await
    }

    /// `Plan` from `prior` to `proposed`.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior: Value,
        proposed: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior), proposed.clone(), proposed)
            .await
    }

    /// `Plan` with a null proposed state.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior), Value::Null, Value::Null)
            .await
    }

    /// `Create`.
    pub async fn create(&self, resource_type: &str, planned: Value) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned).await
    }

    /// `Read`.
    pub async fn read(&self, resource_type: &str, state: Value) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, state).await
    }

    /// `Update`.
    pub async fn update(
        &self,
        resource_type: &str,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.update(resource_type, prior, planned).await
    }

    /// `Delete`.
    pub async fn delete(&self, resource_type: &str, state: Value) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, state).await
    }

    /// `ImportResourceState`.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// `ValidateDataSourceConfig`.
    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        check_diagnostics(
            self.provider
                .validate_data_source_config(data_source_type, config)
                .await,
        )
    }

    /// `ReadDataSource`.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.read_data_source(data_source_type, config).await
    }

    /// Plan, create, then refresh. Returns the refreshed state.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let state = self.create(resource_type, plan.planned_state).await?;
        self.read(resource_type, state).await
    }

    /// Plan, update, then refresh. Returns the refreshed state.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior: Value,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior.clone(), config)
            .await?;
        let state = self
            .update(resource_type, prior, plan.planned_state)
            .await?;
        self.read(resource_type, state).await
    }

    /// Plan a destroy, then delete.
    pub async fn lifecycle_delete(&self, resource_type: &str, state: Value) -> Result<(), ProviderError> {
        self.plan_delete(resource_type, state.clone()).await?;
        self.delete(resource_type, state).await
    }

    /// Create from `initial`, update to `updated`, then delete. Returns the
    /// state the object had just before it was deleted.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial: Value,
        updated: Value,
    ) -> Result<Value, ProviderError> {
        let created = self.lifecycle_create(resource_type, initial).await?;
        let updated = self.lifecycle_update(resource_type, created, updated).await?;
        self.lifecycle_delete(resource_type, updated.clone()).await?;
        Ok(updated)
    }
}

/// Failure of a [`ProviderTester`] call that answers with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The call returned error diagnostics; warnings are dropped.
    Diagnostics(Vec<Diagnostic>),
    /// The call itself failed.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diagnostics) => {
                writeln!(f, "{} error diagnostic(s):", diagnostics.len())?;
                for d in diagnostics {
                    write!(f, "  {}", d.summary)?;
                    if let Some(attribute) = &d.attribute {
                        write!(f, " (at {})", attribute)?;
                    }
                    if let Some(detail) = &d.detail {
                        write!(f, ": {}", detail)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(result: Result<Vec<Diagnostic>, ProviderError>) -> Result<(), TestError> {
    let errors: Vec<_> = result?.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

fn changed_paths(plan: &PlanResult) -> Vec<&str> {
    plan.changes.iter().map(|c| c.path.as_str()).collect()
}

/// Assert the plan creates a new object.
///
/// # Panics
///
/// Panics if the plan is empty or replaces an object.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(plan.has_changes(), "plan is empty, expected a create");
    assert!(!plan.requires_replace, "plan replaces, expected a create");
}

/// Assert the plan leaves the object alone.
///
/// # Panics
///
/// Panics if any attribute changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        !plan.has_changes(),
        "expected an empty plan, got changes to {:?}",
        changed_paths(plan)
    );
}

/// Assert the plan drops and recreates the object.
///
/// # Panics
///
/// Panics unless the plan requires replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "expected a replacement, got an in-place plan changing {:?}",
        changed_paths(plan)
    );
}

/// Assert the plan changes the object in place.
///
/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "expected an in-place update, got a replacement changing {:?}",
        changed_paths(plan)
    );
}

/// Assert the plan changes the attribute at `path`.
///
/// # Panics
///
/// Panics if `path` is not among the changed attributes.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let changed = changed_paths(plan);
    assert!(
        changed.contains(&path),
        "expected a change to '{}', plan changes {:?}",
        path,
        changed
    );
}

fn error_summaries(diagnostics: &[Diagnostic]) -> Vec<&str> {
    diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(|d| d.summary.as_str())
        .collect()
}

/// Assert none of the diagnostics is an error.
///
/// # Panics
///
/// Panics if any diagnostic is an error.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors = error_summaries(diagnostics);
    assert!(errors.is_empty(), "expected no errors, got {:?}", errors);
}

/// Assert some error diagnostic's summary contains `substring`.
///
/// # Panics
///
/// Panics if no error summary contains `substring`.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let errors = error_summaries(diagnostics);
    assert!(
        errors.iter().any(|summary| summary.contains(substring)),
        "expected an error containing '{}', got {:?}",
        substring,
        errors
    );
}
