//! The connection handle shared by every resource and data source.
//!
//! Adapters never splice caller input into SQL text. They build a
//! [`Statement`] from a constant template with `?` placeholders and typed
//! [`Argument`]s, and the connection binds each argument with the proper
//! quoting. Passwords travel as [`Argument::Secret`] and are never shown in
//! logs.
//!
//! [`Connection`] and [`Connector`] are traits so that the provider can be
//! exercised against [`crate::testing::MockConnection`] without a server.

use std::fmt;
use std::net::Ipv6Addr;
use std::sync::Arc;

use async_trait::async_trait;
use clickhouse::sql::Identifier;
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ConnectionParams;

/// Default HTTP port of the ClickHouse server.
pub const DEFAULT_HTTP_PORT: u16 = 8123;

/// Errors raised by a [`Connection`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Error from the ClickHouse client library.
    #[error("{0}")]
    ClickHouse(#[from] clickhouse::error::Error),

    /// The server rejected the statement.
    #[error("{0}")]
    Server(String),
}

/// A value bound to a `?` placeholder of a [`Statement`].
#[derive(Clone, PartialEq, Eq)]
pub enum Argument {
    /// An object name, bound as a backtick-quoted identifier.
    Identifier(String),
    /// A string value, bound as an escaped string literal.
    Literal(String),
    /// A string value that must never be displayed.
    Secret(String),
}

impl Argument {
    /// The raw, unquoted value.
    pub fn value(&self) -> &str {
        match self {
            Self::Identifier(v) | Self::Literal(v) | Self::Secret(v) => v,
        }
    }
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(v) => f.debug_tuple("Identifier").field(v).finish(),
            Self::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            Self::Secret(_) => f.debug_tuple("Secret").field(&"***").finish(),
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(v) => write!(f, "`{}`", v.replace('\\', "\\\\").replace('`', "\\`")),
            Self::Literal(v) => write!(f, "'{}'", v.replace('\\', "\\\\").replace('\'', "\\'")),
            Self::Secret(_) => f.write_str("'***'"),
        }
    }
}

/// A SQL template plus the arguments bound to its placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    template: &'static str,
    args: Vec<Argument>,
}

impl Statement {
    /// Create a statement from a constant template.
    pub fn new(template: &'static str) -> Self {
        Self {
            template,
            args: Vec::new(),
        }
    }

    /// Bind the next placeholder to an identifier.
    pub fn identifier(mut self, name: impl Into<String>) -> Self {
        self.args.push(Argument::Identifier(name.into()));
        self
    }

    /// Bind the next placeholder to a string literal.
    pub fn literal(mut self, value: impl Into<String>) -> Self {
        self.args.push(Argument::Literal(value.into()));
        self
    }

    /// Bind the next placeholder to a secret string literal.
    pub fn secret(mut self, value: impl Into<String>) -> Self {
        self.args.push(Argument::Secret(value.into()));
        self
    }

    /// The SQL template.
    pub fn template(&self) -> &'static str {
        self.template
    }

    /// The bound arguments, in placeholder order.
    pub fn args(&self) -> &[Argument] {
        &self.args
    }

    /// The raw value of the argument at `index`.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(Argument::value)
    }
}

/// Renders the statement with quoted arguments and secrets masked.
impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut args = self.args.iter();
        for (i, part) in self.template.split('?').enumerate() {
            if i > 0 {
                match args.next() {
                    Some(arg) => write!(f, "{}", arg)?,
                    None => f.write_str("?")?,
                }
            }
            f.write_str(part)?;
        }
        Ok(())
    }
}

/// A live session against the target database.
///
/// Each call is one request/response cycle; implementations hold no state
/// on behalf of callers.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a statement that returns no rows.
    async fn execute(&self, statement: &Statement) -> Result<(), ClientError>;

    /// Run a query returning a single `count` column in a single row.
    async fn query_count(&self, statement: &Statement) -> Result<u64, ClientError>;

    /// Run a query and collect the `name` column of every row, in server order.
    ///
    /// A failure on any row fails the whole call.
    async fn query_names(&self, statement: &Statement) -> Result<Vec<String>, ClientError>;
}

/// Opens [`Connection`]s from resolved connection parameters.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection and verify that the server is reachable.
    async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn Connection>, ClientError>;
}

#[derive(Debug, Row, Serialize, Deserialize)]
pub(crate) struct CountRow {
    pub(crate) count: u64,
}

#[derive(Debug, Row, Serialize, Deserialize)]
pub(crate) struct NameRow {
    pub(crate) name: String,
}

#[derive(Debug, Row, Serialize, Deserialize)]
pub(crate) struct PingRow {
    pub(crate) ok: u8,
}

/// [`Connection`] backed by the ClickHouse HTTP interface.
#[derive(Clone)]
pub struct ClickHouseConnection {
    client: Client,
}

impl ClickHouseConnection {
    /// Wrap an already configured client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client for the given parameters. No request is sent.
    pub fn from_params(params: &ConnectionParams) -> Self {
        let client = Client::default()
            .with_url(endpoint_url(&params.host))
            .with_user(params.username.as_str())
            .with_password(params.password.as_str())
            .with_database(params.database.as_str());

        Self::new(client)
    }

    /// Issue `SELECT 1` to check transport and credentials.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.client
            .query("SELECT 1 AS ok")
            .fetch_one::<PingRow>()
            .await?;
        Ok(())
    }

    fn query(&self, statement: &Statement) -> clickhouse::query::Query {
        debug!(statement = %statement, "Issuing statement");
        statement
            .args()
            .iter()
            .fold(self.client.query(statement.template()), |query, arg| match arg {
                Argument::Identifier(name) => query.bind(Identifier(name.as_str())),
                Argument::Literal(value) | Argument::Secret(value) => query.bind(value.as_str()),
            })
    }
}

#[async_trait]
impl Connection for ClickHouseConnection {
    async fn execute(&self, statement: &Statement) -> Result<(), ClientError> {
        self.query(statement).execute().await?;
        Ok(())
    }

    async fn query_count(&self, statement: &Statement) -> Result<u64, ClientError> {
        let row = self.query(statement).fetch_one::<CountRow>().await?;
        Ok(row.count)
    }

    async fn query_names(&self, statement: &Statement) -> Result<Vec<String>, ClientError> {
        let mut cursor = self.query(statement).fetch::<NameRow>()?;
        let mut names = Vec::new();
        while let Some(row) = cursor.next().await? {
            names.push(row.name);
        }
        Ok(names)
    }
}

/// [`Connector`] that opens [`ClickHouseConnection`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClickHouseConnector;

#[async_trait]
impl Connector for ClickHouseConnector {
    async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn Connection>, ClientError> {
        let connection = ClickHouseConnection::from_params(params);
        connection.ping().await?;
        Ok(Arc::new(connection))
    }
}

/// Turn a configured host into an HTTP endpoint URL.
///
/// Values with a scheme are used as-is. Otherwise `http://` is prefixed and
/// the default HTTP port is appended when the host carries no port. A bare
/// IPv6 address is bracketed first, so `::1` is always the address and
/// never an address plus port.
pub fn endpoint_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        return host.to_string();
    }

    if host.parse::<Ipv6Addr>().is_ok() {
        return format!("http://[{}]:{}", host, DEFAULT_HTTP_PORT);
    }

    let has_port = match host.rfind(':') {
        // Bracketed IPv6 literal: a port can only follow the closing bracket.
        Some(idx) if host.starts_with('[') => host[..idx].ends_with(']'),
        Some(idx) => host[idx + 1..].parse::<u16>().is_ok() && !host[..idx].contains(':'),
        None => false,
    };

    if has_port {
        format!("http://{}", host)
    } else {
        format!("http://{}:{}", host, DEFAULT_HTTP_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clickhouse::test::{handlers, Mock};

    #[test]
    fn test_statement_display_quotes_arguments() {
        let stmt = Statement::new("CREATE DATABASE ?").identifier("analytics");
        assert_eq!(stmt.to_string(), "CREATE DATABASE `analytics`");

        let stmt = Statement::new("SELECT count() AS count FROM system.users WHERE name = ?")
            .literal("o'brien");
        assert_eq!(
            stmt.to_string(),
            "SELECT count() AS count FROM system.users WHERE name = 'o\\'brien'"
        );

        let stmt = Statement::new("DROP DATABASE IF EXISTS ?").identifier("we`ird");
        assert_eq!(stmt.to_string(), "DROP DATABASE IF EXISTS `we\\`ird`");
    }

    #[test]
    fn test_statement_display_masks_secrets() {
        let stmt = Statement::new("CREATE USER ? IDENTIFIED BY ?")
            .identifier("alice")
            .secret("hunter2");

        let rendered = stmt.to_string();
        assert_eq!(rendered, "CREATE USER `alice` IDENTIFIED BY '***'");
        assert!(!format!("{:?}", stmt).contains("hunter2"));
        assert_eq!(stmt.arg(1), Some("hunter2"));
    }

    #[test]
    fn test_endpoint_url() {
        assert_eq!(endpoint_url("localhost"), "http://localhost:8123");
        assert_eq!(endpoint_url("localhost:8124"), "http://localhost:8124");
        assert_eq!(endpoint_url("10.0.0.5"), "http://10.0.0.5:8123");
        assert_eq!(endpoint_url("https://ch.example.com"), "https://ch.example.com");
        assert_eq!(endpoint_url("http://ch:8123/"), "http://ch:8123");
        assert_eq!(endpoint_url("[::1]"), "http://[::1]:8123");
        assert_eq!(endpoint_url("[::1]:9000"), "http://[::1]:9000");
    }

    #[test]
    fn test_endpoint_url_brackets_bare_ipv6() {
        assert_eq!(endpoint_url("::1"), "http://[::1]:8123");
        assert_eq!(endpoint_url("fe80::1:8124"), "http://[fe80::1:8124]:8123");
        assert_eq!(endpoint_url(" 2001:db8::5 "), "http://[2001:db8::5]:8123");
    }

    #[tokio::test]
    async fn test_execute_sends_quoted_identifier() {
        let mock = Mock::new();
        let recording = mock.add(handlers::record_ddl());

        let connection = ClickHouseConnection::new(Client::default().with_url(mock.url()));
        connection
            .execute(&Statement::new("CREATE DATABASE ?").identifier("analytics"))
            .await
            .unwrap();

        let query = recording.query().await;
        assert!(query.contains("CREATE DATABASE `analytics`"));
    }

    #[tokio::test]
    async fn test_query_names_preserves_server_order() {
        let mock = Mock::new();
        mock.add(handlers::provide(vec![
            NameRow { name: "system".into() },
            NameRow { name: "default".into() },
            NameRow { name: "analytics".into() },
        ]));

        let connection = ClickHouseConnection::new(Client::default().with_url(mock.url()));
        let names = connection
            .query_names(&Statement::new("SHOW DATABASES"))
            .await
            .unwrap();

        assert_eq!(names, vec!["system", "default", "analytics"]);
    }

    #[tokio::test]
    async fn test_query_count() {
        let mock = Mock::new();
        mock.add(handlers::provide(vec![CountRow { count: 1 }]));

        let connection = ClickHouseConnection::new(Client::default().with_url(mock.url()));
        let count = connection
            .query_count(
                &Statement::new("SELECT count() AS count FROM system.databases WHERE name = ?")
                    .literal("analytics"),
            )
            .await
            .unwrap();

        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_ping_surfaces_server_failure() {
        let mock = Mock::new();
        mock.add(handlers::failure(clickhouse::test::status::FORBIDDEN));

        let connection = ClickHouseConnection::new(Client::default().with_url(mock.url()));
        assert!(connection.ping().await.is_err());
    }
}
