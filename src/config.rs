//! Provider configuration and connection parameter resolution.
//!
//! Each connection parameter is taken from the provider configuration when
//! set, and from its environment variable otherwise. Every missing value is
//! reported, not just the first one.

use std::fmt;

use serde::Deserialize;

use crate::schema::{Attribute, Diagnostic, Schema};

/// Environment variable consulted for `host`.
pub const ENV_HOST: &str = "CLICKHOUSE_HOST";
/// Environment variable consulted for `username`.
pub const ENV_USERNAME: &str = "CLICKHOUSE_USERNAME";
/// Environment variable consulted for `password`.
pub const ENV_PASSWORD: &str = "CLICKHOUSE_PASSWORD";

/// Catalog every session starts in.
pub const DEFAULT_DATABASE: &str = "default";

/// Provider configuration as declared by the user.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Hostname or address of the ClickHouse server.
    #[serde(default)]
    pub host: Option<String>,
    /// User the provider authenticates as.
    #[serde(default)]
    pub username: Option<String>,
    /// Password of that user.
    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl ProviderConfig {
    /// Deserialize a configuration record. A null record is an empty config.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
    }

    /// Resolve connection parameters, falling back to `env` for unset values.
    ///
    /// Returns one error diagnostic per parameter that is missing or empty
    /// after resolution.
    pub fn resolve<F>(&self, env: F) -> Result<ConnectionParams, Vec<Diagnostic>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = pick(&self.host, ENV_HOST, &env);
        let username = pick(&self.username, ENV_USERNAME, &env);
        let password = pick(&self.password, ENV_PASSWORD, &env);

        let mut diagnostics = Vec::new();
        if host.is_empty() {
            diagnostics.push(missing("host", "Host", ENV_HOST));
        }
        if username.is_empty() {
            diagnostics.push(missing("username", "Username", ENV_USERNAME));
        }
        if password.is_empty() {
            diagnostics.push(missing("password", "Password", ENV_PASSWORD));
        }

        if !diagnostics.is_empty() {
            return Err(diagnostics);
        }

        Ok(ConnectionParams {
            host,
            username,
            password,
            database: DEFAULT_DATABASE.to_string(),
        })
    }
}

fn pick<F>(configured: &Option<String>, var: &str, env: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    match configured {
        Some(value) => value.clone(),
        None => env(var).unwrap_or_default(),
    }
}

fn missing(attribute: &str, label: &str, var: &str) -> Diagnostic {
    Diagnostic::error(format!("Missing ClickHouse {}", label))
        .with_detail(format!(
            "The provider cannot create the ClickHouse client as there is a missing or empty \
             value for the ClickHouse {attribute}. Set the {attribute} value in the configuration \
             or use the {var} environment variable. If either is already set, ensure the value \
             is not empty."
        ))
        .with_attribute(attribute)
}

/// Fully resolved parameters for opening a connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Server host, optionally with scheme and port.
    pub host: String,
    /// User to authenticate as.
    pub username: String,
    /// Password of that user.
    pub password: String,
    /// Catalog the session starts in.
    pub database: String,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

/// Schema of the provider configuration block.
///
/// The attributes are optional here because each one may be supplied by its
/// environment variable instead; [`ProviderConfig::resolve`] enforces that a
/// value exists one way or the other.
pub fn provider_schema() -> Schema {
    Schema::v0()
        .with_description("Connection settings for the ClickHouse server.")
        .with_attribute(
            "host",
            Attribute::optional_string().with_description(format!(
                "The hostname or IP address of the ClickHouse server. Falls back to {}.",
                ENV_HOST
            )),
        )
        .with_attribute(
            "username",
            Attribute::optional_string().with_description(format!(
                "The username for accessing the ClickHouse server. Falls back to {}.",
                ENV_USERNAME
            )),
        )
        .with_attribute(
            "password",
            Attribute::optional_string()
                .sensitive()
                .with_description(format!(
                    "The password for accessing the ClickHouse server. Falls back to {}.",
                    ENV_PASSWORD
                )),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_resolve_from_environment() {
        let config = ProviderConfig::default();
        let params = config
            .resolve(env(&[
                (ENV_HOST, "ch.internal"),
                (ENV_USERNAME, "admin"),
                (ENV_PASSWORD, "s3cret"),
            ]))
            .unwrap();

        assert_eq!(params.host, "ch.internal");
        assert_eq!(params.username, "admin");
        assert_eq!(params.password, "s3cret");
        assert_eq!(params.database, DEFAULT_DATABASE);
    }

    #[test]
    fn test_explicit_config_wins_over_environment() {
        let config = ProviderConfig::from_value(json!({
            "host": "explicit-host",
            "username": "explicit-user",
            "password": "explicit-pass"
        }))
        .unwrap();

        let params = config
            .resolve(env(&[
                (ENV_HOST, "env-host"),
                (ENV_USERNAME, "env-user"),
                (ENV_PASSWORD, "env-pass"),
            ]))
            .unwrap();

        assert_eq!(params.host, "explicit-host");
        assert_eq!(params.username, "explicit-user");
        assert_eq!(params.password, "explicit-pass");
    }

    #[test]
    fn test_mixed_sources() {
        let config = ProviderConfig::from_value(json!({"host": "explicit-host"})).unwrap();
        let params = config
            .resolve(env(&[(ENV_USERNAME, "env-user"), (ENV_PASSWORD, "env-pass")]))
            .unwrap();

        assert_eq!(params.host, "explicit-host");
        assert_eq!(params.username, "env-user");
    }

    #[test]
    fn test_every_missing_field_is_reported() {
        let diagnostics = ProviderConfig::default().resolve(env(&[])).unwrap_err();

        assert_eq!(diagnostics.len(), 3);
        let attributes: Vec<_> = diagnostics
            .iter()
            .map(|d| d.attribute.clone().unwrap())
            .collect();
        assert_eq!(attributes, vec!["host", "username", "password"]);
        assert_eq!(diagnostics[0].summary, "Missing ClickHouse Host");
        assert!(diagnostics[0]
            .detail
            .as_deref()
            .unwrap()
            .contains(ENV_HOST));
    }

    #[test]
    fn test_explicit_empty_value_is_missing() {
        let config = ProviderConfig::from_value(json!({"password": ""})).unwrap();
        let diagnostics = config
            .resolve(env(&[
                (ENV_HOST, "h"),
                (ENV_USERNAME, "u"),
                (ENV_PASSWORD, "from-env"),
            ]))
            .unwrap_err();

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("password"));
    }

    #[test]
    fn test_from_value() {
        assert_eq!(
            ProviderConfig::from_value(serde_json::Value::Null).unwrap(),
            ProviderConfig::default()
        );
        assert!(ProviderConfig::from_value(json!({"port": 9000})).is_err());
        assert!(ProviderConfig::from_value(json!({"host": 1})).is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let config = ProviderConfig::from_value(json!({"password": "hunter2"})).unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));

        let params = ProviderConfig::default()
            .resolve(env(&[
                (ENV_HOST, "h"),
                (ENV_USERNAME, "u"),
                (ENV_PASSWORD, "hunter2"),
            ]))
            .unwrap();
        assert!(!format!("{:?}", params).contains("hunter2"));
    }

    #[test]
    fn test_provider_schema() {
        let schema = provider_schema();
        assert!(schema.attribute("password").unwrap().flags.sensitive);
        assert!(schema.attribute("host").unwrap().flags.optional);
        assert_eq!(schema.block.attributes.len(), 3);
    }
}
