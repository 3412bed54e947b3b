//! Schema types for describing provider, resource and data source records.
//!
//! Every ClickHouse entity is a flat record of named attributes. The schema
//! says which attributes are required, which are computed by the provider,
//! which must be hidden from logs and which identify the entity (changing
//! them forces replacement).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value type of an attribute, serialized into `GetSchema` responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// Names, passwords and hosts.
    String,
    /// Catalog listings.
    List(Box<AttributeType>),
}

impl AttributeType {
    /// A list whose elements are all `element_type`.
    pub fn list(element_type: AttributeType) -> Self {
        Self::List(Box::new(element_type))
    }
}

/// Who sets an attribute and how it is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttributeFlags {
    /// Must be present and non-null in configuration.
    pub required: bool,
    /// May be left out of configuration.
    pub optional: bool,
    /// Filled in by the provider; ignored when validating configuration.
    pub computed: bool,
    /// Redacted in plans and never logged.
    pub sensitive: bool,
}

impl AttributeFlags {
    /// Set by configuration.
    pub fn required() -> Self {
        Self {
            required: true,
            ..Self::default()
        }
    }

    /// Set by configuration or left out.
    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Self::default()
        }
    }

    /// Set by the provider.
    pub fn computed() -> Self {
        Self {
            computed: true,
            ..Self::default()
        }
    }

    /// Add redaction to these flags.
    pub fn sensitive(self) -> Self {
        Self {
            sensitive: true,
            ..self
        }
    }
}

/// One named field of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Value type.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Presence and visibility.
    #[serde(flatten)]
    pub flags: AttributeFlags,
    /// Shown in generated documentation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The attribute identifies the object on the server, so a new value
    /// means dropping the old object and creating a new one.
    #[serde(default)]
    pub force_new: bool,
}

impl Attribute {
    /// An attribute without description that may change in place.
    pub fn new(attr_type: AttributeType, flags: AttributeFlags) -> Self {
        Self {
            attr_type,
            flags,
            description: None,
            force_new: false,
        }
    }

    /// String attribute that configuration must set.
    pub fn required_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::required())
    }

    /// String attribute that may come from elsewhere, such as the environment.
    pub fn optional_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional())
    }

    /// List of names read back from the server.
    pub fn computed_string_list() -> Self {
        Self::new(
            AttributeType::list(AttributeType::String),
            AttributeFlags::computed(),
        )
    }

    /// Attach documentation text.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Changing this attribute replaces the object.
    pub fn with_force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Redact this attribute.
    pub fn sensitive(mut self) -> Self {
        self.flags = self.flags.sensitive();
        self
    }
}

/// The attributes of a record.
///
/// Attributes are kept in a sorted map so that schemas, validation output
/// and plan changes come out in a stable order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Block {
    /// Attributes by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Attribute>,
    /// What the record represents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Versioned record layout of the provider block, a resource or a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Schema {
    /// Layout version recorded alongside stored state.
    #[serde(default)]
    pub version: u64,
    /// Attributes and description.
    #[serde(flatten)]
    pub block: Block,
}

impl Schema {
    /// First layout version. Every ClickHouse type is still at version 0.
    pub fn v0() -> Self {
        Self::default()
    }

    /// Declare an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.block.attributes.insert(name.into(), attr);
        self
    }

    /// Describe what the record represents.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.block.description = Some(description.into());
        self
    }

    /// Look up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.block.attributes.get(name)
    }
}

/// Everything `GetSchema` reports: the provider block plus one schema per
/// resource type and data source type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProviderSchema {
    /// The provider block.
    #[serde(default)]
    pub provider: Schema,
    /// Resource schemas by type name.
    #[serde(default)]
    pub resources: BTreeMap<String, Schema>,
    /// Data source schemas by type name.
    #[serde(default)]
    pub data_sources: BTreeMap<String, Schema>,
}

impl ProviderSchema {
    /// No provider attributes and no types.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider block.
    pub fn with_provider_config(mut self, schema: Schema) -> Self {
        self.provider = schema;
        self
    }

    /// Register a resource type.
    pub fn with_resource(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.resources.insert(name.into(), schema);
        self
    }

    /// Register a data source type.
    pub fn with_data_source(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.data_sources.insert(name.into(), schema);
        self
    }
}

/// How the engine treats a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// The operation did not take effect.
    Error,
    /// The operation took effect; the engine only displays the message.
    Warning,
}

/// A message shown to the user by the engine.
///
/// Provider errors surface as error diagnostics whose summary is the error
/// category and whose detail carries the underlying ClickHouse message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Error or warning.
    pub severity: DiagnosticSeverity,
    /// One-line headline.
    pub summary: String,
    /// Full message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Attribute path the message refers to, such as `password` or `names.1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    fn with_severity(severity: DiagnosticSeverity, summary: impl Into<String>) -> Self {
        Self {
            severity,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// An error with only a summary.
    pub fn error(summary: impl Into<String>) -> Self {
        Self::with_severity(DiagnosticSeverity::Error, summary)
    }

    /// A warning with only a summary.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self::with_severity(DiagnosticSeverity::Warning, summary)
    }

    /// Attach the full message.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Point at an attribute path.
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Whether the severity is [`DiagnosticSeverity::Error`].
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

/// Whether any diagnostic in the slice is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_keeps_other_flags() {
        let password = AttributeFlags::required().sensitive();
        assert!(password.required && password.sensitive);
        assert!(!password.optional && !password.computed);

        let host = Attribute::optional_string().sensitive();
        assert!(host.flags.optional && host.flags.sensitive);
    }

    #[test]
    fn test_attribute_builders() {
        let attr = Attribute::required_string()
            .with_description("Name of the database")
            .with_force_new();

        assert_eq!(attr.attr_type, AttributeType::String);
        assert!(attr.flags.required);
        assert_eq!(attr.description, Some("Name of the database".to_string()));
        assert!(attr.force_new);

        let list = Attribute::computed_string_list();
        assert_eq!(list.attr_type, AttributeType::list(AttributeType::String));
        assert!(list.flags.computed);
    }

    #[test]
    fn test_schema_builder() {
        let schema = Schema::v0()
            .with_attribute("username", Attribute::required_string().with_force_new())
            .with_attribute("password", Attribute::required_string().sensitive());

        assert_eq!(schema.version, 0);
        assert!(schema.attribute("username").is_some_and(|a| a.force_new));
        assert!(schema.attribute("password").is_some_and(|a| a.flags.sensitive));
        assert!(schema.attribute("missing").is_none());
    }

    #[test]
    fn test_attribute_order_is_stable() {
        let schema = Schema::v0()
            .with_attribute("zeta", Attribute::optional_string())
            .with_attribute("alpha", Attribute::optional_string());

        let names: Vec<_> = schema.block.attributes.keys().cloned().collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_attribute_serialization() {
        let attr = Attribute::required_string().sensitive();
        let json = serde_json::to_value(&attr).unwrap();
        assert_eq!(json["type"], "string");
        assert_eq!(json["required"], true);
        assert_eq!(json["sensitive"], true);
    }

    #[test]
    fn test_diagnostic() {
        let err = Diagnostic::error("Missing ClickHouse Host")
            .with_detail("Set the host value in the configuration")
            .with_attribute("host");

        assert_eq!(err.severity, DiagnosticSeverity::Error);
        assert_eq!(err.summary, "Missing ClickHouse Host");
        assert_eq!(
            err.detail,
            Some("Set the host value in the configuration".to_string())
        );
        assert_eq!(err.attribute, Some("host".to_string()));
        assert!(err.is_error());
    }

    #[test]
    fn test_has_errors() {
        assert!(!has_errors(&[]));
        assert!(!has_errors(&[Diagnostic::warning("deprecated")]));
        assert!(has_errors(&[
            Diagnostic::warning("deprecated"),
            Diagnostic::error("broken")
        ]));
    }
}
