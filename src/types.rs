//! Records exchanged with the engine that are not schemas or diagnostics.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One attribute whose value a plan would change.
///
/// Values of sensitive attributes are already redacted when a change is
/// built, so changes are safe to log and to send to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Attribute name, e.g. `password`.
    pub path: String,
    /// Current value, absent when the object is being created.
    pub before: Option<Value>,
    /// Planned value, absent when the object is being destroyed.
    pub after: Option<Value>,
}

impl AttributeChange {
    /// A change between two optional values.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// An attribute set for the first time.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// An attribute that goes away with its object.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// An attribute whose value changes.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self::new(path, Some(before), Some(after))
    }
}

impl From<AttributeChange> for crate::generated::AttributeChange {
    fn from(change: AttributeChange) -> Self {
        // Absent values travel as empty bytes.
        let encode = |value: Option<Value>| {
            value
                .and_then(|v| serde_json::to_vec(&v).ok())
                .unwrap_or_default()
        };

        Self {
            path: change.path,
            before: encode(change.before),
            after: encode(change.after),
        }
    }
}

/// Outcome of `Plan` for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// State the engine passes to Create or Update, or `null` for a destroy.
    pub planned_state: Value,
    /// Changed attributes in name order.
    pub changes: Vec<AttributeChange>,
    /// An identity attribute changed, so the object is dropped and recreated.
    pub requires_replace: bool,
}

impl PlanResult {
    /// Nothing to do; `state` is kept as is.
    pub fn no_change(state: Value) -> Self {
        Self::with_changes(state, Vec::new(), false)
    }

    /// A plan that applies `changes`.
    pub fn with_changes(
        planned_state: Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }

    /// Whether any attribute changes.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// State found by `ImportResourceState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// Resource type the state belongs to.
    pub resource_type: String,
    /// State as `Read` would return it.
    pub state: Value,
}

impl ImportedResource {
    /// Pair a state with its resource type.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Answer to `GetMetadata`: the type names without their schemas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// Resource type names, sorted.
    pub resources: Vec<String>,
    /// Data source type names, sorted.
    pub data_sources: Vec<String>,
    /// Optional protocol features the provider supports.
    pub capabilities: ServerCapabilities,
}

/// Optional protocol features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    /// `Plan` accepts a null proposed state and plans a destroy.
    pub plan_destroy: bool,
}

/// Version announced in the handshake line.
pub const PROTOCOL_VERSION: u32 = 1;

/// First field of the handshake line printed on stdout.
pub const HANDSHAKE_PREFIX: &str = "HEMMER_PROVIDER";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_change_constructors() {
        let added = AttributeChange::added("database", json!("analytics"));
        assert_eq!((added.before, added.after), (None, Some(json!("analytics"))));

        let removed = AttributeChange::removed("database", json!("analytics"));
        assert_eq!((removed.before, removed.after), (Some(json!("analytics")), None));

        let modified = AttributeChange::modified("password", json!("old"), json!("new"));
        assert_eq!(modified.before, Some(json!("old")));
        assert_eq!(modified.after, Some(json!("new")));
    }

    #[test]
    fn test_attribute_change_to_proto() {
        let proto: crate::generated::AttributeChange =
            AttributeChange::added("database", json!("analytics")).into();

        assert_eq!(proto.path, "database");
        assert!(proto.before.is_empty());
        assert_eq!(proto.after, b"\"analytics\"".to_vec());
    }

    #[test]
    fn test_plan_result() {
        let unchanged = PlanResult::no_change(json!({"database": "analytics"}));
        assert!(!unchanged.has_changes());
        assert!(!unchanged.requires_replace);

        let replace = PlanResult::with_changes(
            json!({"database": "events"}),
            vec![AttributeChange::modified("database", json!("analytics"), json!("events"))],
            true,
        );
        assert!(replace.has_changes());
        assert!(replace.requires_replace);
    }

    #[test]
    fn test_handshake_constants() {
        let line = format!("{}|{}|127.0.0.1:50051", HANDSHAKE_PREFIX, PROTOCOL_VERSION);
        assert_eq!(line, "HEMMER_PROVIDER|1|127.0.0.1:50051");
    }
}
