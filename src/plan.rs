//! Schema-driven planning.
//!
//! Compares prior and proposed records attribute by attribute. A change to
//! any `force_new` attribute means the entity has to be destroyed and
//! created again; ClickHouse databases and users cannot be renamed in place.

use serde_json::Value;

use crate::schema::Schema;
use crate::types::{AttributeChange, PlanResult};

/// Placeholder shown instead of sensitive values in plan changes.
pub const REDACTED: &str = "(sensitive value)";

/// Plan the transition from `prior` to `proposed` for a resource.
///
/// - No prior state: every non-null proposed attribute is added.
/// - Null proposed state: every prior attribute is removed.
/// - Otherwise each differing attribute is modified, and the plan requires
///   replacement if any of them is `force_new`.
pub fn plan(schema: &Schema, prior: Option<&Value>, proposed: &Value) -> PlanResult {
    match prior {
        None => plan_create(schema, proposed),
        Some(prior) if proposed.is_null() => plan_destroy(schema, prior),
        Some(prior) => plan_update(schema, prior, proposed),
    }
}

fn plan_create(schema: &Schema, proposed: &Value) -> PlanResult {
    let changes = schema
        .block
        .attributes
        .iter()
        .filter_map(|(name, attr)| {
            present(proposed, name)
                .map(|v| AttributeChange::added(name.as_str(), display(v, attr.flags.sensitive)))
        })
        .collect();

    PlanResult::with_changes(proposed.clone(), changes, false)
}

fn plan_destroy(schema: &Schema, prior: &Value) -> PlanResult {
    let changes = schema
        .block
        .attributes
        .iter()
        .filter_map(|(name, attr)| {
            present(prior, name)
                .map(|v| AttributeChange::removed(name.as_str(), display(v, attr.flags.sensitive)))
        })
        .collect();

    PlanResult::with_changes(Value::Null, changes, false)
}

fn plan_update(schema: &Schema, prior: &Value, proposed: &Value) -> PlanResult {
    let mut changes = Vec::new();
    let mut requires_replace = false;

    for (name, attr) in &schema.block.attributes {
        let before = present(prior, name);
        let after = present(proposed, name);
        if before == after {
            continue;
        }

        requires_replace |= attr.force_new;
        let sensitive = attr.flags.sensitive;
        changes.push(AttributeChange::new(
            name.as_str(),
            before.map(|v| display(v, sensitive)),
            after.map(|v| display(v, sensitive)),
        ));
    }

    if changes.is_empty() {
        PlanResult::no_change(prior.clone())
    } else {
        PlanResult::with_changes(proposed.clone(), changes, requires_replace)
    }
}

fn present<'a>(record: &'a Value, name: &str) -> Option<&'a Value> {
    record.get(name).filter(|v| !v.is_null())
}

fn display(value: &Value, sensitive: bool) -> Value {
    if sensitive {
        Value::String(REDACTED.to_string())
    } else {
        value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;
    use serde_json::json;

    fn user_schema() -> Schema {
        Schema::v0()
            .with_attribute("username", Attribute::required_string().with_force_new())
            .with_attribute("password", Attribute::required_string().sensitive())
    }

    #[test]
    fn test_plan_create() {
        let proposed = json!({"username": "alice", "password": "s3cret"});
        let result = plan(&user_schema(), None, &proposed);

        assert_eq!(result.planned_state, proposed);
        assert_eq!(result.changes.len(), 2);
        assert!(!result.requires_replace);
        assert!(result.changes.iter().all(|c| c.before.is_none()));
    }

    #[test]
    fn test_plan_create_redacts_sensitive_values() {
        let proposed = json!({"username": "alice", "password": "s3cret"});
        let result = plan(&user_schema(), None, &proposed);

        let password = result
            .changes
            .iter()
            .find(|c| c.path == "password")
            .unwrap();
        assert_eq!(password.after, Some(json!(REDACTED)));
    }

    #[test]
    fn test_plan_no_change() {
        let state = json!({"username": "alice", "password": "s3cret"});
        let result = plan(&user_schema(), Some(&state), &state);

        assert!(!result.has_changes());
        assert_eq!(result.planned_state, state);
    }

    #[test]
    fn test_plan_password_change_updates_in_place() {
        let prior = json!({"username": "alice", "password": "old"});
        let proposed = json!({"username": "alice", "password": "new"});
        let result = plan(&user_schema(), Some(&prior), &proposed);

        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].path, "password");
        assert!(!result.requires_replace);
    }

    #[test]
    fn test_plan_identity_change_requires_replace() {
        let prior = json!({"username": "alice", "password": "pw"});
        let proposed = json!({"username": "bob", "password": "pw"});
        let result = plan(&user_schema(), Some(&prior), &proposed);

        assert!(result.requires_replace);
        assert_eq!(result.changes[0].before, Some(json!("alice")));
        assert_eq!(result.changes[0].after, Some(json!("bob")));
    }

    #[test]
    fn test_plan_destroy() {
        let prior = json!({"username": "alice", "password": "pw"});
        let result = plan(&user_schema(), Some(&prior), &Value::Null);

        assert!(result.planned_state.is_null());
        assert_eq!(result.changes.len(), 2);
        assert!(result.changes.iter().all(|c| c.after.is_none()));
    }
}
