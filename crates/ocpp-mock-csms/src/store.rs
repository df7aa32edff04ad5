//! Operator-configured response overrides keyed by (identity, action)

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Key of a response override
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OverrideKey {
    /// Charge point identity
    pub identity: String,
    /// Action name
    pub action: String,
}

impl OverrideKey {
    pub fn new(identity: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            action: action.into(),
        }
    }
}

/// One configured override, in the shape the admin API exchanges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseOverride {
    #[serde(rename = "chargePointId")]
    pub identity: String,
    pub action: String,
    pub response: Value,
}

/// Store of response overrides consulted by the action handlers
///
/// Responses are opaque JSON; nothing here validates their shape.
#[derive(Debug, Default)]
pub struct ResponseStore {
    overrides: DashMap<OverrideKey, Value>,
}

impl ResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the override for `(identity, action)`
    pub fn set(&self, identity: &str, action: &str, response: Value) {
        debug!("Setting response override for {}/{}", identity, action);
        self.overrides
            .insert(OverrideKey::new(identity, action), response);
    }

    pub fn get(&self, identity: &str, action: &str) -> Option<Value> {
        self.overrides
            .get(&OverrideKey::new(identity, action))
            .map(|entry| entry.value().clone())
    }

    /// Remove the override; returns whether one existed
    pub fn delete(&self, identity: &str, action: &str) -> bool {
        debug!("Deleting response override for {}/{}", identity, action);
        self.overrides
            .remove(&OverrideKey::new(identity, action))
            .is_some()
    }

    pub fn list(&self) -> Vec<ResponseOverride> {
        self.overrides
            .iter()
            .map(|entry| ResponseOverride {
                identity: entry.key().identity.clone(),
                action: entry.key().action.clone(),
                response: entry.value().clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_twice_keeps_single_entry() {
        let store = ResponseStore::new();
        let response = json!({"status": "Rejected"});

        store.set("CP001", "Authorize", response.clone());
        store.set("CP001", "Authorize", response.clone());

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("CP001", "Authorize"), Some(response));

        assert!(store.delete("CP001", "Authorize"));
        assert_eq!(store.get("CP001", "Authorize"), None);
        assert!(!store.delete("CP001", "Authorize"));
    }

    #[test]
    fn test_set_replaces_previous_value() {
        let store = ResponseStore::new();
        store.set("CP001", "Heartbeat", json!({"currentTime": "a"}));
        store.set("CP001", "Heartbeat", json!({"currentTime": "b"}));

        assert_eq!(
            store.get("CP001", "Heartbeat"),
            Some(json!({"currentTime": "b"}))
        );
    }

    #[test]
    fn test_keys_are_scoped_by_identity() {
        let store = ResponseStore::new();
        store.set("CP001", "Heartbeat", json!({}));

        assert!(store.get("CP002", "Heartbeat").is_none());
        assert!(store.get("CP001", "BootNotification").is_none());
    }

    #[test]
    fn test_list_and_serialized_shape() {
        let store = ResponseStore::new();
        store.set("CP001", "DataTransfer", json!({"status": "Rejected"}));
        store.set("CP002", "Authorize", json!({"idTagInfo": {"status": "Blocked"}}));

        let mut all = store.list();
        all.sort_by(|a, b| a.identity.cmp(&b.identity));
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].action, "DataTransfer");

        let value = serde_json::to_value(&all[1]).unwrap();
        assert_eq!(
            value,
            json!({
                "chargePointId": "CP002",
                "action": "Authorize",
                "response": {"idTagInfo": {"status": "Blocked"}}
            })
        );
    }
}
