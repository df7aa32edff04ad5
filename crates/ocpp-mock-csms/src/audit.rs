//! Bounded, append-only log of observed charge point traffic

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use uuid::Uuid;

/// Default number of retained entries
pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;

/// Kind of observed event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogKind {
    #[serde(rename = "CONNECT")]
    Connect,
    #[serde(rename = "DISCONNECT")]
    Disconnect,
    /// Call received from the charge point
    #[serde(rename = "IN")]
    Inbound,
    /// Call sent to the charge point
    #[serde(rename = "OUT")]
    Outbound,
}

/// Event to record; id and timestamp are assigned on append
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub identity: String,
    pub kind: LogKind,
    pub action: Option<String>,
    pub request: Option<Value>,
    pub response: Option<Value>,
}

impl AuditEvent {
    pub fn connect(identity: impl Into<String>) -> Self {
        Self::lifecycle(identity, LogKind::Connect)
    }

    pub fn disconnect(identity: impl Into<String>) -> Self {
        Self::lifecycle(identity, LogKind::Disconnect)
    }

    pub fn inbound(
        identity: impl Into<String>,
        action: impl Into<String>,
        request: Value,
        response: Option<Value>,
    ) -> Self {
        Self {
            identity: identity.into(),
            kind: LogKind::Inbound,
            action: Some(action.into()),
            request: Some(request),
            response,
        }
    }

    pub fn outbound(
        identity: impl Into<String>,
        action: impl Into<String>,
        request: Value,
        response: Option<Value>,
    ) -> Self {
        Self {
            identity: identity.into(),
            kind: LogKind::Outbound,
            action: Some(action.into()),
            request: Some(request),
            response,
        }
    }

    fn lifecycle(identity: impl Into<String>, kind: LogKind) -> Self {
        Self {
            identity: identity.into(),
            kind,
            action: None,
            request: None,
            response: None,
        }
    }
}

/// Immutable record of one observed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    #[serde(rename = "chargePointId")]
    pub identity: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub action: Option<String>,
    #[serde(rename = "payload")]
    pub request_payload: Option<Value>,
    #[serde(rename = "response")]
    pub response_payload: Option<Value>,
}

/// FIFO ring of the most recent log entries
#[derive(Debug)]
pub struct AuditLog {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record an event, evicting the oldest entries past capacity
    pub fn append(&self, event: AuditEvent) -> LogEntry {
        let entry = LogEntry {
            id: Uuid::new_v4().to_string(),
            identity: event.identity,
            timestamp: Utc::now(),
            kind: event.kind,
            action: event.action,
            request_payload: event.request,
            response_payload: event.response,
        };

        let mut entries = self.entries.lock();
        entries.push_back(entry.clone());
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        entry
    }

    /// Up to `limit` entries, most recent first
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_assigns_id_and_timestamp() {
        let log = AuditLog::default();
        let a = log.append(AuditEvent::connect("CP001"));
        let b = log.append(AuditEvent::connect("CP001"));

        assert_ne!(a.id, b.id);
        assert!(b.timestamp >= a.timestamp);
        assert_eq!(a.kind, LogKind::Connect);
        assert!(a.action.is_none());
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let log = AuditLog::new(3);
        for i in 0..5 {
            log.append(AuditEvent::inbound("CP001", format!("A{i}"), json!({}), None));
        }

        assert_eq!(log.len(), 3);
        let actions: Vec<_> = log
            .recent(10)
            .into_iter()
            .map(|entry| entry.action.unwrap())
            .collect();
        assert_eq!(actions, vec!["A4", "A3", "A2"]);
    }

    #[test]
    fn test_recent_is_limited_and_newest_first() {
        let log = AuditLog::new(10);
        log.append(AuditEvent::connect("CP001"));
        log.append(AuditEvent::inbound("CP001", "Heartbeat", json!({}), Some(json!({}))));
        log.append(AuditEvent::disconnect("CP001"));

        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, LogKind::Disconnect);
        assert_eq!(recent[1].kind, LogKind::Inbound);
        assert!(log.recent(0).is_empty());
    }

    #[test]
    fn test_clear() {
        let log = AuditLog::new(10);
        log.append(AuditEvent::connect("CP001"));
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_entry_serialized_shape() {
        let log = AuditLog::new(10);
        let entry = log.append(AuditEvent::outbound(
            "CP001",
            "Reset",
            json!({"type": "Soft"}),
            Some(json!({"status": "Accepted"})),
        ));

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["chargePointId"], "CP001");
        assert_eq!(value["type"], "OUT");
        assert_eq!(value["action"], "Reset");
        assert_eq!(value["payload"], json!({"type": "Soft"}));
        assert_eq!(value["response"], json!({"status": "Accepted"}));
    }
}
