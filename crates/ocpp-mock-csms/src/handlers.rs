//! Mock handlers for Calls initiated by the charge point
//!
//! Each inbound action answers with the operator override for
//! `(identity, action)` when one is configured, and otherwise with a fixed
//! default payload. Request payloads are never validated.

use crate::{store::ResponseStore, CsmsError, CsmsResult};
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Heartbeat interval advertised in the default BootNotification response
pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 300;

macro_rules! ocpp_actions {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Every action in the set
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Action name as it appears in a Call frame
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = CsmsError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::ALL
                    .iter()
                    .copied()
                    .find(|action| action.as_str() == s)
                    .ok_or_else(|| CsmsError::UnsupportedAction {
                        action: s.to_string(),
                    })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

ocpp_actions! {
    /// Actions a charge point may call on the Central System
    InboundAction {
        BootNotification,
        Heartbeat,
        StatusNotification,
        Authorize,
        StartTransaction,
        StopTransaction,
        MeterValues,
        DiagnosticsStatusNotification,
        DataTransfer,
        FirmwareStatusNotification,
    }
}

ocpp_actions! {
    /// Actions the Central System may call on a charge point
    OutboundAction {
        RemoteStartTransaction,
        RemoteStopTransaction,
        UnlockConnector,
        Reset,
        ChangeConfiguration,
        GetConfiguration,
        ClearCache,
        ChangeAvailability,
        TriggerMessage,
        ReserveNow,
        CancelReservation,
        ClearChargingProfile,
        SetChargingProfile,
        GetCompositeSchedule,
        GetDiagnostics,
        GetLocalListVersion,
        SendLocalList,
        UpdateFirmware,
        DataTransfer,
    }
}

/// Handler set for every [`InboundAction`]
#[derive(Debug)]
pub struct ActionHandlers {
    store: Arc<ResponseStore>,
    heartbeat_interval: u64,
}

impl ActionHandlers {
    pub fn new(store: Arc<ResponseStore>) -> Self {
        Self {
            store,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    /// Override the interval advertised in BootNotification defaults
    pub fn with_heartbeat_interval(mut self, interval: u64) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Produce the response for an inbound Call
    pub async fn handle(
        &self,
        action: InboundAction,
        payload: &Value,
        identity: &str,
    ) -> CsmsResult<Value> {
        if let Some(response) = self.store.get(identity, action.as_str()) {
            debug!("Using configured response for {}/{}", identity, action);
            return Ok(response);
        }

        match action {
            InboundAction::BootNotification => {
                info!(
                    "Boot notification from {} ({}/{})",
                    identity,
                    payload_str(payload, "chargePointVendor"),
                    payload_str(payload, "chargePointModel")
                );
            }
            InboundAction::StartTransaction => {
                let connector_id = payload_field(payload, "connectorId");
                info!(
                    "Starting transaction for {} on connector {} with ID tag {}",
                    identity,
                    connector_id,
                    payload_str(payload, "idTag")
                );
            }
            InboundAction::StopTransaction => {
                let transaction_id = payload_field(payload, "transactionId");
                info!("Stopping transaction {} for {}", transaction_id, identity);
            }
            _ => debug!("{} from {}", action, identity),
        }

        Ok(self.default_response(action))
    }

    /// Built-in response used when no override is configured
    pub fn default_response(&self, action: InboundAction) -> Value {
        match action {
            InboundAction::BootNotification => json!({
                "status": "Accepted",
                "currentTime": now(),
                "interval": self.heartbeat_interval,
            }),
            InboundAction::Heartbeat => json!({ "currentTime": now() }),
            InboundAction::Authorize | InboundAction::StopTransaction => json!({
                "idTagInfo": { "status": "Accepted" },
            }),
            InboundAction::StartTransaction => json!({
                "transactionId": rand::thread_rng().gen_range(0..100_000),
                "idTagInfo": { "status": "Accepted" },
            }),
            InboundAction::DataTransfer => json!({ "status": "Accepted" }),
            InboundAction::StatusNotification
            | InboundAction::MeterValues
            | InboundAction::DiagnosticsStatusNotification
            | InboundAction::FirmwareStatusNotification => json!({}),
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn payload_field<'a>(payload: &'a Value, key: &str) -> &'a Value {
    static MISSING: Value = Value::Null;
    payload.get(key).unwrap_or(&MISSING)
}

fn payload_str<'a>(payload: &'a Value, key: &str) -> &'a str {
    payload.get(key).and_then(Value::as_str).unwrap_or("?")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handlers() -> (ActionHandlers, Arc<ResponseStore>) {
        let store = Arc::new(ResponseStore::new());
        (ActionHandlers::new(store.clone()), store)
    }

    fn parse_time(value: &Value) -> chrono::DateTime<Utc> {
        chrono::DateTime::parse_from_rfc3339(value.as_str().unwrap())
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_action_names_round_trip() {
        for action in InboundAction::ALL {
            assert_eq!(action.as_str().parse::<InboundAction>().unwrap(), *action);
        }
        for action in OutboundAction::ALL {
            assert_eq!(action.as_str().parse::<OutboundAction>().unwrap(), *action);
        }
        assert_eq!(InboundAction::ALL.len(), 10);
        assert_eq!(OutboundAction::ALL.len(), 19);
    }

    #[test]
    fn test_unknown_action_is_unsupported() {
        let err = "SignCertificate".parse::<InboundAction>().unwrap_err();
        assert_eq!(
            err,
            CsmsError::UnsupportedAction {
                action: "SignCertificate".to_string()
            }
        );
        assert!("BootNotification".parse::<OutboundAction>().is_err());
    }

    #[tokio::test]
    async fn test_boot_notification_default() {
        let (handlers, _) = handlers();
        let response = handlers
            .handle(
                InboundAction::BootNotification,
                &json!({"chargePointVendor": "V", "chargePointModel": "M"}),
                "CP001",
            )
            .await
            .unwrap();

        assert_eq!(response["status"], "Accepted");
        assert_eq!(response["interval"], 300);
        assert!((Utc::now() - parse_time(&response["currentTime"])).num_seconds().abs() < 5);
        assert_eq!(response.as_object().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_heartbeat_default() {
        let (handlers, _) = handlers();
        let response = handlers
            .handle(InboundAction::Heartbeat, &json!({}), "CP001")
            .await
            .unwrap();

        assert_eq!(response.as_object().unwrap().len(), 1);
        assert!((Utc::now() - parse_time(&response["currentTime"])).num_seconds().abs() < 5);
    }

    #[tokio::test]
    async fn test_fixed_defaults() {
        let (handlers, _) = handlers();
        let accepted_tag = json!({"idTagInfo": {"status": "Accepted"}});

        let cases = [
            (InboundAction::StatusNotification, json!({})),
            (InboundAction::Authorize, accepted_tag.clone()),
            (InboundAction::StopTransaction, accepted_tag),
            (InboundAction::MeterValues, json!({})),
            (InboundAction::DiagnosticsStatusNotification, json!({})),
            (InboundAction::DataTransfer, json!({"status": "Accepted"})),
            (InboundAction::FirmwareStatusNotification, json!({})),
        ];

        for (action, expected) in cases {
            let response = handlers.handle(action, &json!({}), "CP001").await.unwrap();
            assert_eq!(response, expected, "default for {action}");
        }
    }

    #[tokio::test]
    async fn test_start_transaction_default() {
        let (handlers, _) = handlers();
        let response = handlers
            .handle(
                InboundAction::StartTransaction,
                &json!({"connectorId": 1, "idTag": "TAG", "meterStart": 0}),
                "CP001",
            )
            .await
            .unwrap();

        let transaction_id = response["transactionId"].as_i64().unwrap();
        assert!((0..100_000).contains(&transaction_id));
        assert_eq!(response["idTagInfo"], json!({"status": "Accepted"}));
    }

    #[tokio::test]
    async fn test_override_wins_regardless_of_payload() {
        let (handlers, store) = handlers();
        let configured = json!({"currentTime": "2030-01-01T00:00:00Z"});
        store.set("CP001", "Heartbeat", configured.clone());

        for payload in [json!({}), json!({"garbage": [1, 2, 3]}), json!("not an object")] {
            let response = handlers
                .handle(InboundAction::Heartbeat, &payload, "CP001")
                .await
                .unwrap();
            assert_eq!(response, configured);
        }

        let other = handlers
            .handle(InboundAction::Heartbeat, &json!({}), "CP002")
            .await
            .unwrap();
        assert_ne!(other, configured);
    }

    #[tokio::test]
    async fn test_transaction_payload_fields_are_optional() {
        let (handlers, _) = handlers();
        for payload in [json!({}), json!(null), json!({"transactionId": 42})] {
            let start = handlers
                .handle(InboundAction::StartTransaction, &payload, "CP001")
                .await
                .unwrap();
            assert_eq!(start["idTagInfo"]["status"], "Accepted");

            let stop = handlers
                .handle(InboundAction::StopTransaction, &payload, "CP001")
                .await
                .unwrap();
            assert_eq!(stop, json!({"idTagInfo": {"status": "Accepted"}}));
        }
        assert_eq!(payload_field(&json!({"connectorId": 2}), "connectorId"), &json!(2));
        assert!(payload_field(&json!([1]), "connectorId").is_null());
    }

    #[tokio::test]
    async fn test_malformed_payload_still_gets_default() {
        let (handlers, _) = handlers();
        let response = handlers
            .handle(InboundAction::BootNotification, &json!([1, 2]), "CP001")
            .await
            .unwrap();
        assert_eq!(response["status"], "Accepted");
    }

    #[test]
    fn test_custom_heartbeat_interval() {
        let (handlers, _) = handlers();
        let handlers = handlers.with_heartbeat_interval(60);
        let response = handlers.default_response(InboundAction::BootNotification);
        assert_eq!(response["interval"], 60);
    }
}
