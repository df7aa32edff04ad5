//! Per-connection Call Dispatcher
//!
//! Decodes every text frame of one charge point connection, answers inbound
//! Calls through the [`ActionHandlers`], and routes CallResult/CallError
//! replies to the pending outbound call they answer.

use crate::{
    audit::{AuditEvent, AuditLog},
    connection::Connection,
    handlers::{ActionHandlers, InboundAction},
    metrics::MetricsRegistry,
    registry::ConnectionRegistry,
    CsmsResult,
};
use ocpp_types::{CallErrorCode, CallErrorMessage, CallMessage, CallResultMessage, Message};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Description sent with every ProtocolError reply
pub const INVALID_FORMAT_DESCRIPTION: &str = "Invalid message format";

/// Shared services a dispatcher works against
#[derive(Clone)]
pub struct DispatchContext {
    pub handlers: Arc<ActionHandlers>,
    pub registry: Arc<ConnectionRegistry>,
    pub audit: Arc<AuditLog>,
    pub metrics: Arc<MetricsRegistry>,
    /// Largest accepted text frame in bytes
    pub max_message_size: usize,
}

/// Frame router for a single connection
pub struct CallDispatcher {
    connection: Arc<Connection>,
    context: DispatchContext,
}

impl CallDispatcher {
    pub fn new(connection: Arc<Connection>, context: DispatchContext) -> Self {
        Self {
            connection,
            context,
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Register the connection and record its arrival
    pub fn on_open(&self) {
        let identity = self.connection.identity();
        self.context.registry.register(&self.connection);
        self.context.audit.append(AuditEvent::connect(identity));
        self.context
            .metrics
            .set_active_connections(self.context.registry.len() as i64);
        info!(
            "Charge point {} connected ({})",
            identity,
            self.connection
                .remote_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "unknown address".to_string())
        );
    }

    /// Process one raw text frame received from the charge point
    pub async fn handle_frame(&self, raw: &str) {
        self.context.metrics.record_frame_received();
        debug!("[{}] <- {}", self.connection.identity(), raw);

        if raw.len() > self.context.max_message_size {
            warn!(
                "[{}] frame of {} bytes exceeds limit of {} bytes",
                self.connection.identity(),
                raw.len(),
                self.context.max_message_size
            );
            self.reply_protocol_error();
            return;
        }

        let message = match Message::decode(raw) {
            Ok(message) => message,
            Err(err) => {
                warn!(
                    "[{}] malformed frame: {}",
                    self.connection.identity(),
                    err
                );
                self.reply_protocol_error();
                return;
            }
        };

        match message {
            Message::Call(call) => self.handle_call(call).await,
            Message::CallResult(result) => self.handle_call_result(result),
            Message::CallError(error) => self.handle_call_error(error),
        }
    }

    /// Fail pending calls, record the departure and drop the registry entry
    pub fn on_close(&self) {
        let identity = self.connection.identity();
        let rejected = self.connection.close();
        self.context.audit.append(AuditEvent::disconnect(identity));
        self.context
            .registry
            .unregister_connection(identity, self.connection.id());
        self.context
            .metrics
            .set_active_connections(self.context.registry.len() as i64);
        info!(
            "Charge point {} disconnected ({} pending call(s) rejected)",
            identity, rejected
        );
    }

    async fn handle_call(&self, call: CallMessage) {
        let started = Instant::now();
        let identity = self.connection.identity();
        let CallMessage {
            unique_id,
            action,
            payload,
        } = call;

        let outcome = self.answer(&action, &payload).await;
        let (reply, audit_response) = match outcome {
            Ok(response) => (
                Message::call_result(unique_id, response.clone()),
                response,
            ),
            Err(err) => {
                let code = err.call_error_code();
                let description = err.to_string();
                warn!("[{}] {} failed: {}", identity, action, description);
                (
                    Message::call_error(unique_id, code, description.clone()),
                    json!({
                        "errorCode": code.as_str(),
                        "errorDescription": description,
                    }),
                )
            }
        };

        self.context.audit.append(AuditEvent::inbound(
            identity,
            action,
            payload,
            Some(audit_response),
        ));
        self.send(&reply);
        self.context
            .metrics
            .record_call_handling_duration(started.elapsed().as_secs_f64());
    }

    async fn answer(&self, action: &str, payload: &Value) -> CsmsResult<Value> {
        let action: InboundAction = action.parse()?;
        self.context
            .handlers
            .handle(action, payload, self.connection.identity())
            .await
    }

    fn handle_call_result(&self, result: CallResultMessage) {
        if !self
            .connection
            .resolve_result(&result.unique_id, result.payload)
        {
            warn!(
                "[{}] ignoring CallResult for unknown message id {}",
                self.connection.identity(),
                result.unique_id
            );
        }
    }

    fn handle_call_error(&self, error: CallErrorMessage) {
        if !self.connection.resolve_error(
            &error.unique_id,
            &error.error_code,
            &error.error_description,
        ) {
            warn!(
                "[{}] ignoring CallError for unknown message id {}",
                self.connection.identity(),
                error.unique_id
            );
        }
    }

    fn reply_protocol_error(&self) {
        self.context.metrics.record_protocol_error();
        self.send(&Message::call_error(
            "",
            CallErrorCode::ProtocolError,
            INVALID_FORMAT_DESCRIPTION,
        ));
    }

    fn send(&self, message: &Message) {
        if let Err(err) = self.connection.send_frame(message) {
            debug!(
                "[{}] dropping reply {}: {}",
                self.connection.identity(),
                message.unique_id(),
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audit::LogKind, config::MetricsConfig, connection::DEFAULT_CALL_TIMEOUT,
        store::ResponseStore, CsmsError,
    };
    use tokio::sync::mpsc;

    struct Harness {
        dispatcher: CallDispatcher,
        frames: mpsc::UnboundedReceiver<String>,
        store: Arc<ResponseStore>,
        context: DispatchContext,
    }

    fn harness(identity: &str) -> Harness {
        let store = Arc::new(ResponseStore::new());
        let context = DispatchContext {
            handlers: Arc::new(ActionHandlers::new(store.clone())),
            registry: Arc::new(ConnectionRegistry::new()),
            audit: Arc::new(AuditLog::new(100)),
            metrics: Arc::new(MetricsRegistry::new(&MetricsConfig::default()).unwrap()),
            max_message_size: 1024,
        };
        let (connection, frames) = Connection::new(identity, None, DEFAULT_CALL_TIMEOUT);
        let dispatcher = CallDispatcher::new(Arc::new(connection), context.clone());
        dispatcher.on_open();
        Harness {
            dispatcher,
            frames,
            store,
            context,
        }
    }

    impl Harness {
        async fn exchange(&mut self, raw: &str) -> Message {
            self.dispatcher.handle_frame(raw).await;
            let text = self.frames.try_recv().expect("reply written");
            Message::decode(&text).unwrap()
        }
    }

    fn expect_error(message: Message) -> CallErrorMessage {
        match message {
            Message::CallError(error) => error,
            other => panic!("Expected CallError, got {other:?}"),
        }
    }

    fn expect_result(message: Message) -> CallResultMessage {
        match message {
            Message::CallResult(result) => result,
            other => panic!("Expected CallResult, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_boot_notification_round_trip() {
        let mut h = harness("CP001");
        let reply = h
            .exchange(r#"[2,"1","BootNotification",{"chargePointVendor":"V","chargePointModel":"M"}]"#)
            .await;

        let result = expect_result(reply);
        assert_eq!(result.unique_id, "1");
        assert_eq!(result.payload["status"], "Accepted");
        assert_eq!(result.payload["interval"], 300);
        assert!(result.payload["currentTime"].is_string());

        let inbound: Vec<_> = h
            .context
            .audit
            .recent(10)
            .into_iter()
            .filter(|entry| entry.kind == LogKind::Inbound)
            .collect();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].identity, "CP001");
        assert_eq!(inbound[0].action.as_deref(), Some("BootNotification"));
        assert_eq!(inbound[0].response_payload, Some(result.payload));
    }

    #[tokio::test]
    async fn test_override_is_returned_verbatim() {
        let mut h = harness("CP001");
        let configured = json!({"currentTime": "2030-01-01T00:00:00Z"});
        h.store.set("CP001", "Heartbeat", configured.clone());

        let result = expect_result(h.exchange(r#"[2,"hb-1","Heartbeat",{}]"#).await);
        assert_eq!(result.payload, configured);
    }

    #[tokio::test]
    async fn test_unsupported_action_gets_not_implemented() {
        let mut h = harness("CP001");
        let error = expect_error(h.exchange(r#"[2,"7","SignCertificate",{}]"#).await);

        assert_eq!(error.unique_id, "7");
        assert_eq!(error.code(), Some(CallErrorCode::NotImplemented));
        assert_eq!(error.error_description, "Action SignCertificate not supported");

        let entries = h.context.audit.recent(1);
        let entry = &entries[0];
        assert_eq!(entry.kind, LogKind::Inbound);
        assert_eq!(
            entry.response_payload.as_ref().unwrap()["errorCode"],
            "NotImplemented"
        );
    }

    #[tokio::test]
    async fn test_malformed_frames_get_protocol_error() {
        let mut h = harness("CP001");
        for raw in [
            "not json",
            r#"{"a":1}"#,
            r#"[9,"1","Heartbeat",{}]"#,
            r#"[2,"1","Heartbeat"]"#,
            r#"[3,"1"]"#,
        ] {
            let error = expect_error(h.exchange(raw).await);
            assert_eq!(error.unique_id, "");
            assert_eq!(error.code(), Some(CallErrorCode::ProtocolError));
            assert_eq!(error.error_description, INVALID_FORMAT_DESCRIPTION);
        }
        assert!(h.dispatcher.connection().is_open());
    }

    #[tokio::test]
    async fn test_oversized_frame_gets_protocol_error() {
        let mut h = harness("CP001");
        let raw = format!(r#"[2,"1","DataTransfer",{{"data":"{}"}}]"#, "x".repeat(2048));
        let error = expect_error(h.exchange(&raw).await);
        assert_eq!(error.code(), Some(CallErrorCode::ProtocolError));
    }

    #[tokio::test]
    async fn test_call_result_resolves_outbound_call() {
        let mut h = harness("CP001");
        let connection = h.dispatcher.connection().clone();

        let caller = tokio::spawn(async move {
            connection
                .send_call(
                    "RemoteStartTransaction",
                    json!({"connectorId": 1, "idTag": "TEST123"}),
                )
                .await
        });

        let sent = Message::decode(&h.frames.recv().await.unwrap()).unwrap();
        let reply = format!(r#"[3,"{}",{{"status":"Accepted"}}]"#, sent.unique_id());
        h.dispatcher.handle_frame(&reply).await;

        assert_eq!(caller.await.unwrap(), Ok(json!({"status": "Accepted"})));
        assert!(h.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_call_error_rejects_outbound_call() {
        let mut h = harness("CP001");
        let connection = h.dispatcher.connection().clone();

        let caller =
            tokio::spawn(async move { connection.send_call("UnlockConnector", json!({"connectorId": 1})).await });

        let sent = Message::decode(&h.frames.recv().await.unwrap()).unwrap();
        let reply = format!(
            r#"[4,"{}","NotSupported","connector locked",{{}}]"#,
            sent.unique_id()
        );
        h.dispatcher.handle_frame(&reply).await;

        assert_eq!(
            caller.await.unwrap(),
            Err(CsmsError::CallError {
                code: "NotSupported".to_string(),
                description: "connector locked".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_unmatched_reply_is_ignored() {
        let mut h = harness("CP001");
        h.dispatcher
            .handle_frame(r#"[3,"nobody-asked",{"status":"Accepted"}]"#)
            .await;
        h.dispatcher
            .handle_frame(r#"[4,"nobody-asked","GenericError","",{}]"#)
            .await;

        assert!(h.frames.try_recv().is_err());
        assert!(h.dispatcher.connection().is_open());
    }

    #[tokio::test]
    async fn test_open_and_close_lifecycle() {
        let h = harness("CP001");
        assert!(h.context.registry.lookup("CP001").is_some());

        let connection = h.dispatcher.connection().clone();
        let caller = tokio::spawn(async move { connection.send_call("ClearCache", json!({})).await });
        tokio::task::yield_now().await;
        while h.dispatcher.connection().pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        h.dispatcher.on_close();

        assert!(matches!(
            caller.await.unwrap(),
            Err(CsmsError::ConnectionClosed { .. })
        ));
        assert!(h.context.registry.lookup("CP001").is_none());

        let kinds: Vec<_> = h
            .context
            .audit
            .recent(10)
            .into_iter()
            .map(|entry| entry.kind)
            .collect();
        assert_eq!(kinds, vec![LogKind::Disconnect, LogKind::Connect]);
    }
}
