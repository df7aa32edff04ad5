//! WebSocket listener for charge points and the admin HTTP API

use crate::{
    connection::Connection,
    dispatcher::CallDispatcher,
    handlers::OutboundAction,
    store::ResponseOverride,
    Csms, CsmsError, CsmsResult,
};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        ConnectInfo, Path, Query, State, WebSocketUpgrade,
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

/// Identity assigned when the connection path has no usable segment
pub const UNKNOWN_IDENTITY: &str = "UNKNOWN";

/// Derive the charge point identity from the last segment of a request path
pub fn identity_from_path(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(UNKNOWN_IDENTITY)
        .to_string()
}

/// Serve both listeners until one of them fails
pub async fn serve(
    websocket_listener: TcpListener,
    http_listener: TcpListener,
    csms: Csms,
) -> CsmsResult<()> {
    tokio::select! {
        result = serve_websocket(websocket_listener, csms.clone()) => {
            error!("WebSocket server exited: {:?}", result);
            result
        }
        result = serve_admin(http_listener, csms) => {
            error!("Admin HTTP server exited: {:?}", result);
            result
        }
    }
}

/// Accept charge point connections on any path
pub async fn serve_websocket(listener: TcpListener, csms: Csms) -> CsmsResult<()> {
    info!(
        "OCPP WebSocket server listening on {}",
        listener.local_addr()?
    );

    let app = websocket_router(csms);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| CsmsError::Transport {
        message: format!("WebSocket server error: {}", e),
    })
}

/// Serve the admin HTTP API
pub async fn serve_admin(listener: TcpListener, csms: Csms) -> CsmsResult<()> {
    info!("Admin HTTP API listening on {}", listener.local_addr()?);

    axum::serve(listener, admin_router(csms).into_make_service())
        .await
        .map_err(|e| CsmsError::Transport {
            message: format!("Admin HTTP server error: {}", e),
        })
}

pub fn websocket_router(csms: Csms) -> Router {
    Router::new().fallback(ws_handler).with_state(csms)
}

pub fn admin_router(csms: Csms) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/connections", get(list_connections))
        .route("/api/logs", get(list_logs).delete(clear_logs))
        .route(
            "/api/config",
            get(list_overrides)
                .post(set_override)
                .delete(delete_override),
        )
        .route("/api/send/:action", axum::routing::post(send_command))
        .layer(CorsLayer::permissive())
        .with_state(csms)
}

/// WebSocket upgrade handler for charge point connections
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(csms): State<Csms>,
    uri: Uri,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let identity = identity_from_path(uri.path());
    info!(
        "WebSocket upgrade request from {} for charge point {}",
        addr, identity
    );

    let max_connections = csms.config().server.max_connections;
    let protocols = csms.config().ocpp.sub_protocols.clone();
    let Some(slot) = ConnectionSlot::acquire(csms.sessions(), max_connections) else {
        warn!(
            "Connection limit reached, rejecting connection from {}",
            addr
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
    };

    ws.protocols(protocols)
        .on_upgrade(move |socket| handle_socket(socket, csms, identity, addr, slot))
}

/// Reservation against `server.max_connections`, held for a whole session
///
/// Taken before the upgrade is accepted, so concurrent handshakes cannot
/// overshoot the limit. Released when dropped, including when the upgrade
/// never completes.
struct ConnectionSlot {
    sessions: Arc<AtomicUsize>,
}

impl ConnectionSlot {
    fn acquire(sessions: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        sessions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < limit).then_some(active + 1)
            })
            .ok()?;
        Some(Self {
            sessions: sessions.clone(),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.sessions.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Drive one charge point session until the socket closes
async fn handle_socket(
    socket: WebSocket,
    csms: Csms,
    identity: String,
    addr: SocketAddr,
    _slot: ConnectionSlot,
) {
    let (connection, mut outbound) =
        Connection::new(identity, Some(addr), csms.config().ocpp.call_timeout());
    let dispatcher = CallDispatcher::new(Arc::new(connection), csms.dispatch_context());
    dispatcher.on_open();

    let (mut sender, mut receiver) = socket.split();

    let metrics = csms.metrics();
    let writer_identity = dispatcher.connection().identity().to_string();
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if let Err(e) = sender.send(WsMessage::Text(text)).await {
                debug!("[{}] write failed: {}", writer_identity, e);
                break;
            }
            metrics.record_frame_sent();
        }
        let _ = sender.close().await;
    });

    // Runs on every exit path, including a panic inside a handler
    let dispatcher = scopeguard::guard(dispatcher, |dispatcher| dispatcher.on_close());

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => dispatcher.handle_frame(&text).await,
            Ok(WsMessage::Binary(data)) => {
                warn!(
                    "[{}] ignoring binary frame of {} bytes",
                    dispatcher.connection().identity(),
                    data.len()
                );
            }
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
            Ok(WsMessage::Close(frame)) => {
                debug!(
                    "[{}] close frame: {:?}",
                    dispatcher.connection().identity(),
                    frame
                );
                break;
            }
            Err(e) => {
                error!(
                    "[{}] WebSocket error: {}",
                    dispatcher.connection().identity(),
                    e
                );
                break;
            }
        }
    }

    drop(dispatcher);
    // Connection is gone once the dispatcher drops, which ends the writer
    if let Err(e) = writer.await {
        debug!("Writer task ended abnormally: {}", e);
    }
}

impl CsmsError {
    /// HTTP status used when the admin API reports this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            CsmsError::NotConnected { .. } => StatusCode::NOT_FOUND,
            CsmsError::Validation { .. } | CsmsError::UnsupportedAction { .. } => {
                StatusCode::BAD_REQUEST
            }
            CsmsError::RequestTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CsmsError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn health_handler(State(csms): State<Csms>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": csms.registry().len(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn metrics_handler(State(csms): State<Csms>) -> Response {
    csms.metrics()
        .update_uptime(csms.stats().uptime.as_secs_f64());
    match csms.metrics().encode_text() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            e.into_response()
        }
    }
}

async fn list_connections(State(csms): State<Csms>) -> impl IntoResponse {
    Json(json!({ "connections": csms.registry().list_identities() }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

async fn list_logs(State(csms): State<Csms>, Query(query): Query<LogsQuery>) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(csms.config().audit.default_limit);
    Json(json!({ "logs": csms.audit().recent(limit) }))
}

async fn clear_logs(State(csms): State<Csms>) -> impl IntoResponse {
    csms.audit().clear();
    info!("Audit log cleared");
    Json(json!({ "success": true }))
}

async fn list_overrides(State(csms): State<Csms>) -> impl IntoResponse {
    Json(json!({ "configs": csms.store().list() }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverrideRequest {
    charge_point_id: Option<String>,
    action: Option<String>,
    response: Option<Value>,
}

async fn set_override(
    State(csms): State<Csms>,
    Json(request): Json<OverrideRequest>,
) -> Result<Json<Value>, CsmsError> {
    let (Some(identity), Some(action), Some(response)) =
        (request.charge_point_id, request.action, request.response)
    else {
        return Err(missing_fields("chargePointId, action and response"));
    };

    let entry = ResponseOverride {
        identity,
        action,
        response,
    };
    csms.store()
        .set(&entry.identity, &entry.action, entry.response.clone());
    info!("Response override set for {}/{}", entry.identity, entry.action);
    Ok(Json(json!({ "success": true, "config": entry })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverrideKeyRequest {
    charge_point_id: Option<String>,
    action: Option<String>,
}

async fn delete_override(
    State(csms): State<Csms>,
    Json(request): Json<OverrideKeyRequest>,
) -> Result<Json<Value>, CsmsError> {
    let (Some(identity), Some(action)) = (request.charge_point_id, request.action) else {
        return Err(missing_fields("chargePointId and action"));
    };

    let deleted = csms.store().delete(&identity, &action);
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest {
    charge_point_id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

async fn send_command(
    State(csms): State<Csms>,
    Path(action): Path<String>,
    Json(request): Json<SendRequest>,
) -> Result<Json<Value>, CsmsError> {
    let action: OutboundAction = action.parse()?;
    let identity = request
        .charge_point_id
        .ok_or_else(|| missing_fields("chargePointId"))?;
    let payload = request.payload.unwrap_or_else(|| json!({}));

    // Runs detached so a dropped HTTP request still settles and audits the call
    let response = tokio::spawn(async move { csms.send_command(&identity, action, payload).await })
        .await
        .map_err(|e| CsmsError::Internal {
            message: format!("Outbound call task failed: {}", e),
        })??;
    Ok(Json(json!({ "success": true, "response": response })))
}

fn missing_fields(fields: &str) -> CsmsError {
    CsmsError::Validation {
        message: format!("Missing required fields: {}", fields),
    }
}
