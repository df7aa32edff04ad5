//! # OCPP 1.6J Mock Central System
//!
//! A mock Central System (CSMS) for exercising charge point simulators. Charge
//! points connect over WebSocket (sub-protocol `ocpp1.6`) and every Call they
//! send is answered either with an operator-configured override or with a
//! fixed default response. The Central System can also call a connected
//! charge point and await the correlated reply.
//!
//! ## Features
//!
//! - **Call Dispatcher**: per-connection frame routing with strict in-order processing
//! - **Outbound Calls**: message-id correlation with timeout and close handling
//! - **Response Overrides**: per charge point, per action mock responses
//! - **Audit Log**: bounded history of connects, disconnects and calls
//! - **Admin API**: HTTP endpoints over logs, overrides and outbound commands
//! - **Metrics**: Prometheus counters and gauges

pub mod audit;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod store;

pub use error::*;

use audit::{AuditEvent, AuditLog};
use config::Config;
use dispatcher::DispatchContext;
use handlers::{ActionHandlers, OutboundAction};
use metrics::MetricsRegistry;
use registry::ConnectionRegistry;
use serde_json::Value;
use std::{
    sync::{atomic::AtomicUsize, Arc},
    time::Instant,
};
use store::ResponseStore;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Mock Central System and the services it is built from
///
/// Cloning is cheap; every clone shares the same services.
#[derive(Clone)]
pub struct Csms {
    config: Arc<Config>,
    store: Arc<ResponseStore>,
    registry: Arc<ConnectionRegistry>,
    audit: Arc<AuditLog>,
    handlers: Arc<ActionHandlers>,
    metrics: Arc<MetricsRegistry>,
    /// WebSocket sessions admitted and not yet finished
    sessions: Arc<AtomicUsize>,
    started_at: Instant,
}

impl Csms {
    /// Build a fresh set of services from configuration
    pub fn new(config: Config) -> CsmsResult<Self> {
        config::validate_config(&config)
            .map_err(|message| CsmsError::Configuration { message })?;

        info!("Initializing OCPP mock CSMS");

        let store = Arc::new(ResponseStore::new());
        let handlers = Arc::new(
            ActionHandlers::new(store.clone()).with_heartbeat_interval(config.ocpp.heartbeat_interval),
        );
        let metrics = Arc::new(MetricsRegistry::new(&config.metrics)?);

        Ok(Self {
            store,
            registry: Arc::new(ConnectionRegistry::new()),
            audit: Arc::new(AuditLog::new(config.audit.capacity)),
            handlers,
            metrics,
            sessions: Arc::new(AtomicUsize::new(0)),
            config: Arc::new(config),
            started_at: Instant::now(),
        })
    }

    /// Bind both configured listeners and serve until one fails
    pub async fn run(self) -> CsmsResult<()> {
        let websocket_listener = TcpListener::bind(self.config.server.websocket_addr())
            .await
            .map_err(|e| CsmsError::Transport {
                message: format!(
                    "Failed to bind WebSocket server on {}: {}",
                    self.config.server.websocket_addr(),
                    e
                ),
            })?;
        let http_listener = TcpListener::bind(self.config.server.http_addr())
            .await
            .map_err(|e| CsmsError::Transport {
                message: format!(
                    "Failed to bind admin HTTP server on {}: {}",
                    self.config.server.http_addr(),
                    e
                ),
            })?;

        self.serve(websocket_listener, http_listener).await
    }

    /// Serve on listeners the caller already bound
    pub async fn serve(
        self,
        websocket_listener: TcpListener,
        http_listener: TcpListener,
    ) -> CsmsResult<()> {
        server::serve(websocket_listener, http_listener, self).await
    }

    /// Call a connected charge point and wait for its reply
    ///
    /// Fails immediately with [`CsmsError::NotConnected`] when no live
    /// connection is registered for `identity`; nothing is audited then.
    pub async fn send_command(
        &self,
        identity: &str,
        action: OutboundAction,
        payload: Value,
    ) -> CsmsResult<Value> {
        let connection = self.registry.lookup(identity).ok_or_else(|| {
            self.metrics.record_outbound_outcome("not_connected");
            CsmsError::NotConnected {
                identity: identity.to_string(),
            }
        })?;

        debug!("Sending {} to {}", action, identity);
        self.metrics.inc_pending_calls();
        let pending = scopeguard::guard(self.metrics.clone(), |metrics| {
            metrics.dec_pending_calls();
        });
        let result = connection
            .send_call(action.as_str(), payload.clone())
            .await;
        drop(pending);

        match &result {
            Ok(_) => {
                self.metrics.record_outbound_outcome("accepted");
                info!("{} to {} answered", action, identity);
            }
            Err(err) => {
                self.metrics.record_outbound_outcome(err.outcome());
                warn!("{} to {} failed: {}", action, identity, err);
            }
        }

        self.audit.append(AuditEvent::outbound(
            identity,
            action.as_str(),
            payload,
            result.as_ref().ok().cloned(),
        ));
        result
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<ResponseStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn audit(&self) -> Arc<AuditLog> {
        self.audit.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.metrics.clone()
    }

    pub(crate) fn sessions(&self) -> &Arc<AtomicUsize> {
        &self.sessions
    }

    /// Services handed to each connection's dispatcher
    pub fn dispatch_context(&self) -> DispatchContext {
        DispatchContext {
            handlers: self.handlers.clone(),
            registry: self.registry.clone(),
            audit: self.audit.clone(),
            metrics: self.metrics.clone(),
            max_message_size: self.config.ocpp.max_message_size,
        }
    }

    pub fn stats(&self) -> CsmsStats {
        CsmsStats {
            connected_charge_points: self.registry.len(),
            response_overrides: self.store.len(),
            audit_entries: self.audit.len(),
            uptime: self.started_at.elapsed(),
            metrics_collected: self.metrics.get_stats().metrics_count,
        }
    }
}

/// CSMS statistics
#[derive(Debug, Clone)]
pub struct CsmsStats {
    pub connected_charge_points: usize,
    pub response_overrides: usize,
    pub audit_entries: usize,
    pub uptime: std::time::Duration,
    /// Number of metric families exported
    pub metrics_collected: usize,
}

/// Utility functions
pub mod utils {
    use crate::{config::LoggingConfig, CsmsError, CsmsResult};
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    /// Initialize tracing; `RUST_LOG` takes precedence over the configured level
    pub fn init_tracing(logging: &LoggingConfig) -> CsmsResult<()> {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "ocpp_mock_csms={level},ocpp_types={level}",
                level = logging.level
            ))
        });
        let registry = tracing_subscriber::registry().with(filter);

        let result = match logging.format.as_str() {
            "json" => registry.with(fmt::layer().json()).try_init(),
            "compact" => registry.with(fmt::layer().compact()).try_init(),
            _ => registry.with(fmt::layer().pretty()).try_init(),
        };

        result.map_err(|e| CsmsError::Configuration {
            message: format!("Failed to initialize tracing: {}", e),
        })
    }
}
