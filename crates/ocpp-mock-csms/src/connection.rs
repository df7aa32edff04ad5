//! Live charge point connection and its outbound pending-call table
//!
//! A [`Connection`] is created when a WebSocket upgrade completes and is
//! dropped when the socket closes. It owns the sending half of the socket
//! (an unbounded channel drained by a writer task) and the table of
//! server-initiated calls that are waiting for a `CallResult`/`CallError`.
//!
//! Every pending call settles exactly once. Whoever removes the entry from
//! the table under the lock (reply, timeout, or close) is the one that
//! settles it; everyone else finds the entry gone and backs off.

use crate::{CsmsError, CsmsResult};
use chrono::{DateTime, Utc};
use ocpp_types::{CallMessage, Message};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default time an outbound call waits for its reply
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Frames flow in both directions
    Open,
    /// Pending calls are being failed
    Closing,
    /// Terminal
    Closed,
}

/// One outstanding server-initiated request
#[derive(Debug)]
pub struct PendingCall {
    /// Action of the original Call
    pub action: String,
    /// When the Call was handed to the transport
    pub sent_at: Instant,
    responder: oneshot::Sender<CsmsResult<Value>>,
}

impl PendingCall {
    fn settle(self, result: CsmsResult<Value>) {
        // The caller may have given up already; nothing to deliver then
        let _ = self.responder.send(result);
    }
}

#[derive(Debug)]
struct ConnectionInner {
    state: ConnectionState,
    pending: HashMap<String, PendingCall>,
}

/// A charge point session
#[derive(Debug)]
pub struct Connection {
    id: Uuid,
    identity: String,
    remote_addr: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
    call_timeout: Duration,
    outbound: mpsc::UnboundedSender<String>,
    inner: Mutex<ConnectionInner>,
}

impl Connection {
    /// Create a connection; the receiver yields every text frame to write to the socket
    pub fn new(
        identity: impl Into<String>,
        remote_addr: Option<SocketAddr>,
        call_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let connection = Self {
            id: Uuid::new_v4(),
            identity: identity.into(),
            remote_addr,
            connected_at: Utc::now(),
            call_timeout,
            outbound,
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Open,
                pending: HashMap::new(),
            }),
        };
        (connection, outbound_rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Number of outbound calls awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Queue a frame for the writer task
    pub fn send_frame(&self, message: &Message) -> CsmsResult<()> {
        let text = message.encode();
        debug!("[{}] -> {}", self.identity, text);
        self.outbound
            .send(text)
            .map_err(|_| CsmsError::ConnectionClosed {
                identity: self.identity.clone(),
            })
    }

    /// Send a Call to the charge point and wait for the matching reply
    ///
    /// Resolves with the CallResult payload, or fails with
    /// [`CsmsError::CallError`], [`CsmsError::RequestTimeout`] or
    /// [`CsmsError::ConnectionClosed`].
    pub async fn send_call(&self, action: &str, payload: Value) -> CsmsResult<Value> {
        let call = CallMessage {
            unique_id: Uuid::new_v4().to_string(),
            action: action.to_string(),
            payload,
        };
        let unique_id = call.unique_id.clone();
        let (responder, mut receiver) = oneshot::channel();

        {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Open {
                return Err(self.closed_error());
            }
            inner.pending.insert(
                unique_id.clone(),
                PendingCall {
                    action: action.to_string(),
                    sent_at: Instant::now(),
                    responder,
                },
            );
        }

        // The entry leaves the table on every exit, including when the caller is cancelled
        let _pending = scopeguard::guard((), |_| {
            self.inner.lock().pending.remove(&unique_id);
        });

        self.send_frame(&Message::Call(call))?;

        match tokio::time::timeout(self.call_timeout, &mut receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => {
                let expired = self.inner.lock().pending.remove(&unique_id);
                match expired {
                    Some(_) => {
                        warn!(
                            "[{}] {} ({}) timed out after {:?}",
                            self.identity, action, unique_id, self.call_timeout
                        );
                        Err(CsmsError::RequestTimeout {
                            action: action.to_string(),
                            timeout_secs: self.call_timeout.as_secs(),
                        })
                    }
                    // A reply or close won the race and already settled the call
                    None => receiver
                        .try_recv()
                        .unwrap_or_else(|_| Err(self.closed_error())),
                }
            }
        }
    }

    /// Settle a pending call with a CallResult payload
    ///
    /// Returns `false` when no call with that id is pending (unknown or late reply).
    pub fn resolve_result(&self, unique_id: &str, payload: Value) -> bool {
        let mut inner = self.inner.lock();
        match inner.pending.remove(unique_id) {
            Some(pending) => {
                debug!(
                    "[{}] {} ({}) answered in {:?}",
                    self.identity,
                    pending.action,
                    unique_id,
                    pending.sent_at.elapsed()
                );
                pending.settle(Ok(payload));
                true
            }
            None => false,
        }
    }

    /// Settle a pending call with the peer's CallError
    pub fn resolve_error(&self, unique_id: &str, code: &str, description: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.pending.remove(unique_id) {
            Some(pending) => {
                debug!(
                    "[{}] {} ({}) failed with {}",
                    self.identity, pending.action, unique_id, code
                );
                pending.settle(Err(CsmsError::CallError {
                    code: code.to_string(),
                    description: description.to_string(),
                }));
                true
            }
            None => false,
        }
    }

    /// Transition to `Closed`, failing every pending call
    ///
    /// Returns how many pending calls were rejected. Calling it again is a no-op.
    pub fn close(&self) -> usize {
        let mut inner = self.inner.lock();
        if inner.state == ConnectionState::Closed {
            return 0;
        }
        inner.state = ConnectionState::Closing;

        let rejected = inner.pending.len();
        for (_, pending) in inner.pending.drain() {
            pending.settle(Err(CsmsError::ConnectionClosed {
                identity: self.identity.clone(),
            }));
        }

        inner.state = ConnectionState::Closed;
        if rejected > 0 {
            info!(
                "[{}] rejected {} pending call(s) on close",
                self.identity, rejected
            );
        }
        rejected
    }

    fn closed_error(&self) -> CsmsError {
        CsmsError::ConnectionClosed {
            identity: self.identity.clone(),
        }
    }
}
