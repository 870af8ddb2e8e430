//! JSON-RPC 2.0 plumbing shared by the MCP transports.

use crate::downstream::{
    domain::{CallToolResult, ToolPage},
    ports::{TransportError, TransportResult},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// MCP protocol revision announced during the handshake.
pub(crate) const PROTOCOL_VERSION: &str = "2025-03-26";

const JSONRPC_VERSION: &str = "2.0";

type Waiter = oneshot::Sender<TransportResult<Value>>;

/// JSON-RPC error object.
#[derive(Debug, Clone, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Incoming message as far as response correlation cares.
#[derive(Debug, Clone, Deserialize)]
struct IncomingMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// Outstanding requests keyed by JSON-RPC id.
#[derive(Debug)]
pub(crate) struct PendingRequests {
    next_id: AtomicU64,
    waiting: Mutex<HashMap<u64, Waiter>>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            waiting: Mutex::new(HashMap::new()),
        }
    }
}

impl PendingRequests {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Waiter>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates an id and the receiver its response is delivered to.
    pub(crate) fn register(&self) -> (u64, oneshot::Receiver<TransportResult<Value>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.lock().insert(id, sender);
        (id, receiver)
    }

    /// Drops the waiter for `id` without resolving it.
    pub(crate) fn cancel(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Returns whether a response for `id` is still outstanding.
    pub(crate) fn is_waiting(&self, id: u64) -> bool {
        self.lock().contains_key(&id)
    }

    /// Fails every outstanding request with `reason`.
    pub(crate) fn fail_all(&self, reason: &str) {
        let drained: Vec<_> = self.lock().drain().collect();
        for (_, waiter) in drained {
            let _ignored = waiter.send(Err(TransportError::Closed(reason.to_owned())));
        }
    }

    /// Routes one incoming message to its waiter.
    ///
    /// Server-initiated requests and notifications are logged and dropped;
    /// this client advertises no capabilities that would require answering
    /// them.
    pub(crate) fn dispatch(&self, raw: Value) {
        let message: IncomingMessage = match serde_json::from_value(raw) {
            Ok(message) => message,
            Err(err) => {
                debug!(error = %err, "ignoring malformed JSON-RPC message");
                return;
            }
        };

        if let Some(method) = message.method {
            trace!(%method, "ignoring server-initiated message");
            return;
        }

        let Some(id) = message.id.as_ref().and_then(Value::as_u64) else {
            debug!("ignoring JSON-RPC response without numeric id");
            return;
        };
        let Some(waiter) = self.lock().remove(&id) else {
            debug!(id, "no pending request for response");
            return;
        };

        let outcome = match (message.error, message.result) {
            (Some(error), _) => Err(TransportError::Remote {
                code: error.code,
                message: error.message,
            }),
            (None, result) => Ok(result.unwrap_or(Value::Null)),
        };
        let _ignored = waiter.send(outcome);
    }
}

/// A bidirectional JSON-RPC channel to one MCP server.
///
/// Implementors only provide `send`; responses must find their way into
/// [`JsonRpcChannel::pending`] through [`PendingRequests::dispatch`].
#[async_trait]
pub(crate) trait JsonRpcChannel: Send + Sync {
    /// Returns the table of outstanding requests.
    fn pending(&self) -> &PendingRequests;

    /// Writes one message to the server.
    async fn send(&self, message: Value) -> TransportResult<()>;

    /// Sends a request and waits for its response, at most `limit` when
    /// one is given.
    async fn request(
        &self,
        method: &str,
        params: Value,
        limit: Option<Duration>,
    ) -> TransportResult<Value> {
        let (id, receiver) = self.pending().register();
        let message = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "method": method,
            "params": params,
        });

        if let Err(err) = self.send(message).await {
            self.pending().cancel(id);
            return Err(err);
        }

        let reply = match limit {
            Some(timeout) => match tokio::time::timeout(timeout, receiver).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.pending().cancel(id);
                    return Err(TransportError::TimedOut {
                        method: method.to_owned(),
                        timeout,
                    });
                }
            },
            None => receiver.await,
        };
        reply.map_err(|_| TransportError::Closed(format!("no response to '{method}'")))?
    }

    /// Sends a notification.
    async fn notify(&self, method: &str, params: Option<Value>) -> TransportResult<()> {
        let mut message = json!({"jsonrpc": JSONRPC_VERSION, "method": method});
        if let (Some(body), Some(object)) = (params, message.as_object_mut()) {
            object.insert("params".to_owned(), body);
        }
        self.send(message).await
    }
}

/// Runs the MCP initialisation handshake, failing when the server does
/// not answer `initialize` within `limit`.
pub(crate) async fn handshake<C: JsonRpcChannel + ?Sized>(
    channel: &C,
    limit: Duration,
) -> TransportResult<()> {
    let result = channel
        .request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "smcp", "version": env!("CARGO_PKG_VERSION")},
            }),
            Some(limit),
        )
        .await?;
    debug!(
        server_protocol = result.get("protocolVersion").and_then(serde_json::Value::as_str),
        "MCP session initialised"
    );
    channel.notify("notifications/initialized", None).await
}

/// Requests one page of `tools/list`, waiting at most `limit`.
pub(crate) async fn list_tools_page<C: JsonRpcChannel + ?Sized>(
    channel: &C,
    cursor: Option<String>,
    limit: Duration,
) -> TransportResult<ToolPage> {
    let params = cursor.map_or_else(|| json!({}), |value| json!({"cursor": value}));
    let result = channel.request("tools/list", params, Some(limit)).await?;
    serde_json::from_value(result).map_err(TransportError::protocol)
}

/// Invokes `tools/call`.
pub(crate) async fn call_tool<C: JsonRpcChannel + ?Sized>(
    channel: &C,
    name: &str,
    arguments: Map<String, Value>,
) -> TransportResult<CallToolResult> {
    let result = channel
        .request("tools/call", json!({"name": name, "arguments": arguments}), None)
        .await?;
    serde_json::from_value(result).map_err(TransportError::protocol)
}

/// Returns the numeric id of an outgoing request message.
pub(crate) fn request_id(message: &Value) -> Option<u64> {
    message.get("id").and_then(Value::as_u64)
}
