//! In-memory downstream client for tests and local wiring.

use crate::downstream::{
    domain::{CallToolResult, DownstreamServerConfig, ToolDescriptor, ToolPage},
    ports::{ClientFactory, DownstreamClient, TransportError, TransportResult},
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Deterministic downstream client backed by a fixed tool catalog.
///
/// Every known tool echoes its arguments: the `text` argument when it is a
/// string, otherwise the JSON-encoded argument object.
#[derive(Debug, Default)]
pub struct InMemoryDownstreamClient {
    state: Mutex<InMemoryClientState>,
}

#[derive(Debug, Default)]
struct InMemoryClientState {
    tools: Vec<ToolDescriptor>,
    page_size: Option<usize>,
    connected: bool,
    fail_connect: bool,
    call_delay: Option<Duration>,
    failing_tools: HashSet<String>,
    calls: Vec<(String, Map<String, Value>)>,
    connect_count: usize,
    disconnect_count: usize,
}

impl InMemoryDownstreamClient {
    /// Creates a client advertising `tools`.
    #[must_use]
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            state: Mutex::new(InMemoryClientState {
                tools,
                ..InMemoryClientState::default()
            }),
        }
    }

    /// Creates a client advertising bare tools with the given names.
    #[must_use]
    pub fn with_tool_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(names.into_iter().map(ToolDescriptor::new).collect())
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the advertised catalog.
    pub fn set_tools(&self, tools: Vec<ToolDescriptor>) {
        self.lock().tools = tools;
    }

    /// Splits listings into pages of `page_size` tools.
    pub fn set_page_size(&self, page_size: usize) {
        self.lock().page_size = Some(page_size.max(1));
    }

    /// Makes subsequent `connect` calls fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    /// Delays every tool call by `delay`.
    pub fn set_call_delay(&self, delay: Duration) {
        self.lock().call_delay = Some(delay);
    }

    /// Makes calls to `tool_name` fail with a remote error.
    pub fn fail_tool(&self, tool_name: impl Into<String>) {
        self.lock().failing_tools.insert(tool_name.into());
    }

    /// Returns the recorded `(tool, arguments)` calls in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.lock().calls.clone()
    }

    /// Returns how many sessions were opened.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.lock().connect_count
    }

    /// Returns how many sessions were released.
    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.lock().disconnect_count
    }

    /// Returns whether a session is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }
}

#[async_trait]
impl DownstreamClient for InMemoryDownstreamClient {
    async fn connect(&self) -> TransportResult<()> {
        let mut state = self.lock();
        if state.fail_connect {
            return Err(TransportError::Closed("connection refused".to_owned()));
        }
        state.connected = true;
        state.connect_count += 1;
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        let mut state = self.lock();
        state.connected = false;
        state.disconnect_count += 1;
        Ok(())
    }

    async fn list_tools(&self, cursor: Option<String>) -> TransportResult<ToolPage> {
        let state = self.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }

        let start = match cursor {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| TransportError::Protocol(format!("invalid cursor '{raw}'")))?,
            None => 0,
        };
        let page_size = state.page_size.unwrap_or(state.tools.len().max(1));
        let tools: Vec<_> = state.tools.iter().skip(start).take(page_size).cloned().collect();
        let next = start + tools.len();
        let next_cursor = (next < state.tools.len()).then(|| next.to_string());
        Ok(ToolPage { tools, next_cursor })
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> TransportResult<CallToolResult> {
        let delay = {
            let mut state = self.lock();
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            state.calls.push((name.to_owned(), arguments.clone()));
            if state.failing_tools.contains(name) {
                return Err(TransportError::Remote {
                    code: -32_603,
                    message: format!("tool '{name}' failed"),
                });
            }
            if !state.tools.iter().any(|tool| tool.name == name) {
                return Err(TransportError::Remote {
                    code: -32_602,
                    message: format!("unknown tool '{name}'"),
                });
            }
            state.call_delay
        };

        if let Some(duration) = delay {
            tokio::time::sleep(duration).await;
        }

        let text = match arguments.get("text") {
            Some(Value::String(text)) => text.clone(),
            _ => Value::Object(arguments).to_string(),
        };
        Ok(CallToolResult::text(text))
    }
}

/// Client factory handing out pre-registered in-memory clients by server
/// name.
///
/// Servers without a registered client get an empty catalog.
#[derive(Debug, Default)]
pub struct InMemoryClientFactory {
    clients: Mutex<HashMap<String, Arc<InMemoryDownstreamClient>>>,
}

impl InMemoryClientFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the client returned for server `name`.
    pub fn register(&self, name: impl Into<String>, client: Arc<InMemoryDownstreamClient>) {
        self.lock().insert(name.into(), client);
    }

    /// Returns the client registered for `name`.
    #[must_use]
    pub fn client(&self, name: &str) -> Option<Arc<InMemoryDownstreamClient>> {
        self.lock().get(name).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<InMemoryDownstreamClient>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClientFactory for InMemoryClientFactory {
    fn create(&self, config: &DownstreamServerConfig) -> Arc<dyn DownstreamClient> {
        self.lock()
            .entry(config.name().to_owned())
            .or_default()
            .clone()
    }
}
