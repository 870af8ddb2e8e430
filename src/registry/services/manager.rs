//! Aggregates downstream connections behind one conflict-checked registry.

use crate::downstream::{
    domain::{A2C_TOOL_META, CallToolResult, ConnectionState, DownstreamServerConfig, ToolDescriptor, ToolMeta},
    ports::{ClientFactory, ConnectionObserver},
    services::{ConnectionError, DownstreamConnection},
};
use crate::registry::domain::{ToolNameConflict, ToolRegistry};
use mockable::Clock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{Span, debug, info, info_span, warn};

/// Service-level errors for tool management and execution.
#[derive(Debug, Clone, Error)]
pub enum ManagerError {
    /// Two origins claim the same effective tool name.
    #[error(transparent)]
    ConfigConflict(#[from] ToolNameConflict),

    /// No server is configured under the name.
    #[error("downstream server '{0}' not found")]
    ServerNotFound(String),

    /// No tool is registered under the name.
    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    /// The server is configured but disabled.
    #[error("downstream server '{0}' is disabled")]
    ServerDisabled(String),

    /// The server is active and hot-swapping is turned off.
    #[error("downstream server '{0}' is active and auto_reconnect is disabled")]
    ServerActive(String),

    /// The tool's server has no live connection.
    #[error("downstream server '{0}' is not active")]
    ServerNotActive(String),

    /// The tool is forbidden by configuration.
    #[error("tool '{0}' is forbidden by configuration")]
    PermissionDenied(String),

    /// The tool call exceeded the caller's deadline.
    #[error("tool '{tool}' timed out after {timeout:?}")]
    Timeout {
        /// Effective tool name.
        tool: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// The downstream call failed.
    #[error("tool '{tool}' failed: {source}")]
    Downstream {
        /// Effective tool name.
        tool: String,
        /// Underlying connection failure.
        source: ConnectionError,
    },

    /// Opening a server's connection failed.
    #[error("connecting downstream server '{server}' failed: {source}")]
    Connection {
        /// Server name.
        server: String,
        /// Underlying connection failure.
        source: ConnectionError,
    },
}

impl ManagerError {
    /// Returns a short category name for structured error replies.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConfigConflict(_) => "ConfigConflict",
            Self::ServerNotFound(_) | Self::ToolNotFound(_) => "NotFound",
            Self::ServerDisabled(_) | Self::ServerActive(_) | Self::ServerNotActive(_) => {
                "ConnectionState"
            }
            Self::PermissionDenied(_) => "PermissionDenied",
            Self::Timeout { .. } => "Timeout",
            Self::Downstream { .. } | Self::Connection { .. } => "Downstream",
        }
    }
}

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Behavioural switches for [`ToolManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Start enabled servers as soon as they are installed.
    pub auto_connect: bool,
    /// Hot-swap active servers when their configuration is replaced.
    pub auto_reconnect: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            auto_connect: false,
            auto_reconnect: true,
        }
    }
}

/// A registry entry together with the metadata in force for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTool {
    /// Name the tool is exposed under.
    pub effective_name: String,
    /// Owning server.
    pub server: String,
    /// Name the server knows the tool by.
    pub original_name: String,
    /// Whether the tool is forbidden.
    pub disabled: bool,
    /// Declared metadata, explicit entry or server default.
    pub meta: Option<ToolMeta>,
}

impl ResolvedTool {
    /// Returns whether the tool may run without confirmation.
    #[must_use]
    pub fn is_auto_apply(&self) -> bool {
        self.meta.as_ref().is_some_and(ToolMeta::is_auto_apply)
    }
}

/// A tool as listed to callers, renamed and annotated.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailableTool {
    /// Descriptor under the effective name with `a2c_tool_meta` merged in.
    pub descriptor: ToolDescriptor,
    /// Owning server.
    pub server: String,
    /// Whether the tool is forbidden.
    pub disabled: bool,
}

/// Status of one configured server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    /// Server name.
    pub name: String,
    /// Whether a connection is live in the active set.
    pub active: bool,
    /// Connection state, when a connection exists.
    pub state: Option<ConnectionState>,
}

#[derive(Debug, Default)]
struct ManagerState {
    configs: BTreeMap<String, DownstreamServerConfig>,
    active: BTreeMap<String, Arc<DownstreamConnection>>,
    registry: Arc<ToolRegistry>,
}

/// Owns downstream server configurations, their connections and the
/// unified registry.
///
/// Configuration mutations are serialised by one asynchronous lock.
/// [`ToolManager::execute`] never takes it, so calls run concurrently with
/// each other and with an in-flight mutation; they observe the registry as
/// of the last completed rebuild.
pub struct ToolManager<F, C>
where
    F: ClientFactory,
    C: Clock + Send + Sync + 'static,
{
    factory: Arc<F>,
    clock: Arc<C>,
    options: ManagerOptions,
    observer: Option<Arc<dyn ConnectionObserver>>,
    mutation: Mutex<()>,
    state: RwLock<ManagerState>,
    span: Span,
}

impl<F, C> ToolManager<F, C>
where
    F: ClientFactory,
    C: Clock + Send + Sync + 'static,
{
    /// Creates an empty manager with default options.
    #[must_use]
    pub fn new(factory: Arc<F>, clock: Arc<C>) -> Self {
        Self {
            factory,
            clock,
            options: ManagerOptions::default(),
            observer: None,
            mutation: Mutex::new(()),
            state: RwLock::new(ManagerState::default()),
            span: Span::none(),
        }
    }

    /// Replaces the behavioural switches.
    #[must_use]
    pub const fn with_options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    /// Registers an observer attached to every connection created later.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Sets the parent span of manager and connection log events.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Returns the behavioural switches.
    #[must_use]
    pub const fn options(&self) -> ManagerOptions {
        self.options
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ManagerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ManagerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces all state with `configs`.
    ///
    /// Everything running is stopped first. With `auto_connect`, enabled
    /// servers are started before the registry is rebuilt.
    ///
    /// # Errors
    ///
    /// Returns the first start or rebuild failure, most notably
    /// [`ManagerError::ConfigConflict`]; the manager is then left empty.
    pub async fn initialize(
        &self,
        configs: impl IntoIterator<Item = DownstreamServerConfig>,
    ) -> ManagerResult<()> {
        let _guard = self.mutation.lock().await;
        self.stop_all_locked().await;
        {
            let mut state = self.write_state();
            state.configs = configs
                .into_iter()
                .map(|config| (config.name().to_owned(), config))
                .collect();
            state.registry = Arc::new(ToolRegistry::empty());
        }

        if let Err(err) = self.initialize_locked().await {
            warn!(parent: &self.span, error = %err, "initialisation failed; clearing manager");
            self.stop_all_locked().await;
            *self.write_state() = ManagerState::default();
            return Err(err);
        }
        info!(parent: &self.span, servers = self.read_state().configs.len(), "manager initialised");
        Ok(())
    }

    async fn initialize_locked(&self) -> ManagerResult<()> {
        if self.options.auto_connect {
            for config in self.enabled_configs() {
                self.open_connection(&config).await?;
            }
        }
        self.rebuild_locked().await?;
        Ok(())
    }

    /// Installs or replaces one server configuration.
    ///
    /// Replacing the configuration of an active server hot-swaps its
    /// connection when `auto_reconnect` is set; a resulting name conflict
    /// restores the previous configurations and leaves the server stopped.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::ServerActive`] when the server is active and
    /// hot-swapping is off, [`ManagerError::ConfigConflict`] when the new
    /// connection would collide, or the start failure of the server.
    pub async fn add_or_update(&self, config: DownstreamServerConfig) -> ManagerResult<()> {
        let _guard = self.mutation.lock().await;
        let name = config.name().to_owned();
        let (known, active) = {
            let state = self.read_state();
            (state.configs.contains_key(&name), state.active.contains_key(&name))
        };

        match (known, active) {
            (false, _) => {
                self.write_state().configs.insert(name.clone(), config);
                info!(parent: &self.span, server = %name, "server configuration added");
                if self.options.auto_connect {
                    self.start_locked(&name).await?;
                }
                Ok(())
            }
            (true, false) => {
                self.write_state().configs.insert(name.clone(), config);
                info!(parent: &self.span, server = %name, "server configuration replaced");
                Ok(())
            }
            (true, true) => self.hot_swap_locked(&name, config).await,
        }
    }

    async fn hot_swap_locked(&self, name: &str, config: DownstreamServerConfig) -> ManagerResult<()> {
        if !self.options.auto_reconnect {
            return Err(ManagerError::ServerActive(name.to_owned()));
        }

        let snapshot = self.read_state().configs.clone();
        self.detach_locked(name).await;
        let disabled = config.is_disabled();
        self.write_state().configs.insert(name.to_owned(), config);

        if disabled {
            self.rebuild_locked().await?;
            return Ok(());
        }

        match self.start_locked(name).await {
            Err(err @ ManagerError::ConfigConflict(_)) => {
                warn!(parent: &self.span, server = %name, "hot swap conflicts; restoring configuration");
                self.write_state().configs = snapshot;
                self.rebuild_locked().await?;
                Err(err)
            }
            outcome => outcome,
        }
    }

    /// Stops and deletes one server.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::ServerNotFound`] for unknown names.
    pub async fn remove(&self, name: &str) -> ManagerResult<()> {
        let _guard = self.mutation.lock().await;
        if !self.read_state().configs.contains_key(name) {
            return Err(ManagerError::ServerNotFound(name.to_owned()));
        }
        self.detach_locked(name).await;
        self.write_state().configs.remove(name);
        self.rebuild_locked().await?;
        info!(parent: &self.span, server = %name, "server removed");
        Ok(())
    }

    /// Starts one configured server.
    ///
    /// Starting an active server is a no-op. When the new connection would
    /// collide in the registry, only that connection is rolled back.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::ServerNotFound`], [`ManagerError::ServerDisabled`],
    /// the connection failure, or [`ManagerError::ConfigConflict`].
    pub async fn start(&self, name: &str) -> ManagerResult<()> {
        let _guard = self.mutation.lock().await;
        self.start_locked(name).await
    }

    /// Starts every enabled server, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first failure from [`ToolManager::start`].
    pub async fn start_all(&self) -> ManagerResult<()> {
        let _guard = self.mutation.lock().await;
        for config in self.enabled_configs() {
            self.start_locked(config.name()).await?;
        }
        Ok(())
    }

    /// Stops one server; unknown or inactive names are a no-op.
    ///
    /// # Errors
    ///
    /// Returns a rebuild failure, which removing tools cannot normally
    /// produce.
    pub async fn stop(&self, name: &str) -> ManagerResult<()> {
        let _guard = self.mutation.lock().await;
        if self.detach_locked(name).await {
            self.rebuild_locked().await?;
        }
        Ok(())
    }

    /// Stops every server and empties the registry.
    pub async fn stop_all(&self) {
        let _guard = self.mutation.lock().await;
        self.stop_all_locked().await;
    }

    /// Stops every server and forgets every configuration.
    pub async fn close(&self) {
        let _guard = self.mutation.lock().await;
        self.stop_all_locked().await;
        *self.write_state() = ManagerState::default();
        info!(parent: &self.span, "manager closed");
    }

    async fn start_locked(&self, name: &str) -> ManagerResult<()> {
        let config = {
            let state = self.read_state();
            if state.active.contains_key(name) {
                return Ok(());
            }
            state
                .configs
                .get(name)
                .cloned()
                .ok_or_else(|| ManagerError::ServerNotFound(name.to_owned()))?
        };
        if config.is_disabled() {
            return Err(ManagerError::ServerDisabled(name.to_owned()));
        }

        self.open_connection(&config).await?;
        if let Err(err) = self.rebuild_locked().await {
            warn!(parent: &self.span, server = %name, error = %err, "rolling back server start");
            self.detach_locked(name).await;
            return Err(err.into());
        }
        info!(parent: &self.span, server = %name, "server started");
        Ok(())
    }

    async fn open_connection(&self, config: &DownstreamServerConfig) -> ManagerResult<()> {
        let name = config.name().to_owned();
        let clock: Arc<dyn Clock + Send + Sync> = self.clock.clone();
        let mut connection = DownstreamConnection::new(&name, self.factory.create(config), clock)
            .with_span(info_span!(parent: &self.span, "downstream", server = %name));
        if let Some(observer) = &self.observer {
            connection = connection.with_observer(Arc::clone(observer));
        }

        connection
            .connect()
            .await
            .map_err(|source| ManagerError::Connection {
                server: name.clone(),
                source,
            })?;
        self.write_state().active.insert(name, Arc::new(connection));
        Ok(())
    }

    /// Removes `name` from the active set and disconnects it.
    ///
    /// Returns whether a connection was active.
    async fn detach_locked(&self, name: &str) -> bool {
        let Some(connection) = self.write_state().active.remove(name) else {
            return false;
        };
        Self::release(&connection).await;
        true
    }

    async fn release(connection: &DownstreamConnection) {
        if let Err(err) = connection.disconnect().await {
            debug!(server = connection.name(), error = %err, "disconnect refused; forcing reset");
            if let Err(reset) = connection.reinitialize().await {
                warn!(server = connection.name(), error = %reset, "releasing connection failed");
            }
        }
    }

    async fn stop_all_locked(&self) {
        let drained = {
            let mut state = self.write_state();
            state.registry = Arc::new(ToolRegistry::empty());
            std::mem::take(&mut state.active)
        };
        for connection in drained.values() {
            Self::release(connection).await;
        }
    }

    fn enabled_configs(&self) -> Vec<DownstreamServerConfig> {
        self.read_state()
            .configs
            .values()
            .filter(|config| !config.is_disabled())
            .cloned()
            .collect()
    }

    /// Lists every active server's tools and swaps in a new registry.
    ///
    /// Servers whose listing fails are logged and skipped. On conflict the
    /// current registry is kept.
    async fn rebuild_locked(&self) -> Result<(), ToolNameConflict> {
        let active: Vec<(DownstreamServerConfig, Arc<DownstreamConnection>)> = {
            let state = self.read_state();
            state
                .active
                .iter()
                .filter_map(|(name, connection)| {
                    state
                        .configs
                        .get(name)
                        .map(|config| (config.clone(), Arc::clone(connection)))
                })
                .collect()
        };

        let mut listings = Vec::with_capacity(active.len());
        for (config, connection) in active {
            match connection.list_tools().await {
                Ok(tools) => listings.push((config, tools)),
                Err(err) => {
                    warn!(parent: &self.span, server = config.name(), error = %err, "listing tools failed; skipping server");
                }
            }
        }

        let registry = ToolRegistry::build(
            listings
                .iter()
                .map(|(config, tools)| (config, tools.as_slice())),
        )?;
        debug!(parent: &self.span, tools = registry.len(), "registry rebuilt");
        self.write_state().registry = Arc::new(registry);
        Ok(())
    }

    /// Looks up a tool and the metadata in force for it.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::ToolNotFound`] for unknown names.
    pub fn resolve_tool(&self, name: &str) -> ManagerResult<ResolvedTool> {
        let state = self.read_state();
        let entry = state
            .registry
            .resolve(name)
            .ok_or_else(|| ManagerError::ToolNotFound(name.to_owned()))?;
        let meta = state
            .configs
            .get(entry.server())
            .and_then(|config| config.tool_meta_for(entry.original_name()))
            .cloned();
        Ok(ResolvedTool {
            effective_name: entry.effective_name().to_owned(),
            server: entry.server().to_owned(),
            original_name: entry.original_name().to_owned(),
            disabled: entry.is_disabled(),
            meta,
        })
    }

    /// Executes a tool by effective name.
    ///
    /// Declared tool metadata is merged into the result metadata under
    /// `a2c_tool_meta` unless the server already set that key.
    ///
    /// # Errors
    ///
    /// Returns, in order of checking, [`ManagerError::PermissionDenied`],
    /// [`ManagerError::ToolNotFound`], [`ManagerError::ServerNotActive`],
    /// then [`ManagerError::Timeout`] or [`ManagerError::Downstream`].
    pub async fn execute(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> ManagerResult<CallToolResult> {
        let (tool, connection) = {
            let state = self.read_state();
            if state.registry.is_forbidden(name) {
                return Err(ManagerError::PermissionDenied(name.to_owned()));
            }
            drop(state);
            let tool = self.resolve_tool(name)?;
            let connection = self
                .read_state()
                .active
                .get(&tool.server)
                .cloned()
                .ok_or_else(|| ManagerError::ServerNotActive(tool.server.clone()))?;
            (tool, connection)
        };

        debug!(
            parent: &self.span,
            tool = name,
            server = %tool.server,
            original = %tool.original_name,
            "executing tool"
        );
        let call = connection.call_tool(&tool.original_name, arguments);
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ManagerError::Timeout {
                    tool: name.to_owned(),
                    timeout: limit,
                })?,
            None => call.await,
        };
        let mut result = outcome.map_err(|source| ManagerError::Downstream {
            tool: name.to_owned(),
            source,
        })?;

        if let Some(meta) = &tool.meta {
            result.merge_meta_entry(A2C_TOOL_META, Value::Object(meta.to_json_map()));
        }
        Ok(result)
    }

    /// Lists every registered tool under its effective name, including
    /// forbidden ones.
    #[must_use]
    pub fn available_tools(&self) -> Vec<AvailableTool> {
        let state = self.read_state();
        state
            .registry
            .entries()
            .map(|entry| {
                let mut descriptor = entry.descriptor().renamed(entry.effective_name());
                let declared = state
                    .configs
                    .get(entry.server())
                    .and_then(|config| config.tool_meta_for(entry.original_name()));
                if let Some(meta) = declared {
                    descriptor
                        .meta
                        .get_or_insert_with(Map::new)
                        .entry(A2C_TOOL_META)
                        .or_insert_with(|| Value::Object(meta.to_json_map()));
                }
                AvailableTool {
                    descriptor,
                    server: entry.server().to_owned(),
                    disabled: entry.is_disabled(),
                }
            })
            .collect()
    }

    /// Returns `(name, active, state)` for every configured server.
    pub async fn server_status(&self) -> Vec<ServerStatus> {
        let snapshot: Vec<(String, Option<Arc<DownstreamConnection>>)> = {
            let state = self.read_state();
            state
                .configs
                .keys()
                .map(|name| (name.clone(), state.active.get(name).cloned()))
                .collect()
        };

        let mut statuses = Vec::with_capacity(snapshot.len());
        for (name, connection) in snapshot {
            let connection_state = match &connection {
                Some(live) => Some(live.state().await),
                None => None,
            };
            statuses.push(ServerStatus {
                name,
                active: connection.is_some(),
                state: connection_state,
            });
        }
        statuses
    }

    /// Returns every configuration ordered by name.
    #[must_use]
    pub fn configs(&self) -> Vec<DownstreamServerConfig> {
        self.read_state().configs.values().cloned().collect()
    }

    /// Returns the configuration of `name`.
    #[must_use]
    pub fn config(&self, name: &str) -> Option<DownstreamServerConfig> {
        self.read_state().configs.get(name).cloned()
    }

    /// Returns the names of servers with a live connection.
    #[must_use]
    pub fn active_servers(&self) -> Vec<String> {
        self.read_state().active.keys().cloned().collect()
    }

    /// Returns the current registry.
    #[must_use]
    pub fn registry(&self) -> Arc<ToolRegistry> {
        Arc::clone(&self.read_state().registry)
    }
}
