//! Computer-side façade binding a tool manager to a confirmation policy.

use super::{ConfirmationError, ConfirmationPolicy, ConfirmationRequest};
use crate::downstream::{
    domain::{CallToolResult, DownstreamServerConfig, ToolDescriptor},
    ports::ClientFactory,
};
use crate::protocol::{GetConfigReply, SmcpTool};
use crate::registry::services::{ManagerError, ManagerResult, ToolManager};
use mockable::Clock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{Span, debug, error, info, warn};

/// Metadata key carrying MCP tool annotations in the Agent-facing view.
pub const TOOL_ANNOTATION_META: &str = "MCP_TOOL_ANNOTATION";

/// Runs tool invocations through an optional confirmation step and
/// presents the manager's state to Agents.
///
/// Every invocation outcome, including rejections, is a [`CallToolResult`];
/// nothing is raised to the caller.
pub struct ToolOrchestrator<F, C>
where
    F: ClientFactory,
    C: Clock + Send + Sync + 'static,
{
    manager: ToolManager<F, C>,
    policy: Option<Arc<dyn ConfirmationPolicy>>,
    confirm_timeout: Option<Duration>,
    inputs: RwLock<Vec<Value>>,
    span: Span,
}

impl<F, C> ToolOrchestrator<F, C>
where
    F: ClientFactory,
    C: Clock + Send + Sync + 'static,
{
    /// Wraps `manager` with no confirmation policy.
    #[must_use]
    pub fn new(manager: ToolManager<F, C>) -> Self {
        Self {
            manager,
            policy: None,
            confirm_timeout: None,
            inputs: RwLock::new(Vec::new()),
            span: Span::none(),
        }
    }

    /// Installs the policy consulted for tools without `auto_apply`.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn ConfirmationPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Bounds how long a confirmation may take.
    #[must_use]
    pub const fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = Some(timeout);
        self
    }

    /// Sets the opaque input definitions returned with the configuration.
    #[must_use]
    pub fn with_inputs(self, inputs: Vec<Value>) -> Self {
        self.set_inputs(inputs);
        self
    }

    /// Sets the span that log events are recorded in.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Returns the wrapped manager.
    #[must_use]
    pub const fn manager(&self) -> &ToolManager<F, C> {
        &self.manager
    }

    /// Installs the initial server set.
    ///
    /// # Errors
    ///
    /// Propagates [`ToolManager::initialize`] failures.
    pub async fn boot(
        &self,
        configs: impl IntoIterator<Item = DownstreamServerConfig>,
    ) -> ManagerResult<()> {
        self.manager.initialize(configs).await?;
        info!(parent: &self.span, servers = self.manager.configs().len(), "computer booted");
        Ok(())
    }

    /// Adds or replaces one server configuration.
    ///
    /// # Errors
    ///
    /// Propagates [`ToolManager::add_or_update`] failures.
    pub async fn add_or_update_server(&self, config: DownstreamServerConfig) -> ManagerResult<()> {
        self.manager.add_or_update(config).await
    }

    /// Removes one server configuration.
    ///
    /// # Errors
    ///
    /// Propagates [`ToolManager::remove`] failures.
    pub async fn remove_server(&self, name: &str) -> ManagerResult<()> {
        self.manager.remove(name).await
    }

    /// Replaces the opaque input definitions.
    pub fn set_inputs(&self, inputs: Vec<Value>) {
        *self.inputs.write().unwrap_or_else(PoisonError::into_inner) = inputs;
    }

    /// Returns the opaque input definitions.
    #[must_use]
    pub fn inputs(&self) -> Vec<Value> {
        self.inputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stops every connection and clears all state.
    pub async fn shutdown(&self) {
        self.manager.close().await;
        info!(parent: &self.span, "computer shut down");
    }

    /// Invokes a tool by effective name.
    ///
    /// Forbidden tools are refused without asking. Tools flagged
    /// `auto_apply` run immediately; others run only after the
    /// confirmation policy approves. A missing policy, a confirmation
    /// timeout or a policy failure produce a failed result.
    pub async fn execute_tool(
        &self,
        req_id: &str,
        tool_name: &str,
        arguments: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> CallToolResult {
        if self.manager.registry().is_forbidden(tool_name) {
            return self.run(tool_name, arguments, timeout).await;
        }
        let tool = match self.manager.resolve_tool(tool_name) {
            Ok(resolved) => resolved,
            Err(err) => return failure(&err),
        };
        if tool.disabled || tool.is_auto_apply() {
            return self.run(tool_name, arguments, timeout).await;
        }

        let Some(policy) = &self.policy else {
            warn!(parent: &self.span, tool = tool_name, "confirmation required but no policy installed");
            return CallToolResult::error_text(
                "tool requires confirmation before it runs but no confirmation policy is configured",
                "ConfirmationUnavailable",
            );
        };

        let request = ConfirmationRequest {
            req_id: req_id.to_owned(),
            server: tool.server.clone(),
            tool_name: tool.original_name.clone(),
            arguments,
        };
        let decision = match self.confirm_timeout {
            Some(limit) => tokio::time::timeout(limit, policy.confirm(&request))
                .await
                .unwrap_or(Err(ConfirmationError::TimedOut)),
            None => policy.confirm(&request).await,
        };
        debug!(parent: &self.span, tool = tool_name, req_id, ?decision, "confirmation decided");

        match decision {
            Ok(true) => self.run(tool_name, request.arguments, timeout).await,
            Ok(false) => CallToolResult::text("tool call was declined during confirmation"),
            Err(ConfirmationError::TimedOut) => CallToolResult::error_text(
                "tool requires confirmation and the confirmation timed out",
                "ConfirmationTimeout",
            ),
            Err(err) => {
                error!(parent: &self.span, tool = tool_name, error = %err, "confirmation failed");
                CallToolResult::error_text(err.to_string(), "ConfirmationFailed")
            }
        }
    }

    async fn run(
        &self,
        tool_name: &str,
        arguments: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> CallToolResult {
        self.manager
            .execute(tool_name, arguments, timeout)
            .await
            .unwrap_or_else(|err| {
                warn!(parent: &self.span, tool = tool_name, error = %err, "tool call failed");
                failure(&err)
            })
    }

    /// Lists tools in the Agent-facing form.
    #[must_use]
    pub fn get_tools(&self) -> Vec<SmcpTool> {
        self.manager
            .available_tools()
            .into_iter()
            .map(|tool| to_smcp_tool(tool.descriptor))
            .collect()
    }

    /// Returns every server configuration keyed by name plus the inputs.
    #[must_use]
    pub fn get_config(&self) -> GetConfigReply {
        let mut servers = BTreeMap::new();
        for config in self.manager.configs() {
            match serde_json::to_value(&config) {
                Ok(value) => {
                    servers.insert(config.name().to_owned(), value);
                }
                Err(err) => {
                    error!(parent: &self.span, server = config.name(), error = %err, "cannot encode server config");
                }
            }
        }
        GetConfigReply {
            servers,
            inputs: self.inputs(),
        }
    }
}

fn failure(err: &ManagerError) -> CallToolResult {
    CallToolResult::error_text(err.to_string(), err.kind())
}

fn is_attribute(value: &Value) -> bool {
    let scalar = |item: &Value| matches!(item, Value::String(_) | Value::Bool(_) | Value::Number(_));
    match value {
        Value::Array(items) => items.iter().all(scalar),
        other => scalar(other),
    }
}

fn to_smcp_tool(descriptor: ToolDescriptor) -> SmcpTool {
    let mut meta: Map<String, Value> = descriptor
        .meta
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            if is_attribute(&value) {
                (key, value)
            } else {
                (key, Value::String(value.to_string()))
            }
        })
        .collect();
    if let Some(annotations) = descriptor.annotations {
        meta.insert(TOOL_ANNOTATION_META.to_owned(), annotations);
    }
    SmcpTool {
        name: descriptor.name,
        description: descriptor.description.unwrap_or_default(),
        params_schema: descriptor.input_schema,
        return_schema: descriptor.output_schema,
        meta: (!meta.is_empty()).then_some(meta),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computer::MockConfirmationPolicy;
    use crate::downstream::adapters::{InMemoryClientFactory, InMemoryDownstreamClient};
    use crate::downstream::domain::{A2C_TOOL_META, ToolMeta, TransportConfig};
    use crate::registry::services::ManagerOptions;
    use mockable::DefaultClock;
    use rstest::{fixture, rstest};
    use serde_json::json;

    type Orchestrator = ToolOrchestrator<InMemoryClientFactory, DefaultClock>;

    struct Harness {
        client: Arc<InMemoryDownstreamClient>,
        manager: ToolManager<InMemoryClientFactory, DefaultClock>,
    }

    #[fixture]
    fn harness() -> Harness {
        let factory = Arc::new(InMemoryClientFactory::new());
        let client = Arc::new(InMemoryDownstreamClient::with_tool_names(["echo", "shell"]));
        factory.register("files", Arc::clone(&client));
        let manager = ToolManager::new(factory, Arc::new(DefaultClock)).with_options(ManagerOptions {
            auto_connect: true,
            auto_reconnect: true,
        });
        Harness { client, manager }
    }

    fn files_config() -> DownstreamServerConfig {
        DownstreamServerConfig::new("files", TransportConfig::stdio("files-mcp").expect("transport"))
            .expect("config")
            .with_tool_meta("echo", ToolMeta::default().with_auto_apply(true))
    }

    async fn booted(orchestrator: Orchestrator) -> Orchestrator {
        orchestrator.boot([files_config()]).await.expect("boot");
        orchestrator
    }

    fn text_args(text: &str) -> Map<String, Value> {
        let mut arguments = Map::new();
        arguments.insert("text".to_owned(), json!(text));
        arguments
    }

    #[rstest]
    #[tokio::test]
    async fn auto_apply_skips_confirmation(harness: Harness) {
        let mut policy = MockConfirmationPolicy::new();
        policy.expect_confirm().never();
        let orchestrator =
            booted(ToolOrchestrator::new(harness.manager).with_policy(Arc::new(policy))).await;

        let result = orchestrator
            .execute_tool("r1", "echo", text_args("hi"), None)
            .await;

        assert!(!result.is_error);
        assert!(result.text_content().contains("hi"));
        assert!(
            result
                .meta
                .as_ref()
                .is_some_and(|meta| meta.contains_key(A2C_TOOL_META))
        );
    }

    #[rstest]
    #[tokio::test]
    async fn missing_policy_is_a_failed_result(harness: Harness) {
        let orchestrator = booted(ToolOrchestrator::new(harness.manager)).await;

        let result = orchestrator
            .execute_tool("r1", "shell", text_args("ls"), None)
            .await;

        assert!(result.is_error);
        assert!(harness.client.calls().is_empty());
    }

    #[rstest]
    #[case(Ok(true), false, 1)]
    #[case(Ok(false), false, 0)]
    #[case(Err(ConfirmationError::TimedOut), true, 0)]
    #[case(Err(ConfirmationError::Failed("boom".to_owned())), true, 0)]
    #[tokio::test]
    async fn confirmation_outcomes(
        harness: Harness,
        #[case] decision: Result<bool, ConfirmationError>,
        #[case] is_error: bool,
        #[case] calls: usize,
    ) {
        let mut policy = MockConfirmationPolicy::new();
        policy
            .expect_confirm()
            .withf(|request| request.server == "files" && request.tool_name == "shell")
            .times(1)
            .return_once(move |_| decision);
        let orchestrator =
            booted(ToolOrchestrator::new(harness.manager).with_policy(Arc::new(policy))).await;

        let result = orchestrator
            .execute_tool("r1", "shell", text_args("ls"), None)
            .await;

        assert_eq!(result.is_error, is_error);
        assert_eq!(harness.client.calls().len(), calls);
    }

    #[rstest]
    #[tokio::test]
    async fn unknown_tool_is_a_failed_result(harness: Harness) {
        let orchestrator = booted(ToolOrchestrator::new(harness.manager)).await;

        let result = orchestrator.execute_tool("r1", "nope", Map::new(), None).await;

        assert!(result.is_error);
        assert_eq!(
            result
                .structured_content
                .as_ref()
                .and_then(|content| content.get("error_type")),
            Some(&json!("NotFound"))
        );
    }

    #[rstest]
    #[tokio::test]
    async fn get_tools_encodes_structured_meta(harness: Harness) {
        let orchestrator = booted(ToolOrchestrator::new(harness.manager)).await;

        let tools = orchestrator.get_tools();

        let echo = tools
            .iter()
            .find(|tool| tool.name == "echo")
            .expect("echo listed");
        let encoded = echo
            .meta
            .as_ref()
            .and_then(|meta| meta.get(A2C_TOOL_META))
            .and_then(Value::as_str)
            .expect("meta encoded as string");
        let decoded: Value = serde_json::from_str(encoded).expect("valid JSON");
        assert_eq!(decoded.get("auto_apply"), Some(&json!(true)));
    }

    #[rstest]
    #[tokio::test]
    async fn get_config_lists_servers_and_inputs(harness: Harness) {
        let orchestrator = booted(
            ToolOrchestrator::new(harness.manager).with_inputs(vec![json!({"id": "token"})]),
        )
        .await;

        let config = orchestrator.get_config();

        assert_eq!(config.servers.keys().collect::<Vec<_>>(), vec!["files"]);
        assert_eq!(
            config.servers.get("files").and_then(|server| server.get("type")),
            Some(&json!("stdio"))
        );
        assert_eq!(config.inputs, vec![json!({"id": "token"})]);
    }

    #[test]
    fn scalar_arrays_stay_attributes() {
        assert!(is_attribute(&json!(["a", 1, true])));
        assert!(!is_attribute(&json!([{"a": 1}])));
        assert!(!is_attribute(&json!({"a": 1})));
        assert!(!is_attribute(&Value::Null));
    }
}
