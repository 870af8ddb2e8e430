//! Downstream server configuration value objects.

use super::DownstreamConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Result metadata key under which declared tool metadata is published.
pub const A2C_TOOL_META: &str = "a2c_tool_meta";

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SSE_READ_TIMEOUT_SECS: u64 = 300;
const DEFAULT_STDIO_TIMEOUT_SECS: u64 = 30;

const fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

const fn default_stdio_timeout_secs() -> u64 {
    DEFAULT_STDIO_TIMEOUT_SECS
}

const fn default_sse_read_timeout_secs() -> u64 {
    DEFAULT_SSE_READ_TIMEOUT_SECS
}

const fn default_true() -> bool {
    true
}

/// Per-tool metadata declared by whoever administers a Computer.
///
/// Unknown keys are preserved in [`ToolMeta::extra`] and travel with the
/// metadata into results and tool listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMeta {
    /// Executes without asking the confirmation policy when `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_apply: Option<bool>,
    /// Name under which the tool is exposed instead of its original name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Mapping hint for reshaping tool results on the Agent side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ret_object_mapper: Option<Map<String, Value>>,
    /// Additional free-form keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToolMeta {
    /// Creates metadata exposing the tool under `alias`.
    #[must_use]
    pub fn aliased(alias: impl Into<String>) -> Self {
        Self {
            alias: Some(alias.into()),
            ..Self::default()
        }
    }

    /// Sets the auto-apply flag.
    #[must_use]
    pub const fn with_auto_apply(mut self, auto_apply: bool) -> Self {
        self.auto_apply = Some(auto_apply);
        self
    }

    /// Returns the configured alias when it is non-blank.
    #[must_use]
    pub fn effective_alias(&self) -> Option<&str> {
        self.alias
            .as_deref()
            .map(str::trim)
            .filter(|alias| !alias.is_empty())
    }

    /// Returns whether the tool may run without confirmation.
    #[must_use]
    pub fn is_auto_apply(&self) -> bool {
        self.auto_apply.unwrap_or(false)
    }

    /// Returns the metadata as a JSON object.
    #[must_use]
    pub fn to_json_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Parameters for a downstream server launched as a child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioParameters {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cwd: Option<String>,
    #[serde(default = "default_stdio_timeout_secs")]
    timeout_secs: u64,
}

impl StdioParameters {
    /// Creates stdio parameters for `command`.
    ///
    /// # Errors
    ///
    /// Returns [`DownstreamConfigError::EmptyStdioCommand`] when the command
    /// is empty after trimming.
    pub fn new(command: impl Into<String>) -> Result<Self, DownstreamConfigError> {
        let normalized = command.into().trim().to_owned();
        if normalized.is_empty() {
            return Err(DownstreamConfigError::EmptyStdioCommand);
        }

        Ok(Self {
            command: normalized,
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            timeout_secs: DEFAULT_STDIO_TIMEOUT_SECS,
        })
    }

    /// Replaces command-line arguments.
    #[must_use]
    pub fn with_args(mut self, values: impl IntoIterator<Item = String>) -> Self {
        self.args = values.into_iter().collect();
        self
    }

    /// Replaces process environment variables.
    #[must_use]
    pub fn with_env(mut self, values: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = values.into_iter().collect();
        self
    }

    /// Sets the working directory of the child process.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Sets how long the handshake and tool listings may wait for the
    /// child to answer.
    #[must_use]
    pub const fn with_timeout_secs(mut self, seconds: u64) -> Self {
        self.timeout_secs = seconds;
        self
    }

    /// Returns the executable command.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns command-line arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns environment variables.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Returns the optional working directory.
    #[must_use]
    pub fn cwd(&self) -> Option<&str> {
        self.cwd.as_deref()
    }

    /// Returns the handshake and listing deadline in seconds.
    #[must_use]
    pub const fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    fn validate(&self) -> Result<(), DownstreamConfigError> {
        if self.command.trim().is_empty() {
            return Err(DownstreamConfigError::EmptyStdioCommand);
        }
        Ok(())
    }
}

/// Parameters for a downstream server reached over legacy HTTP+SSE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseParameters {
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default = "default_http_timeout_secs")]
    timeout_secs: u64,
    #[serde(default = "default_sse_read_timeout_secs")]
    sse_read_timeout_secs: u64,
}

impl SseParameters {
    /// Creates SSE parameters for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`DownstreamConfigError`] when the URL is empty or not HTTP(S).
    pub fn new(url: impl Into<String>) -> Result<Self, DownstreamConfigError> {
        Ok(Self {
            url: validate_url(url.into())?,
            headers: BTreeMap::new(),
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            sse_read_timeout_secs: DEFAULT_SSE_READ_TIMEOUT_SECS,
        })
    }

    /// Replaces request headers.
    #[must_use]
    pub fn with_headers(mut self, values: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers = values.into_iter().collect();
        self
    }

    /// Returns the event-stream URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns request headers.
    #[must_use]
    pub const fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Returns the timeout for regular HTTP operations in seconds.
    #[must_use]
    pub const fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Returns the idle read timeout of the event stream in seconds.
    #[must_use]
    pub const fn sse_read_timeout_secs(&self) -> u64 {
        self.sse_read_timeout_secs
    }
}

/// Parameters for a downstream server reached over streamable HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamableHttpParameters {
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default = "default_http_timeout_secs")]
    timeout_secs: u64,
    #[serde(default = "default_sse_read_timeout_secs")]
    sse_read_timeout_secs: u64,
    #[serde(default = "default_true")]
    terminate_on_close: bool,
}

impl StreamableHttpParameters {
    /// Creates streamable HTTP parameters for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`DownstreamConfigError`] when the URL is empty or not HTTP(S).
    pub fn new(url: impl Into<String>) -> Result<Self, DownstreamConfigError> {
        Ok(Self {
            url: validate_url(url.into())?,
            headers: BTreeMap::new(),
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            sse_read_timeout_secs: DEFAULT_SSE_READ_TIMEOUT_SECS,
            terminate_on_close: true,
        })
    }

    /// Replaces request headers.
    #[must_use]
    pub fn with_headers(mut self, values: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers = values.into_iter().collect();
        self
    }

    /// Sets whether the remote session is deleted on disconnect.
    #[must_use]
    pub const fn with_terminate_on_close(mut self, terminate_on_close: bool) -> Self {
        self.terminate_on_close = terminate_on_close;
        self
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns request headers.
    #[must_use]
    pub const fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Returns the timeout for regular HTTP operations in seconds.
    #[must_use]
    pub const fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Returns the idle read timeout of streamed responses in seconds.
    #[must_use]
    pub const fn sse_read_timeout_secs(&self) -> u64 {
        self.sse_read_timeout_secs
    }

    /// Returns whether the remote session is deleted on disconnect.
    #[must_use]
    pub const fn terminate_on_close(&self) -> bool {
        self.terminate_on_close
    }
}

fn validate_url(value: String) -> Result<String, DownstreamConfigError> {
    let normalized = value.trim().to_owned();
    if normalized.is_empty() {
        return Err(DownstreamConfigError::EmptyUrl);
    }

    let has_valid_prefix = normalized.starts_with("http://") || normalized.starts_with("https://");
    if !has_valid_prefix {
        return Err(DownstreamConfigError::InvalidUrl(normalized));
    }

    Ok(normalized)
}

/// Transport tag of a downstream server configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Child process speaking line-delimited JSON-RPC.
    Stdio,
    /// Legacy HTTP+SSE transport.
    Sse,
    /// Streamable HTTP transport.
    StreamableHttp,
}

impl TransportKind {
    /// Returns the canonical configuration representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable_http",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Transport configuration variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    /// Child process over stdio.
    Stdio(StdioParameters),
    /// Legacy HTTP+SSE.
    Sse(SseParameters),
    /// Streamable HTTP.
    StreamableHttp(StreamableHttpParameters),
}

impl TransportConfig {
    /// Creates a stdio transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`StdioParameters::new`].
    pub fn stdio(command: impl Into<String>) -> Result<Self, DownstreamConfigError> {
        Ok(Self::Stdio(StdioParameters::new(command)?))
    }

    /// Creates an SSE transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`SseParameters::new`].
    pub fn sse(url: impl Into<String>) -> Result<Self, DownstreamConfigError> {
        Ok(Self::Sse(SseParameters::new(url)?))
    }

    /// Creates a streamable HTTP transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`StreamableHttpParameters::new`].
    pub fn streamable_http(url: impl Into<String>) -> Result<Self, DownstreamConfigError> {
        Ok(Self::StreamableHttp(StreamableHttpParameters::new(url)?))
    }

    /// Returns the transport tag.
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio(_) => TransportKind::Stdio,
            Self::Sse(_) => TransportKind::Sse,
            Self::StreamableHttp(_) => TransportKind::StreamableHttp,
        }
    }

    fn parameters_to_value(&self) -> Value {
        let encoded = match self {
            Self::Stdio(parameters) => serde_json::to_value(parameters),
            Self::Sse(parameters) => serde_json::to_value(parameters),
            Self::StreamableHttp(parameters) => serde_json::to_value(parameters),
        };
        encoded.unwrap_or_default()
    }

    fn from_parts(kind: TransportKind, parameters: Value) -> Result<Self, DownstreamConfigError> {
        let invalid = |err: serde_json::Error| DownstreamConfigError::InvalidParameters {
            kind,
            reason: err.to_string(),
        };
        let transport = match kind {
            TransportKind::Stdio => {
                let stdio: StdioParameters = serde_json::from_value(parameters).map_err(invalid)?;
                stdio.validate()?;
                Self::Stdio(stdio)
            }
            TransportKind::Sse => {
                let mut sse: SseParameters = serde_json::from_value(parameters).map_err(invalid)?;
                sse.url = validate_url(sse.url)?;
                Self::Sse(sse)
            }
            TransportKind::StreamableHttp => {
                let mut streamable: StreamableHttpParameters =
                    serde_json::from_value(parameters).map_err(invalid)?;
                streamable.url = validate_url(streamable.url)?;
                Self::StreamableHttp(streamable)
            }
        };
        Ok(transport)
    }
}

/// Configuration of one downstream tool provider.
///
/// The server name is the identity key: equality and hashing consider the
/// name alone, so two configurations with the same name describe the same
/// server regardless of their other settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawServerConfig", into = "RawServerConfig")]
pub struct DownstreamServerConfig {
    name: String,
    transport: TransportConfig,
    disabled: bool,
    forbidden_tools: BTreeSet<String>,
    tool_meta: BTreeMap<String, ToolMeta>,
    default_tool_meta: Option<ToolMeta>,
}

impl DownstreamServerConfig {
    /// Creates an enabled configuration with no tool overrides.
    ///
    /// # Errors
    ///
    /// Returns [`DownstreamConfigError::EmptyServerName`] when the name is
    /// empty after trimming.
    pub fn new(
        name: impl Into<String>,
        transport: TransportConfig,
    ) -> Result<Self, DownstreamConfigError> {
        let normalized = name.into().trim().to_owned();
        if normalized.is_empty() {
            return Err(DownstreamConfigError::EmptyServerName);
        }

        Ok(Self {
            name: normalized,
            transport,
            disabled: false,
            forbidden_tools: BTreeSet::new(),
            tool_meta: BTreeMap::new(),
            default_tool_meta: None,
        })
    }

    /// Marks the server disabled or enabled.
    #[must_use]
    pub const fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Replaces the set of forbidden tool names.
    #[must_use]
    pub fn with_forbidden_tools(mut self, values: impl IntoIterator<Item = String>) -> Self {
        self.forbidden_tools = values.into_iter().collect();
        self
    }

    /// Declares metadata for the tool originally named `tool_name`.
    #[must_use]
    pub fn with_tool_meta(mut self, tool_name: impl Into<String>, meta: ToolMeta) -> Self {
        self.tool_meta.insert(tool_name.into(), meta);
        self
    }

    /// Sets metadata used for tools without an explicit entry.
    #[must_use]
    pub fn with_default_tool_meta(mut self, meta: ToolMeta) -> Self {
        self.default_tool_meta = Some(meta);
        self
    }

    /// Returns the server name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the transport configuration.
    #[must_use]
    pub const fn transport(&self) -> &TransportConfig {
        &self.transport
    }

    /// Returns whether the server is disabled.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the forbidden tool names.
    #[must_use]
    pub const fn forbidden_tools(&self) -> &BTreeSet<String> {
        &self.forbidden_tools
    }

    /// Returns explicitly declared tool metadata keyed by original name.
    #[must_use]
    pub const fn tool_meta(&self) -> &BTreeMap<String, ToolMeta> {
        &self.tool_meta
    }

    /// Returns the fallback tool metadata.
    #[must_use]
    pub const fn default_tool_meta(&self) -> Option<&ToolMeta> {
        self.default_tool_meta.as_ref()
    }

    /// Returns the metadata in force for `original_name`.
    #[must_use]
    pub fn tool_meta_for(&self, original_name: &str) -> Option<&ToolMeta> {
        self.tool_meta
            .get(original_name)
            .or(self.default_tool_meta.as_ref())
    }

    /// Returns the name under which `original_name` is exposed.
    ///
    /// Only explicit per-tool metadata may rename a tool; a default alias
    /// would collapse every tool of the server onto one name.
    #[must_use]
    pub fn effective_name<'a>(&'a self, original_name: &'a str) -> &'a str {
        self.tool_meta
            .get(original_name)
            .and_then(ToolMeta::effective_alias)
            .unwrap_or(original_name)
    }

    /// Returns whether either name of a tool is forbidden.
    #[must_use]
    pub fn is_forbidden(&self, effective_name: &str, original_name: &str) -> bool {
        self.forbidden_tools.contains(effective_name) || self.forbidden_tools.contains(original_name)
    }
}

impl PartialEq for DownstreamServerConfig {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for DownstreamServerConfig {}

impl Hash for DownstreamServerConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Serialized form of [`DownstreamServerConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawServerConfig {
    name: String,
    #[serde(rename = "type")]
    kind: TransportKind,
    server_parameters: Value,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    forbidden_tools: BTreeSet<String>,
    #[serde(default)]
    tool_meta: BTreeMap<String, ToolMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_tool_meta: Option<ToolMeta>,
}

impl TryFrom<RawServerConfig> for DownstreamServerConfig {
    type Error = DownstreamConfigError;

    fn try_from(raw: RawServerConfig) -> Result<Self, Self::Error> {
        let transport = TransportConfig::from_parts(raw.kind, raw.server_parameters)?;
        let mut config = Self::new(raw.name, transport)?
            .with_disabled(raw.disabled)
            .with_forbidden_tools(raw.forbidden_tools);
        config.tool_meta = raw.tool_meta;
        config.default_tool_meta = raw.default_tool_meta;
        Ok(config)
    }
}

impl From<DownstreamServerConfig> for RawServerConfig {
    fn from(config: DownstreamServerConfig) -> Self {
        Self {
            kind: config.transport.kind(),
            server_parameters: config.transport.parameters_to_value(),
            name: config.name,
            disabled: config.disabled,
            forbidden_tools: config.forbidden_tools,
            tool_meta: config.tool_meta,
            default_tool_meta: config.default_tool_meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use std::collections::HashSet;

    fn stdio_config(name: &str) -> DownstreamServerConfig {
        DownstreamServerConfig::new(
            name,
            TransportConfig::stdio("mcp-server").expect("valid transport"),
        )
        .expect("valid config")
    }

    #[test]
    fn configs_with_same_name_are_equal_and_deduplicate() {
        let first = stdio_config("files");
        let second = stdio_config("files").with_disabled(true);

        assert_eq!(first, second);
        let set: HashSet<_> = [first, second].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn blank_server_name_is_rejected(#[case] name: &str) {
        let transport = TransportConfig::stdio("mcp-server").expect("valid transport");
        let result = DownstreamServerConfig::new(name, transport);
        assert_eq!(result, Err(DownstreamConfigError::EmptyServerName));
    }

    #[rstest]
    #[case("", DownstreamConfigError::EmptyUrl)]
    #[case("ftp://host", DownstreamConfigError::InvalidUrl("ftp://host".to_owned()))]
    fn invalid_urls_are_rejected(#[case] url: &str, #[case] expected: DownstreamConfigError) {
        assert_eq!(TransportConfig::sse(url), Err(expected));
    }

    #[test]
    fn alias_only_comes_from_explicit_tool_meta() {
        let config = stdio_config("files")
            .with_tool_meta("read", ToolMeta::aliased("files_read"))
            .with_default_tool_meta(ToolMeta::aliased("ignored").with_auto_apply(true));

        assert_eq!(config.effective_name("read"), "files_read");
        assert_eq!(config.effective_name("write"), "write");
        assert!(
            config
                .tool_meta_for("write")
                .is_some_and(ToolMeta::is_auto_apply)
        );
    }

    #[test]
    fn blank_alias_falls_back_to_original_name() {
        let config = stdio_config("files").with_tool_meta("read", ToolMeta::aliased("  "));
        assert_eq!(config.effective_name("read"), "read");
    }

    #[test]
    fn deserializes_tagged_configuration() {
        let config: DownstreamServerConfig = serde_json::from_value(json!({
            "name": "web",
            "type": "streamable_http",
            "server_parameters": {"url": "http://localhost:8000/mcp"},
            "forbidden_tools": ["delete"],
            "tool_meta": {"fetch": {"alias": "web_fetch", "auto_apply": true, "tier": 2}}
        }))
        .expect("configuration should parse");

        assert_eq!(config.transport().kind(), TransportKind::StreamableHttp);
        assert!(config.forbidden_tools().contains("delete"));
        let meta = config.tool_meta_for("fetch").expect("meta should exist");
        assert_eq!(meta.extra.get("tier"), Some(&json!(2)));
        assert!(meta.is_auto_apply());

        let encoded = serde_json::to_value(&config).expect("configuration should serialize");
        assert_eq!(encoded.get("type"), Some(&json!("streamable_http")));
        assert_eq!(
            encoded.pointer("/server_parameters/url"),
            Some(&json!("http://localhost:8000/mcp"))
        );
    }

    #[test]
    fn deserialization_validates_transport_parameters() {
        let result: Result<DownstreamServerConfig, _> = serde_json::from_value(json!({
            "name": "local",
            "type": "stdio",
            "server_parameters": {"command": "  "}
        }));
        assert!(result.is_err());
    }
}
