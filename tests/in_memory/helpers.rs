//! Shared test helpers for in-memory integration tests.

use mockable::DefaultClock;
use rstest::fixture;
use serde_json::{Map, Value};
use smcp::downstream::{
    adapters::{InMemoryClientFactory, InMemoryDownstreamClient},
    domain::{DownstreamServerConfig, TransportConfig},
};
use smcp::registry::services::{ManagerOptions, ToolManager};
use std::sync::Arc;

/// Manager type driven by in-memory clients.
pub type TestManager = ToolManager<InMemoryClientFactory, DefaultClock>;

/// Registers in-memory servers and builds managers over them.
pub struct Bench {
    factory: Arc<InMemoryClientFactory>,
}

impl Bench {
    /// Makes `server` advertise bare tools named `tools`.
    pub fn serve(&self, server: &str, tools: &[&str]) -> Arc<InMemoryDownstreamClient> {
        let client = Arc::new(InMemoryDownstreamClient::with_tool_names(
            tools.iter().copied(),
        ));
        self.factory.register(server, Arc::clone(&client));
        client
    }

    /// Builds a manager with `options` over the registered servers.
    pub fn manager(&self, options: ManagerOptions) -> TestManager {
        ToolManager::new(Arc::clone(&self.factory), Arc::new(DefaultClock)).with_options(options)
    }
}

/// Provides an empty bench for each test.
#[fixture]
pub fn bench() -> Bench {
    Bench {
        factory: Arc::new(InMemoryClientFactory::new()),
    }
}

/// Eager connection with hot-swapping.
pub const EAGER: ManagerOptions = ManagerOptions {
    auto_connect: true,
    auto_reconnect: true,
};

/// Neither eager connection nor hot-swapping.
pub const LAZY: ManagerOptions = ManagerOptions {
    auto_connect: false,
    auto_reconnect: false,
};

/// Builds an enabled stdio configuration for `name`.
pub fn server(name: &str) -> DownstreamServerConfig {
    DownstreamServerConfig::new(
        name,
        TransportConfig::stdio("mcp-server").expect("valid stdio transport"),
    )
    .expect("valid server name")
}

/// Builds an argument object with one `text` field.
pub fn text_args(text: &str) -> Map<String, Value> {
    let mut arguments = Map::new();
    arguments.insert("text".to_owned(), Value::String(text.to_owned()));
    arguments
}
