//! End-to-end tests of an Agent calling a Computer's tools through the
//! TCP relay.

use mockable::DefaultClock;
use serde_json::{Map, Value, json};
use smcp::computer::{ComputerEndpoint, Incoming, RelayClient, ToolOrchestrator};
use smcp::downstream::adapters::{InMemoryClientFactory, InMemoryDownstreamClient};
use smcp::downstream::domain::{CallToolResult, DownstreamServerConfig, ToolMeta, TransportConfig};
use smcp::protocol::{
    EnterOfficeNotification, GetToolsReply, GetToolsRequest, ToolCallRequest, events,
};
use smcp::registry::services::{ManagerOptions, ToolManager};
use smcp::relay::adapters::RelayServer;
use smcp::relay::domain::{OfficeId, Role};
use smcp::relay::services::SessionCoordinator;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

const STEP: Duration = Duration::from_secs(5);

struct Relay {
    address: SocketAddr,
    shutdown: CancellationToken,
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start_relay() -> Relay {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind an ephemeral port");
    let address = listener.local_addr().expect("listener address");
    let coordinator = Arc::new(SessionCoordinator::new(Arc::new(DefaultClock)));
    let server = RelayServer::new(coordinator);
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move { server.serve(listener, token).await });
    Relay { address, shutdown }
}

fn server_config(name: &str, tool: &str) -> DownstreamServerConfig {
    DownstreamServerConfig::new(name, TransportConfig::stdio("mcp-server").expect("valid transport"))
        .expect("valid server name")
        .with_tool_meta(tool, ToolMeta::default().with_auto_apply(true))
}

/// Starts a Computer exposing `echo` and a slow `nap` tool in office `lab`.
async fn start_computer(relay: &Relay) -> String {
    let factory = Arc::new(InMemoryClientFactory::new());
    factory.register(
        "echo",
        Arc::new(InMemoryDownstreamClient::with_tool_names(["echo"])),
    );
    let sleepy = Arc::new(InMemoryDownstreamClient::with_tool_names(["nap"]));
    sleepy.set_call_delay(Duration::from_millis(400));
    factory.register("sleepy", sleepy);

    let manager = ToolManager::new(factory, Arc::new(DefaultClock)).with_options(ManagerOptions {
        auto_connect: true,
        auto_reconnect: true,
    });
    let orchestrator = ToolOrchestrator::new(manager);
    orchestrator
        .boot([server_config("echo", "echo"), server_config("sleepy", "nap")])
        .await
        .expect("computer boots");

    let (client, incoming) = RelayClient::connect(relay.address)
        .await
        .expect("computer connects");
    let sid = client.sid().to_string();
    let endpoint = Arc::new(ComputerEndpoint::new(Arc::new(orchestrator), client.sid().clone()));
    endpoint
        .join_office(
            &client,
            OfficeId::new("lab").expect("valid office"),
            "workstation",
            STEP,
        )
        .await
        .expect("computer joins");
    let relay_client = Arc::new(client);
    tokio::spawn(async move { endpoint.serve(&relay_client, incoming).await });
    sid
}

struct Agent {
    client: RelayClient,
    incoming: UnboundedReceiver<Incoming>,
}

async fn start_agent(relay: &Relay) -> Agent {
    let (client, incoming) = RelayClient::connect(relay.address)
        .await
        .expect("agent connects");
    client
        .join_office(Role::Agent, "planner", "lab", STEP)
        .await
        .expect("agent joins");
    Agent { client, incoming }
}

fn tool_call(agent: &Agent, computer: &str, tool: &str, timeout_ms: u64) -> ToolCallRequest {
    let mut params = Map::new();
    params.insert("text".to_owned(), json!("hi"));
    ToolCallRequest {
        robot_id: agent.client.sid().to_string(),
        req_id: format!("req-{tool}"),
        computer: computer.to_owned(),
        tool_name: tool.to_owned(),
        params,
        timeout_ms,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn agent_sees_computer_enter_and_calls_its_tool() {
    let relay = start_relay().await;
    let mut agent = start_agent(&relay).await;
    let computer = start_computer(&relay).await;

    let notice = tokio::time::timeout(STEP, agent.incoming.recv())
        .await
        .expect("enter notification in time")
        .expect("agent connection open");
    assert_eq!(notice.event(), events::ENTER_OFFICE_NOTIFICATION);
    let entered: EnterOfficeNotification = notice.decode().expect("enter payload");
    assert_eq!(entered.computer.as_deref(), Some(computer.as_str()));

    let result: CallToolResult = agent
        .client
        .call(events::TOOL_CALL, &tool_call(&agent, &computer, "echo", 2_000), STEP)
        .await
        .expect("tool call reply");

    assert!(!result.is_error);
    assert_eq!(result.text_content(), "hi");
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_tool_times_out_then_relay_keeps_serving() {
    let relay = start_relay().await;
    let agent = start_agent(&relay).await;
    let computer = start_computer(&relay).await;

    let timed_out: CallToolResult = agent
        .client
        .call(events::TOOL_CALL, &tool_call(&agent, &computer, "nap", 50), STEP)
        .await
        .expect("timeout reply");
    let echoed: CallToolResult = agent
        .client
        .call(events::TOOL_CALL, &tool_call(&agent, &computer, "echo", 2_000), STEP)
        .await
        .expect("later call reply");

    assert!(timed_out.is_error);
    assert_eq!(
        timed_out
            .structured_content
            .as_ref()
            .and_then(|content| content.get("error_type"))
            .and_then(Value::as_str),
        Some("Timeout")
    );
    assert_eq!(echoed.text_content(), "hi");
}

#[tokio::test(flavor = "multi_thread")]
async fn agent_lists_computer_tools() {
    let relay = start_relay().await;
    let agent = start_agent(&relay).await;
    let computer = start_computer(&relay).await;

    let request = GetToolsRequest {
        robot_id: agent.client.sid().to_string(),
        req_id: "list-1".to_owned(),
        computer,
    };
    let reply: GetToolsReply = agent
        .client
        .call(events::GET_TOOLS, &request, STEP)
        .await
        .expect("tool listing");

    assert_eq!(reply.req_id, "list-1");
    let names: Vec<&str> = reply.tools.iter().map(|tool| tool.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "nap"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn second_agent_is_turned_away() {
    let relay = start_relay().await;
    let _first = start_agent(&relay).await;
    let (intruder, _incoming) = RelayClient::connect(relay.address)
        .await
        .expect("second agent connects");

    let err = intruder
        .join_office(Role::Agent, "shadow", "lab", STEP)
        .await
        .expect_err("office already has an agent");

    assert!(err.to_string().contains("lab"));
}
