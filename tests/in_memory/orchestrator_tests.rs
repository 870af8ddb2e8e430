//! Confirmation flow and Agent-facing views of [`ToolOrchestrator`].

use super::helpers::{Bench, EAGER, bench, server, text_args};
use async_trait::async_trait;
use mockable::DefaultClock;
use rstest::rstest;
use serde_json::json;
use smcp::computer::{ConfirmationError, ConfirmationPolicy, ConfirmationRequest, ToolOrchestrator};
use smcp::downstream::adapters::InMemoryClientFactory;
use smcp::downstream::domain::ToolMeta;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type TestOrchestrator = ToolOrchestrator<InMemoryClientFactory, DefaultClock>;

/// Approves every call after `delay`, recording what it was asked.
struct RecordingPolicy {
    delay: Duration,
    seen: Mutex<Vec<ConfirmationRequest>>,
}

impl RecordingPolicy {
    fn after(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<ConfirmationRequest> {
        self.seen.lock().expect("policy lock").clone()
    }
}

#[async_trait]
impl ConfirmationPolicy for RecordingPolicy {
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<bool, ConfirmationError> {
        self.seen.lock().expect("policy lock").push(request.clone());
        tokio::time::sleep(self.delay).await;
        Ok(true)
    }
}

async fn booted(bench: &Bench, policy: Arc<RecordingPolicy>) -> TestOrchestrator {
    bench.serve("shell", &["run", "status"]);
    let orchestrator = ToolOrchestrator::new(bench.manager(EAGER))
        .with_policy(policy)
        .with_confirm_timeout(Duration::from_millis(100))
        .with_inputs(vec![json!({"id": "token", "type": "promptString"})]);
    orchestrator
        .boot([server("shell")
            .with_tool_meta("status", ToolMeta::default().with_auto_apply(true))
            .with_tool_meta("run", ToolMeta::aliased("shell_run"))])
        .await
        .expect("boot should succeed");
    orchestrator
}

#[rstest]
#[tokio::test]
async fn approved_call_reaches_the_server(bench: Bench) {
    let policy = RecordingPolicy::after(Duration::ZERO);
    let orchestrator = booted(&bench, Arc::clone(&policy)).await;

    let result = orchestrator
        .execute_tool("req-1", "shell_run", text_args("ls"), None)
        .await;

    assert!(!result.is_error);
    assert_eq!(result.text_content(), "ls");
    let seen = policy.seen();
    assert_eq!(seen.len(), 1);
    let asked = seen.first().expect("one confirmation");
    assert_eq!(asked.req_id, "req-1");
    assert_eq!(asked.server, "shell");
    assert_eq!(asked.tool_name, "run");
}

#[rstest]
#[tokio::test]
async fn auto_apply_tool_skips_the_policy(bench: Bench) {
    let policy = RecordingPolicy::after(Duration::ZERO);
    let orchestrator = booted(&bench, Arc::clone(&policy)).await;

    let result = orchestrator
        .execute_tool("req-2", "status", text_args("ok"), None)
        .await;

    assert_eq!(result.text_content(), "ok");
    assert!(policy.seen().is_empty());
}

#[rstest]
#[tokio::test]
async fn forbidden_original_name_is_refused_without_confirmation(bench: Bench) {
    bench.serve("files", &["delete"]);
    let policy = RecordingPolicy::after(Duration::ZERO);
    let orchestrator = ToolOrchestrator::new(bench.manager(EAGER)).with_policy(Arc::clone(&policy) as Arc<dyn ConfirmationPolicy>);
    orchestrator
        .boot([server("files")
            .with_tool_meta("delete", ToolMeta::aliased("files_delete"))
            .with_forbidden_tools(["delete".to_owned()])])
        .await
        .expect("boot should succeed");

    for name in ["delete", "files_delete"] {
        let result = orchestrator
            .execute_tool("req-f", name, text_args("x"), None)
            .await;
        assert!(result.is_error);
        assert_eq!(
            result
                .structured_content
                .as_ref()
                .and_then(|content| content.get("error_type")),
            Some(&json!("PermissionDenied"))
        );
    }
    assert!(policy.seen().is_empty());
}

#[rstest]
#[tokio::test]
async fn slow_confirmation_yields_a_failed_result(bench: Bench) {
    let orchestrator = booted(&bench, RecordingPolicy::after(Duration::from_secs(5))).await;

    let result = orchestrator
        .execute_tool("req-3", "shell_run", text_args("ls"), None)
        .await;

    assert!(result.is_error);
    assert_eq!(
        result
            .structured_content
            .as_ref()
            .and_then(|content| content.get("error_type")),
        Some(&json!("ConfirmationTimeout"))
    );
}

#[rstest]
#[tokio::test]
async fn config_view_lists_servers_and_inputs(bench: Bench) {
    let orchestrator = booted(&bench, RecordingPolicy::after(Duration::ZERO)).await;

    let reply = orchestrator.get_config();

    let shell = reply.servers.get("shell").expect("shell configured");
    assert_eq!(shell.get("type"), Some(&json!("stdio")));
    assert_eq!(reply.inputs.len(), 1);
    let names: Vec<String> = orchestrator
        .get_tools()
        .into_iter()
        .map(|tool| tool.name)
        .collect();
    assert_eq!(names, vec!["shell_run".to_owned(), "status".to_owned()]);
}

#[rstest]
#[tokio::test]
async fn shutdown_clears_the_configuration(bench: Bench) {
    let orchestrator = booted(&bench, RecordingPolicy::after(Duration::ZERO)).await;

    orchestrator.shutdown().await;

    assert!(orchestrator.get_config().servers.is_empty());
    assert!(orchestrator.get_tools().is_empty());
}
