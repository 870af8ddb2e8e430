//! Registry rebuilds, rollback and execution through [`ToolManager`].

use super::helpers::{Bench, EAGER, LAZY, bench, server, text_args};
use rstest::rstest;
use serde_json::{Map, json};
use smcp::downstream::domain::{A2C_TOOL_META, ConnectionState, ToolMeta};
use smcp::registry::services::{ManagerError, ManagerOptions};
use std::time::Duration;

#[rstest]
#[tokio::test]
async fn alias_routes_to_original_name(bench: Bench) {
    let client = bench.serve("files", &["read"]);
    let manager = bench.manager(EAGER);
    manager
        .initialize([server("files").with_tool_meta("read", ToolMeta::aliased("files_read"))])
        .await
        .expect("initialisation should succeed");

    let result = manager
        .execute("files_read", text_args("hi"), None)
        .await
        .expect("aliased call should succeed");

    assert_eq!(result.text_content(), "hi");
    let calls = client.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls.first().map(|(tool, _)| tool.as_str()), Some("read"));
    let meta = result.meta.expect("declared metadata is merged");
    assert_eq!(
        meta.get(A2C_TOOL_META),
        Some(&json!({"alias": "files_read"}))
    );
    assert!(matches!(
        manager.execute("read", Map::new(), None).await,
        Err(ManagerError::ToolNotFound(_))
    ));
}

#[rstest]
#[tokio::test]
async fn conflicting_initialisation_leaves_nothing_active(bench: Bench) {
    bench.serve("alpha", &["search"]);
    bench.serve("beta", &["search"]);
    let manager = bench.manager(EAGER);

    let err = manager
        .initialize([server("alpha"), server("beta")])
        .await
        .expect_err("duplicate effective names should conflict");

    let ManagerError::ConfigConflict(conflict) = &err else {
        panic!("expected a conflict, got {err:?}");
    };
    let message = conflict.to_string();
    assert!(message.contains("alpha/search"));
    assert!(message.contains("beta/search"));
    assert!(manager.active_servers().is_empty());
    assert!(manager.configs().is_empty());
    assert!(manager.registry().is_empty());
}

#[rstest]
#[tokio::test]
async fn conflicting_start_rolls_back_only_that_server(bench: Bench) {
    bench.serve("alpha", &["search"]);
    let beta = bench.serve("beta", &["search"]);
    let manager = bench.manager(LAZY);
    manager
        .initialize([server("alpha"), server("beta")])
        .await
        .expect("lazy initialisation should succeed");
    manager.start("alpha").await.expect("alpha should start");

    let err = manager.start("beta").await.expect_err("beta should conflict");

    assert_eq!(err.kind(), "ConfigConflict");
    assert_eq!(manager.active_servers(), vec!["alpha".to_owned()]);
    assert!(!beta.is_connected());
    assert_eq!(beta.disconnect_count(), 1);
    let resolved = manager.resolve_tool("search").expect("alpha keeps its tool");
    assert_eq!(resolved.server, "alpha");
}

#[rstest]
#[tokio::test]
async fn alias_resolves_a_conflict(bench: Bench) {
    bench.serve("alpha", &["search"]);
    bench.serve("beta", &["search"]);
    let manager = bench.manager(EAGER);

    manager
        .initialize([
            server("alpha"),
            server("beta").with_tool_meta("search", ToolMeta::aliased("beta_search")),
        ])
        .await
        .expect("aliased names should not conflict");

    let names: Vec<String> = manager
        .available_tools()
        .into_iter()
        .map(|tool| tool.descriptor.name)
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"search".to_owned()));
    assert!(names.contains(&"beta_search".to_owned()));
}

#[rstest]
#[case::by_alias("files_delete")]
#[case::by_original("delete")]
#[tokio::test]
async fn forbidden_tools_are_visible_but_refused(bench: Bench, #[case] forbidden: &str) {
    let client = bench.serve("files", &["delete", "read"]);
    let manager = bench.manager(EAGER);
    manager
        .initialize([server("files")
            .with_tool_meta("delete", ToolMeta::aliased("files_delete"))
            .with_forbidden_tools([forbidden.to_owned()])])
        .await
        .expect("initialisation should succeed");

    let err = manager
        .execute("files_delete", Map::new(), None)
        .await
        .expect_err("forbidden tool should be refused");

    assert_eq!(err.kind(), "PermissionDenied");
    assert!(client.calls().is_empty());
    let listed = manager
        .available_tools()
        .into_iter()
        .find(|tool| tool.descriptor.name == "files_delete")
        .expect("forbidden tool stays listed");
    assert!(listed.disabled);
}

#[rstest]
#[tokio::test]
async fn forbidding_an_original_name_leaves_other_servers_alone(bench: Bench) {
    let alpha = bench.serve("alpha", &["read"]);
    let beta = bench.serve("beta", &["read"]);
    let manager = bench.manager(EAGER);
    manager
        .initialize([
            server("alpha")
                .with_tool_meta("read", ToolMeta::aliased("alpha_read"))
                .with_forbidden_tools(["read".to_owned()]),
            server("beta"),
        ])
        .await
        .expect("alias keeps the names apart");

    let result = manager
        .execute("read", text_args("hi"), None)
        .await
        .expect("beta's read is not forbidden");
    let refused = manager
        .execute("alpha_read", text_args("hi"), None)
        .await
        .expect_err("alpha's read stays forbidden");

    assert_eq!(result.text_content(), "hi");
    assert_eq!(beta.calls().len(), 1);
    assert_eq!(refused.kind(), "PermissionDenied");
    assert!(alpha.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn hot_swap_applies_new_configuration(bench: Bench) {
    let client = bench.serve("files", &["read"]);
    let manager = bench.manager(EAGER);
    manager
        .initialize([server("files")])
        .await
        .expect("initialisation should succeed");

    manager
        .add_or_update(server("files").with_tool_meta("read", ToolMeta::aliased("cat")))
        .await
        .expect("hot swap should succeed");

    assert!(manager.resolve_tool("cat").is_ok());
    assert!(manager.resolve_tool("read").is_err());
    assert_eq!(client.connect_count(), 2);
    assert_eq!(manager.active_servers(), vec!["files".to_owned()]);
}

#[rstest]
#[tokio::test]
async fn conflicting_hot_swap_restores_previous_configuration(bench: Bench) {
    bench.serve("alpha", &["search"]);
    bench.serve("beta", &["lookup"]);
    let manager = bench.manager(EAGER);
    manager
        .initialize([server("alpha"), server("beta")])
        .await
        .expect("initialisation should succeed");

    let err = manager
        .add_or_update(server("beta").with_tool_meta("lookup", ToolMeta::aliased("search")))
        .await
        .expect_err("alias collides with alpha");

    assert_eq!(err.kind(), "ConfigConflict");
    let restored = manager.config("beta").expect("beta stays configured");
    assert_eq!(restored.effective_name("lookup"), "lookup");
    assert_eq!(manager.active_servers(), vec!["alpha".to_owned()]);
}

#[rstest]
#[tokio::test]
async fn updating_active_server_without_hot_swap_is_refused(bench: Bench) {
    bench.serve("files", &["read"]);
    let manager = bench.manager(ManagerOptions {
        auto_connect: true,
        auto_reconnect: false,
    });
    manager
        .initialize([server("files")])
        .await
        .expect("initialisation should succeed");

    let err = manager
        .add_or_update(server("files").with_disabled(true))
        .await
        .expect_err("active server cannot be replaced");

    assert!(matches!(err, ManagerError::ServerActive(name) if name == "files"));
}

#[rstest]
#[tokio::test]
async fn removing_unknown_server_is_not_found(bench: Bench) {
    let manager = bench.manager(LAZY);

    let err = manager.remove("ghost").await.expect_err("unknown server");

    assert_eq!(err.kind(), "NotFound");
}

#[rstest]
#[tokio::test]
async fn disabled_server_cannot_start(bench: Bench) {
    bench.serve("files", &["read"]);
    let manager = bench.manager(EAGER);
    manager
        .initialize([server("files").with_disabled(true)])
        .await
        .expect("disabled servers are skipped");

    let err = manager.start("files").await.expect_err("disabled server");

    assert!(matches!(err, ManagerError::ServerDisabled(_)));
    assert!(manager.active_servers().is_empty());
}

#[rstest]
#[tokio::test]
async fn slow_tool_times_out(bench: Bench) {
    let client = bench.serve("slow", &["wait"]);
    client.set_call_delay(Duration::from_millis(500));
    let manager = bench.manager(EAGER);
    manager
        .initialize([server("slow")])
        .await
        .expect("initialisation should succeed");

    let err = manager
        .execute("wait", Map::new(), Some(Duration::from_millis(20)))
        .await
        .expect_err("call should time out");

    assert_eq!(err.kind(), "Timeout");
}

#[rstest]
#[tokio::test]
async fn downstream_failure_is_reported(bench: Bench) {
    let client = bench.serve("files", &["read"]);
    client.fail_tool("read");
    let manager = bench.manager(EAGER);
    manager
        .initialize([server("files")])
        .await
        .expect("initialisation should succeed");

    let err = manager
        .execute("read", Map::new(), None)
        .await
        .expect_err("remote failure");

    assert_eq!(err.kind(), "Downstream");
}

#[rstest]
#[tokio::test]
async fn stopping_removes_tools_and_status_follows(bench: Bench) {
    bench.serve("files", &["read"]);
    bench.serve("search", &["query"]);
    let manager = bench.manager(EAGER);
    manager
        .initialize([server("files"), server("search")])
        .await
        .expect("initialisation should succeed");

    manager.stop("files").await.expect("stop should succeed");

    assert!(matches!(
        manager.execute("read", Map::new(), None).await,
        Err(ManagerError::ToolNotFound(_))
    ));
    let statuses = manager.server_status().await;
    assert_eq!(statuses.len(), 2);
    let files = statuses.iter().find(|status| status.name == "files").expect("files status");
    let search = statuses.iter().find(|status| status.name == "search").expect("search status");
    assert!(!files.active);
    assert_eq!(files.state, None);
    assert!(search.active);
    assert_eq!(search.state, Some(ConnectionState::Connected));
}

#[rstest]
#[tokio::test]
async fn paginated_listings_are_aggregated(bench: Bench) {
    let client = bench.serve("many", &["one", "two", "three"]);
    client.set_page_size(1);
    let manager = bench.manager(EAGER);

    manager
        .initialize([server("many")])
        .await
        .expect("initialisation should succeed");

    assert_eq!(manager.registry().len(), 3);
}

#[rstest]
#[tokio::test]
async fn close_forgets_everything(bench: Bench) {
    let client = bench.serve("files", &["read"]);
    let manager = bench.manager(EAGER);
    manager
        .initialize([server("files")])
        .await
        .expect("initialisation should succeed");

    manager.close().await;

    assert!(manager.configs().is_empty());
    assert!(manager.active_servers().is_empty());
    assert!(!client.is_connected());
}
