//! MCP client for servers launched as child processes.

use super::jsonrpc::{self, JsonRpcChannel, PendingRequests};
use crate::downstream::{
    domain::{CallToolResult, StdioParameters, ToolPage},
    ports::{DownstreamClient, TransportError, TransportResult},
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};

struct StdioSession {
    child: Child,
    writer: FramedWrite<ChildStdin, LinesCodec>,
    reader: JoinHandle<()>,
}

/// Line-delimited JSON-RPC over a child process's stdin and stdout.
///
/// The child's stderr is inherited so server diagnostics reach the
/// operator's terminal.
pub struct StdioClient {
    parameters: StdioParameters,
    pending: Arc<PendingRequests>,
    session: Mutex<Option<StdioSession>>,
}

impl StdioClient {
    /// Creates a client that spawns the configured command on connect.
    #[must_use]
    pub fn new(parameters: StdioParameters) -> Self {
        Self {
            parameters,
            pending: Arc::new(PendingRequests::default()),
            session: Mutex::new(None),
        }
    }

    const fn timeout(&self) -> Duration {
        Duration::from_secs(self.parameters.timeout_secs())
    }

    fn spawn_child(&self) -> TransportResult<Child> {
        let mut command = Command::new(self.parameters.command());
        command
            .args(self.parameters.args())
            .envs(self.parameters.env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(cwd) = self.parameters.cwd() {
            command.current_dir(cwd);
        }
        command.spawn().map_err(TransportError::io)
    }

    fn spawn_reader(&self, stdout: tokio::process::ChildStdout) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        let command = self.parameters.command().to_owned();
        tokio::spawn(async move {
            let mut lines = FramedRead::new(stdout, LinesCodec::new());
            while let Some(next) = lines.next().await {
                match next {
                    Ok(line) if line.trim().is_empty() => {}
                    Ok(line) => match serde_json::from_str::<Value>(&line) {
                        Ok(message) => pending.dispatch(message),
                        Err(err) => debug!(%command, error = %err, "skipping non-JSON output line"),
                    },
                    Err(err) => {
                        warn!(%command, error = %err, "reading server output failed");
                        break;
                    }
                }
            }
            pending.fail_all("stdio server closed its output");
        })
    }
}

#[async_trait]
impl JsonRpcChannel for StdioClient {
    fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    async fn send(&self, message: Value) -> TransportResult<()> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(TransportError::NotConnected)?;
        session
            .writer
            .send(message.to_string())
            .await
            .map_err(TransportError::io)
    }
}

#[async_trait]
impl DownstreamClient for StdioClient {
    async fn connect(&self) -> TransportResult<()> {
        let mut child = self.spawn_child()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Closed("child stdin unavailable".to_owned()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Closed("child stdout unavailable".to_owned()))?;

        let reader = self.spawn_reader(stdout);
        *self.session.lock().await = Some(StdioSession {
            child,
            writer: FramedWrite::new(stdin, LinesCodec::new()),
            reader,
        });

        if let Err(err) = jsonrpc::handshake(self, self.timeout()).await {
            self.disconnect().await?;
            return Err(err);
        }
        debug!(command = self.parameters.command(), "stdio session established");
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        let Some(mut session) = self.session.lock().await.take() else {
            return Ok(());
        };
        drop(session.writer);
        session.reader.abort();
        if let Err(err) = session.child.kill().await {
            debug!(error = %err, "child already exited");
        }
        self.pending.fail_all("stdio session closed");
        Ok(())
    }

    async fn list_tools(&self, cursor: Option<String>) -> TransportResult<ToolPage> {
        jsonrpc::list_tools_page(self, cursor, self.timeout()).await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> TransportResult<CallToolResult> {
        jsonrpc::call_tool(self, name, arguments).await
    }
}
