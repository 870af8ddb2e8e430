//! MCP client for the streamable HTTP transport.

use super::event_stream::SseEventCodec;
use super::jsonrpc::{self, JsonRpcChannel, PendingRequests};
use super::sse::apply_headers;
use crate::downstream::{
    domain::{CallToolResult, StreamableHttpParameters, ToolPage},
    ports::{DownstreamClient, TransportError, TransportResult},
};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

const SESSION_HEADER: &str = "mcp-session-id";

struct HttpSession {
    http: reqwest::Client,
    session_id: Option<String>,
}

/// JSON-RPC over `POST`ed requests answered with JSON or SSE bodies.
pub struct StreamableHttpClient {
    parameters: StreamableHttpParameters,
    pending: Arc<PendingRequests>,
    session: Mutex<Option<HttpSession>>,
}

impl StreamableHttpClient {
    /// Creates a client for the configured endpoint.
    #[must_use]
    pub fn new(parameters: StreamableHttpParameters) -> Self {
        Self {
            parameters,
            pending: Arc::new(PendingRequests::default()),
            session: Mutex::new(None),
        }
    }

    const fn timeout(&self) -> Duration {
        Duration::from_secs(self.parameters.timeout_secs())
    }

    const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.parameters.sse_read_timeout_secs())
    }

    async fn consume_event_stream(
        &self,
        response: reqwest::Response,
        request_id: Option<u64>,
    ) -> TransportResult<()> {
        let body = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        let mut events = FramedRead::new(body, SseEventCodec::default());

        while request_id.is_none_or(|id| self.pending.is_waiting(id)) {
            let next = tokio::time::timeout(self.read_timeout(), events.next())
                .await
                .map_err(|_| TransportError::Closed("response stream idle".to_owned()))?;
            let Some(decoded) = next else {
                break;
            };
            let event = decoded.map_err(TransportError::io)?;
            match serde_json::from_str::<Value>(&event.data) {
                Ok(message) => self.pending.dispatch(message),
                Err(err) => debug!(error = %err, "skipping non-JSON stream event"),
            }
        }
        Ok(())
    }

    async fn consume_json(&self, response: reqwest::Response) -> TransportResult<()> {
        let body: Value = response.json().await.map_err(TransportError::io)?;
        match body {
            Value::Array(messages) => messages
                .into_iter()
                .for_each(|message| self.pending.dispatch(message)),
            message => self.pending.dispatch(message),
        }
        Ok(())
    }
}

#[async_trait]
impl JsonRpcChannel for StreamableHttpClient {
    fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    async fn send(&self, message: Value) -> TransportResult<()> {
        let request_id = jsonrpc::request_id(&message);
        let (http, session_id) = {
            let guard = self.session.lock().await;
            let session = guard.as_ref().ok_or(TransportError::NotConnected)?;
            (session.http.clone(), session.session_id.clone())
        };

        let mut request = apply_headers(
            http.post(self.parameters.url())
                .header(ACCEPT, "application/json, text/event-stream")
                .json(&message),
            self.parameters.headers(),
        );
        if let Some(id) = session_id {
            request = request.header(SESSION_HEADER, id);
        }

        let response = tokio::time::timeout(self.timeout(), request.send())
            .await
            .map_err(|_| TransportError::Closed("request timed out".to_owned()))?
            .map_err(TransportError::io)?
            .error_for_status()
            .map_err(TransportError::io)?;

        if let Some(assigned) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            && let Some(session) = self.session.lock().await.as_mut()
        {
            session.session_id = Some(assigned.to_owned());
        }

        if request_id.is_none() || response.status() == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/event-stream"));
        if is_event_stream {
            self.consume_event_stream(response, request_id).await?;
        } else {
            self.consume_json(response).await?;
        }

        if let Some(id) = request_id.filter(|id| self.pending.is_waiting(*id)) {
            self.pending.cancel(id);
        }
        Ok(())
    }
}

#[async_trait]
impl DownstreamClient for StreamableHttpClient {
    async fn connect(&self) -> TransportResult<()> {
        let http = reqwest::Client::builder()
            .connect_timeout(self.timeout())
            .build()
            .map_err(TransportError::io)?;
        *self.session.lock().await = Some(HttpSession {
            http,
            session_id: None,
        });

        if let Err(err) = jsonrpc::handshake(self, self.timeout()).await {
            self.disconnect().await?;
            return Err(err);
        }
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        let session = self.session.lock().await.take();
        self.pending.fail_all("streamable HTTP session closed");

        let Some(HttpSession {
            http,
            session_id: Some(id),
        }) = session
        else {
            return Ok(());
        };
        if !self.parameters.terminate_on_close() {
            return Ok(());
        }

        let request = apply_headers(
            http.delete(self.parameters.url()).header(SESSION_HEADER, id),
            self.parameters.headers(),
        )
        .timeout(self.timeout());
        if let Err(err) = request.send().await {
            warn!(error = %err, "terminating remote session failed");
        }
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
