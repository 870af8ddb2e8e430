//! MCP client for the legacy HTTP+SSE transport.
//!
//! The server streams responses over a long-lived `GET` event stream whose
//! first `endpoint` event names the URL that requests are `POST`ed to.

use super::event_stream::SseEventCodec;
use super::jsonrpc::{self, JsonRpcChannel, PendingRequests};
use crate::downstream::{
    domain::{CallToolResult, SseParameters, ToolPage},
    ports::{DownstreamClient, TransportError, TransportResult},
};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{RequestBuilder, Url};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

const ENDPOINT_EVENT: &str = "endpoint";
const MESSAGE_EVENT: &str = "message";

/// Adds configured headers to an outgoing request.
pub(crate) fn apply_headers(
    builder: RequestBuilder,
    headers: &BTreeMap<String, String>,
) -> RequestBuilder {
    headers
        .iter()
        .fold(builder, |request, (name, value)| request.header(name, value))
}

struct SseSession {
    http: reqwest::Client,
    endpoint: Url,
    reader: JoinHandle<()>,
}

/// JSON-RPC over an SSE response stream plus `POST`ed requests.
pub struct SseClient {
    parameters: SseParameters,
    pending: Arc<PendingRequests>,
    session: Mutex<Option<SseSession>>,
}

impl SseClient {
    /// Creates a client for the configured event-stream URL.
    #[must_use]
    pub fn new(parameters: SseParameters) -> Self {
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

    async fn open_stream(&self) -> TransportResult<SseSession> {
        let base = Url::parse(self.parameters.url()).map_err(TransportError::io)?;
        let http = reqwest::Client::builder()
            .connect_timeout(self.timeout())
            .build()
            .map_err(TransportError::io)?;

        let request = apply_headers(
            http.get(base.clone())
                .header(reqwest::header::ACCEPT, "text/event-stream"),
            self.parameters.headers(),
        );
        let response = tokio::time::timeout(self.timeout(), request.send())
            .await
            .map_err(|_| TransportError::Closed("timed out opening event stream".to_owned()))?
            .map_err(TransportError::io)?
            .error_for_status()
            .map_err(TransportError::io)?;

        let body = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        let mut events = FramedRead::new(body, SseEventCodec::default());

        let endpoint = tokio::time::timeout(self.timeout(), async {
            while let Some(next) = events.next().await {
                let event = next.map_err(TransportError::io)?;
                if event.event == ENDPOINT_EVENT {
                    return base.join(event.data.trim()).map_err(TransportError::io);
                }
            }
            Err(TransportError::Closed(
                "event stream ended before the endpoint event".to_owned(),
            ))
        })
        .await
        .map_err(|_| TransportError::Closed("no endpoint event received".to_owned()))??;
        debug!(%endpoint, "SSE endpoint announced");

        let pending = Arc::clone(&self.pending);
        let read_timeout = self.read_timeout();
        let reader = tokio::spawn(async move {
            loop {
                match tokio::time::timeout(read_timeout, events.next()).await {
                    Ok(Some(Ok(event))) if event.event == MESSAGE_EVENT => {
                        match serde_json::from_str::<Value>(&event.data) {
                            Ok(message) => pending.dispatch(message),
                            Err(err) => debug!(error = %err, "skipping non-JSON SSE message"),
                        }
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(err))) => {
                        warn!(error = %err, "event stream failed");
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!("event stream idle beyond read timeout");
                        break;
                    }
                }
            }
            pending.fail_all("event stream closed");
        });

        Ok(SseSession {
            http,
            endpoint,
            reader,
        })
    }
}

#[async_trait]
impl JsonRpcChannel for SseClient {
    fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    async fn send(&self, message: Value) -> TransportResult<()> {
        let (http, endpoint) = {
            let guard = self.session.lock().await;
            let session = guard.as_ref().ok_or(TransportError::NotConnected)?;
            (session.http.clone(), session.endpoint.clone())
        };

        let request = apply_headers(http.post(endpoint).json(&message), self.parameters.headers())
            .timeout(self.timeout());
        request
            .send()
            .await
            .map_err(TransportError::io)?
            .error_for_status()
            .map_err(TransportError::io)?;
        Ok(())
    }
}

#[async_trait]
impl DownstreamClient for SseClient {
    async fn connect(&self) -> TransportResult<()> {
        let session = self.open_stream().await?;
        *self.session.lock().await = Some(session);

        if let Err(err) = jsonrpc::handshake(self, self.timeout()).await {
            self.disconnect().await?;
            return Err(err);
        }
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if let Some(session) = self.session.lock().await.take() {
            session.reader.abort();
        }
        self.pending.fail_all("SSE session closed");
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
