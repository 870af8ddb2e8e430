//! Client factory keyed on the configured transport tag.

use super::{SseClient, StdioClient, StreamableHttpClient};
use crate::downstream::{
    domain::{DownstreamServerConfig, TransportConfig},
    ports::{ClientFactory, DownstreamClient},
};
use std::sync::Arc;

/// Creates the concrete network client matching a server's transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportClientFactory;

impl ClientFactory for TransportClientFactory {
    fn create(&self, config: &DownstreamServerConfig) -> Arc<dyn DownstreamClient> {
        match config.transport() {
            TransportConfig::Stdio(parameters) => Arc::new(StdioClient::new(parameters.clone())),
            TransportConfig::Sse(parameters) => Arc::new(SseClient::new(parameters.clone())),
            TransportConfig::StreamableHttp(parameters) => {
                Arc::new(StreamableHttpClient::new(parameters.clone()))
            }
        }
    }
}
