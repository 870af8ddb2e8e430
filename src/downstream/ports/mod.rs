//! Port contracts for downstream tool providers.

mod client;
mod observer;

pub use client::{ClientFactory, DownstreamClient, TransportError, TransportResult};
pub use observer::{ConnectionObserver, ObserverError};

#[cfg(test)]
pub(crate) use observer::MockConnectionObserver;
