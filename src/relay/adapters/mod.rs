//! Network adapters for the relay.

mod tcp;

pub use tcp::RelayServer;
