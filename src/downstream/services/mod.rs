//! Services driving downstream connections.

mod connection;

pub use connection::{ConnectionError, ConnectionResult, DownstreamConnection};
