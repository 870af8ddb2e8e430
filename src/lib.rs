//! smcp: tool aggregation for Computers and an office relay for Agents.
//!
//! A Computer connects to several downstream MCP servers, merges their
//! tools into one registry and executes calls on behalf of an Agent. Agents
//! and Computers meet in offices hosted by the relay, which forwards tool
//! calls and broadcasts membership changes.
//!
//! # Architecture
//!
//! Each context follows hexagonal architecture principles:
//!
//! - **Domain**: Pure state and rules with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for external interactions
//! - **Adapters**: Concrete transports (stdio, HTTP, TCP, in-memory)
//!
//! # Modules
//!
//! - [`downstream`]: Connections to MCP servers and their lifecycle
//! - [`registry`]: Tool registry and the manager that owns connections
//! - [`relay`]: Office membership and request forwarding
//! - [`computer`]: Confirmation-aware execution and the relay client
//! - [`protocol`]: Relay events, frames and payloads
//! - [`config`]: TOML settings
//! - [`telemetry`]: Tracing setup

pub mod computer;
pub mod config;
pub mod downstream;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod telemetry;
