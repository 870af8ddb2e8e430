//! Unified tool namespace over many downstream servers.
//!
//! The [`ToolManager`](services::ToolManager) owns the configured servers,
//! their live connections and the conflict-checked registry built from
//! their tool listings.

pub mod domain;
pub mod services;
