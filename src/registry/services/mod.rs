//! Registry services.

mod manager;

pub use manager::{
    AvailableTool, ManagerError, ManagerOptions, ManagerResult, ResolvedTool, ServerStatus,
    ToolManager,
};
