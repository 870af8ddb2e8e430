//! Registry value objects and the rebuild algorithm.

mod registry;

pub use registry::{NameCollision, RegistryEntry, ToolNameConflict, ToolOrigin, ToolRegistry};
