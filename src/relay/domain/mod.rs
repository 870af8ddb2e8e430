//! Relay membership model.

mod directory;
mod error;
mod participant;

pub use directory::RoomDirectory;
pub use error::{ParseRoleError, RelayDomainError};
pub use participant::{OfficeId, ParticipantId, ParticipantRecord, Role, RoleBinding};
