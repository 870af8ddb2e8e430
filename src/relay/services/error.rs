//! Errors raised by the session coordinator.

use crate::protocol::FrameError;
use crate::relay::domain::{OfficeId, ParticipantId, RelayDomainError, Role};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`super::SessionCoordinator`].
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The payload carried an invalid identifier.
    #[error(transparent)]
    InvalidIdentifier(#[from] RelayDomainError),

    /// No participant with this id is connected.
    #[error("participant {0} is not connected")]
    UnknownParticipant(ParticipantId),

    /// The connection is already bound to another role.
    #[error("role mismatch: participant is bound as {bound}, requested {requested}")]
    RoleMismatch {
        /// Role bound on the first join.
        bound: Role,
        /// Role carried by the rejected join.
        requested: Role,
    },

    /// An Agent tried to join a second office.
    #[error("agent is already in office {current}")]
    AgentAlreadyInOffice {
        /// Office the Agent occupies.
        current: OfficeId,
    },

    /// The office already has an Agent.
    #[error("office {office} already has an agent")]
    OfficeOccupied {
        /// Contested office.
        office: OfficeId,
    },

    /// The participant is not a member of the named office.
    #[error("participant is not a member of office {office}")]
    NotMember {
        /// Office named by the request.
        office: OfficeId,
    },

    /// The participant has not joined any office.
    #[error("participant has not joined an office")]
    NotInOffice,

    /// The operation is reserved for another role.
    #[error("operation requires the {required} role")]
    RoleRequired {
        /// Role the operation needs.
        required: Role,
        /// Role the caller is bound to.
        actual: Option<Role>,
    },

    /// The request claims to come from another participant.
    #[error("request claims participant {claimed}")]
    CallerMismatch {
        /// Identifier carried by the payload.
        claimed: String,
    },

    /// The addressed participant is not a Computer.
    #[error("participant {0} is not a computer")]
    TargetNotComputer(ParticipantId),

    /// Caller and target are not in the same office.
    #[error("computer {target} is not in the caller's office")]
    NotSameOffice {
        /// Addressed Computer.
        target: ParticipantId,
    },

    /// The target did not acknowledge in time.
    #[error("{event} to {target} timed out after {timeout:?}")]
    Timeout {
        /// Forwarded event.
        event: String,
        /// Addressed participant.
        target: ParticipantId,
        /// Deadline applied.
        timeout: Duration,
    },

    /// The target disconnected before acknowledging.
    #[error("participant {target} disconnected before replying")]
    TargetGone {
        /// Addressed participant.
        target: ParticipantId,
    },

    /// A payload could not be encoded.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl CoordinatorError {
    /// Returns the error category reported to clients.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RoleMismatch { .. } => "RoleMismatch",
            Self::AgentAlreadyInOffice { .. } | Self::OfficeOccupied { .. } => "RoomOccupied",
            Self::UnknownParticipant(_)
            | Self::NotMember { .. }
            | Self::NotInOffice
            | Self::TargetGone { .. } => "NotFound",
            Self::RoleRequired { .. }
            | Self::CallerMismatch { .. }
            | Self::TargetNotComputer(_)
            | Self::NotSameOffice { .. } => "PermissionDenied",
            Self::Timeout { .. } => "Timeout",
            Self::InvalidIdentifier(_) | Self::Frame(_) => "InvalidRequest",
        }
    }
}

/// Result alias for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
