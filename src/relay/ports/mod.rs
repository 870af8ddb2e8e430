//! Ports through which the relay reaches participants.

mod link;

pub use link::{LinkClosed, ParticipantLink};
