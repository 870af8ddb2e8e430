//! Connection lifecycle states and the transition table that drives them.

use super::ParseConnectionStateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a downstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Created or reset; no transport held.
    Initialized,
    /// Transport open and session live.
    Connected,
    /// Transport released after an orderly disconnect.
    Disconnected,
    /// Transport released after a failure.
    Error,
}

impl ConnectionState {
    /// Returns the canonical representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }

    /// Returns whether tool operations are permitted.
    #[must_use]
    pub const fn can_use_tools(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns the action run when this state is entered.
    pub(crate) const fn entry_action(self) -> Action {
        match self {
            Self::Connected => Action::None,
            Self::Initialized | Self::Disconnected | Self::Error => Action::ReleaseSession,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ConnectionState {
    type Error = ParseConnectionStateError;

    fn try_from(value: &str) -> Result<Self, <Self as TryFrom<&str>>::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "initialized" => Ok(Self::Initialized),
            "connected" => Ok(Self::Connected),
            "disconnected" => Ok(Self::Disconnected),
            "error" => Ok(Self::Error),
            _ => Err(ParseConnectionStateError(value.to_owned())),
        }
    }
}

/// Named event that requests a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Open the transport and session.
    Connect,
    /// Close the session in an orderly way.
    Disconnect,
    /// Record a failure.
    Error,
    /// Reset to a reusable state.
    Reinitialize,
}

impl Trigger {
    /// Returns the trigger name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Error => "error",
            Self::Reinitialize => "reinitialize",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// States from which a transition may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Any,
    Only(ConnectionState),
}

/// Condition checked before a transition runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Guard {
    Always,
    SessionLive,
}

/// Side effect attached to a transition phase or a state entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    None,
    OpenSession,
    ReleaseSession,
    NotifyObserver,
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    trigger: Trigger,
    source: Source,
    target: ConnectionState,
    guard: Guard,
    before: Action,
    after: Action,
}

const TRANSITIONS: [Transition; 4] = [
    Transition {
        trigger: Trigger::Connect,
        source: Source::Only(ConnectionState::Initialized),
        target: ConnectionState::Connected,
        guard: Guard::Always,
        before: Action::OpenSession,
        after: Action::NotifyObserver,
    },
    Transition {
        trigger: Trigger::Disconnect,
        source: Source::Only(ConnectionState::Connected),
        target: ConnectionState::Disconnected,
        guard: Guard::SessionLive,
        before: Action::None,
        after: Action::NotifyObserver,
    },
    Transition {
        trigger: Trigger::Error,
        source: Source::Any,
        target: ConnectionState::Error,
        guard: Guard::Always,
        before: Action::None,
        after: Action::NotifyObserver,
    },
    Transition {
        trigger: Trigger::Reinitialize,
        source: Source::Any,
        target: ConnectionState::Initialized,
        guard: Guard::Always,
        before: Action::None,
        after: Action::NotifyObserver,
    },
];

impl Transition {
    /// Returns the row fired by `trigger` from `state`, if any.
    pub(crate) fn find(trigger: Trigger, state: ConnectionState) -> Option<Self> {
        TRANSITIONS
            .iter()
            .copied()
            .find(|row| row.trigger == trigger && row.starts_from(state))
    }

    fn starts_from(self, state: ConnectionState) -> bool {
        match self.source {
            Source::Any => true,
            Source::Only(expected) => expected == state,
        }
    }

    pub(crate) const fn target(self) -> ConnectionState {
        self.target
    }

    pub(crate) const fn guard(self) -> Guard {
        self.guard
    }

    pub(crate) const fn before(self) -> Action {
        self.before
    }

    pub(crate) const fn after(self) -> Action {
        self.after
    }
}

/// Point-in-time view of a connection's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    state: ConnectionState,
    changed_at: DateTime<Utc>,
}

impl ConnectionSnapshot {
    /// Creates a snapshot.
    #[must_use]
    pub const fn new(state: ConnectionState, changed_at: DateTime<Utc>) -> Self {
        Self { state, changed_at }
    }

    /// Returns the state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns when the state was entered.
    #[must_use]
    pub const fn changed_at(&self) -> DateTime<Utc> {
        self.changed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Trigger::Connect, ConnectionState::Initialized, Some(ConnectionState::Connected))]
    #[case(Trigger::Connect, ConnectionState::Connected, None)]
    #[case(Trigger::Connect, ConnectionState::Disconnected, None)]
    #[case(Trigger::Disconnect, ConnectionState::Connected, Some(ConnectionState::Disconnected))]
    #[case(Trigger::Disconnect, ConnectionState::Initialized, None)]
    #[case(Trigger::Error, ConnectionState::Connected, Some(ConnectionState::Error))]
    #[case(Trigger::Error, ConnectionState::Error, Some(ConnectionState::Error))]
    #[case(Trigger::Reinitialize, ConnectionState::Error, Some(ConnectionState::Initialized))]
    #[case(Trigger::Reinitialize, ConnectionState::Disconnected, Some(ConnectionState::Initialized))]
    fn transition_table_targets(
        #[case] trigger: Trigger,
        #[case] from: ConnectionState,
        #[case] expected: Option<ConnectionState>,
    ) {
        assert_eq!(Transition::find(trigger, from).map(Transition::target), expected);
    }

    #[test]
    fn disconnect_requires_live_session() {
        let row = Transition::find(Trigger::Disconnect, ConnectionState::Connected)
            .expect("disconnect row should exist");
        assert_eq!(row.guard(), Guard::SessionLive);
    }

    #[rstest]
    #[case(ConnectionState::Initialized, Action::ReleaseSession)]
    #[case(ConnectionState::Connected, Action::None)]
    #[case(ConnectionState::Disconnected, Action::ReleaseSession)]
    #[case(ConnectionState::Error, Action::ReleaseSession)]
    fn entry_actions(#[case] state: ConnectionState, #[case] expected: Action) {
        assert_eq!(state.entry_action(), expected);
    }

    #[rstest]
    #[case("connected", ConnectionState::Connected)]
    #[case(" ERROR ", ConnectionState::Error)]
    fn parses_state_names(#[case] raw: &str, #[case] expected: ConnectionState) {
        assert_eq!(ConnectionState::try_from(raw), Ok(expected));
    }

    #[test]
    fn rejects_unknown_state_name() {
        assert_eq!(
            ConnectionState::try_from("gone"),
            Err(ParseConnectionStateError("gone".to_owned()))
        );
    }
}
