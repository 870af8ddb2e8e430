//! Participants, their roles and the offices they occupy.

use super::{ParseRoleError, RelayDomainError};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Role a participant binds on its first join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Discovers and invokes tools.
    Agent,
    /// Hosts tools.
    Computer,
}

impl Role {
    /// Returns the canonical representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Computer => "computer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Role {
    type Error = ParseRoleError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "agent" => Ok(Self::Agent),
            "computer" => Ok(Self::Computer),
            _ => Err(ParseRoleError(value.to_owned())),
        }
    }
}

/// Connection-scoped participant identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Creates an identifier from its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`RelayDomainError::EmptyParticipantId`] for blank input.
    pub fn new(value: impl Into<String>) -> Result<Self, RelayDomainError> {
        let normalized = value.into().trim().to_owned();
        if normalized.is_empty() {
            return Err(RelayDomainError::EmptyParticipantId);
        }
        Ok(Self(normalized))
    }

    /// Creates a random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the wire form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first six characters, used for default display names.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0
            .char_indices()
            .nth(6)
            .and_then(|(end, _)| self.0.get(..end))
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Office (room) identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfficeId(String);

impl OfficeId {
    /// Creates an office id.
    ///
    /// # Errors
    ///
    /// Returns [`RelayDomainError::EmptyOfficeId`] for blank input.
    pub fn new(value: impl Into<String>) -> Result<Self, RelayDomainError> {
        let normalized = value.into().trim().to_owned();
        if normalized.is_empty() {
            return Err(RelayDomainError::EmptyOfficeId);
        }
        Ok(Self(normalized))
    }

    /// Returns the wire form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OfficeId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Role and display name bound on first join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    role: Role,
    name: String,
}

impl RoleBinding {
    /// Creates a binding; a blank name defaults to `{role}_{short id}`.
    #[must_use]
    pub fn new(role: Role, name: &str, id: &ParticipantId) -> Self {
        let trimmed = name.trim();
        let display_name = if trimmed.is_empty() {
            format!("{role}_{}", id.short())
        } else {
            trimmed.to_owned()
        };
        Self {
            role,
            name: display_name,
        }
    }

    /// Returns the bound role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Relay-side state of one connected participant.
///
/// The binding is absent until the first successful join and never changes
/// role afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    id: ParticipantId,
    binding: Option<RoleBinding>,
    office: Option<OfficeId>,
    connected_at: DateTime<Utc>,
}

impl ParticipantRecord {
    /// Creates an unbound record.
    #[must_use]
    pub fn new(id: ParticipantId, clock: &impl Clock) -> Self {
        Self {
            id,
            binding: None,
            office: None,
            connected_at: clock.utc(),
        }
    }

    /// Returns the participant id.
    #[must_use]
    pub const fn id(&self) -> &ParticipantId {
        &self.id
    }

    /// Returns the role binding.
    #[must_use]
    pub const fn binding(&self) -> Option<&RoleBinding> {
        self.binding.as_ref()
    }

    /// Returns the bound role.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.binding.as_ref().map(RoleBinding::role)
    }

    /// Returns whether the participant is bound to `role`.
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.role() == Some(role)
    }

    /// Returns the office the participant is in.
    #[must_use]
    pub const fn office(&self) -> Option<&OfficeId> {
        self.office.as_ref()
    }

    /// Returns when the connection was registered.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub(crate) fn bind(&mut self, binding: RoleBinding) {
        self.binding = Some(binding);
    }

    pub(crate) fn restore_binding(&mut self, binding: Option<RoleBinding>) {
        self.binding = binding;
    }

    pub(crate) fn set_office(&mut self, office: Option<OfficeId>) {
        self.office = office;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockable::DefaultClock;
    use rstest::rstest;

    #[test]
    fn blank_name_defaults_to_role_and_short_id() {
        let id = ParticipantId::new("abcdef123456").expect("valid id");

        let binding = RoleBinding::new(Role::Computer, "  ", &id);

        assert_eq!(binding.name(), "computer_abcdef");
    }

    #[test]
    fn short_id_handles_short_values() {
        let id = ParticipantId::new("abc").expect("valid id");
        assert_eq!(id.short(), "abc");
    }

    #[rstest]
    #[case("agent", Role::Agent)]
    #[case(" Computer ", Role::Computer)]
    fn parses_roles(#[case] raw: &str, #[case] expected: Role) {
        assert_eq!(Role::try_from(raw), Ok(expected));
    }

    #[test]
    fn new_record_is_unbound() {
        let record = ParticipantRecord::new(ParticipantId::generate(), &DefaultClock);
        assert!(record.role().is_none());
        assert!(record.office().is_none());
    }

    #[test]
    fn blank_office_is_rejected() {
        assert_eq!(OfficeId::new(" "), Err(RelayDomainError::EmptyOfficeId));
    }
}
