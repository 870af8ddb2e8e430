//! In-memory participant and office membership tables.

use super::{OfficeId, ParticipantId, ParticipantRecord, Role};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Participants by id plus the members of every occupied office.
///
/// A participant is a member of at most one office; the record's `office`
/// field and the office member set are always updated together.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    participants: HashMap<ParticipantId, ParticipantRecord>,
    offices: BTreeMap<OfficeId, BTreeSet<ParticipantId>>,
}

impl RoomDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a participant, replacing any record with the same id.
    pub fn insert(&mut self, record: ParticipantRecord) {
        self.participants.insert(record.id().clone(), record);
    }

    /// Removes a participant and its office membership.
    pub fn remove(&mut self, id: &ParticipantId) -> Option<ParticipantRecord> {
        self.exit(id);
        self.participants.remove(id)
    }

    /// Returns a participant record.
    #[must_use]
    pub fn get(&self, id: &ParticipantId) -> Option<&ParticipantRecord> {
        self.participants.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &ParticipantId) -> Option<&mut ParticipantRecord> {
        self.participants.get_mut(id)
    }

    /// Returns the members of an office in id order.
    #[must_use]
    pub fn members(&self, office: &OfficeId) -> Vec<ParticipantId> {
        self.offices
            .get(office)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the Agent occupying an office, if any.
    #[must_use]
    pub fn agent_in(&self, office: &OfficeId) -> Option<&ParticipantId> {
        self.offices.get(office)?.iter().find(|member| {
            self.participants
                .get(*member)
                .is_some_and(|record| record.has_role(Role::Agent))
        })
    }

    /// Counts the members of `office` bound to `role`.
    #[must_use]
    pub fn count_role(&self, office: &OfficeId, role: Role) -> usize {
        self.offices.get(office).map_or(0, |members| {
            members
                .iter()
                .filter_map(|member| self.participants.get(member))
                .filter(|record| record.has_role(role))
                .count()
        })
    }

    /// Returns every occupied office.
    pub fn offices(&self) -> impl Iterator<Item = &OfficeId> {
        self.offices.keys()
    }

    /// Moves a registered participant into `office`, leaving any previous
    /// one without notification. Returns `false` for unknown ids.
    pub fn enter(&mut self, id: &ParticipantId, office: &OfficeId) -> bool {
        if !self.participants.contains_key(id) {
            return false;
        }
        self.exit(id);
        self.offices
            .entry(office.clone())
            .or_default()
            .insert(id.clone());
        if let Some(record) = self.participants.get_mut(id) {
            record.set_office(Some(office.clone()));
        }
        true
    }

    /// Removes a participant from its office, dropping the office once
    /// empty. Returns the office left.
    pub fn exit(&mut self, id: &ParticipantId) -> Option<OfficeId> {
        let office = self
            .participants
            .get_mut(id)
            .and_then(|record| {
                let current = record.office().cloned();
                record.set_office(None);
                current
            })?;
        if let Some(members) = self.offices.get_mut(&office) {
            members.remove(id);
            if members.is_empty() {
                self.offices.remove(&office);
            }
        }
        Some(office)
    }
}
