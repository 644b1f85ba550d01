// ABOUTME: Room membership cache with change detection.
// ABOUTME: Insertion order preserved for display; identity comparisons use the id set only.

use std::collections::HashSet;

use crate::types::Participant;

/// Participants of a single room, maintained from WebSocket events and
/// REST loads.
///
/// The engine maintains the set and the dirty bit; adapters decide what to
/// do about a change (typically re-injecting a participant list into the
/// next prompt). Name or type mutation of an existing id is not a change.
#[derive(Debug, Default)]
pub struct ParticipantSet {
    participants: Vec<Participant>,
    last_sent: Option<HashSet<String>>,
    loaded: bool,
}

impl ParticipantSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current participants, in insertion order.
    pub fn participants(&self) -> Vec<Participant> {
        self.participants.clone()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Whether a REST load has happened (live events may populate the set
    /// before that).
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Replace the set wholesale from a REST load.
    pub fn set_loaded(&mut self, participants: Vec<Participant>) {
        self.participants = participants;
        self.loaded = true;
        tracing::debug!(count = self.participants.len(), "Participants loaded");
    }

    /// Mark the REST load as done without replacing live-event entries,
    /// used when the load itself failed.
    pub fn mark_loaded(&mut self) {
        self.loaded = true;
    }

    /// Insert unless an entry with the same id exists. Returns whether the
    /// participant was newly inserted.
    pub fn add(&mut self, participant: Participant) -> bool {
        if self.participants.iter().any(|p| p.id == participant.id) {
            return false;
        }
        tracing::debug!(participant = %participant.name, "Participant added");
        self.participants.push(participant);
        true
    }

    /// Remove by id. Returns whether the id was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.participants.len();
        self.participants.retain(|p| p.id != id);
        self.participants.len() < before
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn snapshot_ids(&self) -> HashSet<String> {
        self.participants.iter().map(|p| p.id.clone()).collect()
    }

    /// True iff the current id set differs from `last_snapshot`. An absent
    /// baseline always reads as changed, forcing the first send.
    pub fn changed_since(&self, last_snapshot: Option<&HashSet<String>>) -> bool {
        match last_snapshot {
            None => true,
            Some(snapshot) => self.snapshot_ids() != *snapshot,
        }
    }

    /// Convenience over [`changed_since`](Self::changed_since) against the
    /// baseline recorded by [`mark_sent`](Self::mark_sent).
    pub fn changed(&self) -> bool {
        self.changed_since(self.last_sent.as_ref())
    }

    /// Record the current id set as the new baseline.
    pub fn mark_sent(&mut self) {
        self.last_sent = Some(self.snapshot_ids());
    }
}
