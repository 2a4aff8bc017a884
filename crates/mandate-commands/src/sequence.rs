//! Command sequences.
//!
//! A sequence is an ordered set of commands with all-or-nothing success
//! semantics: member N+1 is deliverable only once member N has been
//! acknowledged, and a terminal failure of any member cancels every
//! member that has not yet been delivered.
//!
//! The sequence groups commands by reference only. Member status lives
//! with the commands themselves, so the rules here take a status lookup
//! closure instead of holding command state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::CommandStatus;

/// Sequence identifier.
pub type SequenceId = u64;

/// An ordered group of commands delivered strictly in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSequence {
    /// Sequence identifier.
    pub id: SequenceId,
    /// Member command UUIDs in delivery order.
    pub members: Vec<Uuid>,
}

impl CommandSequence {
    /// Create a sequence over the given members.
    pub fn new(id: SequenceId, members: Vec<Uuid>) -> Self {
        Self { id, members }
    }

    /// Position of a member within the sequence.
    pub fn position_of(&self, uuid: &Uuid) -> Option<usize> {
        self.members.iter().position(|m| m == uuid)
    }

    /// A member is eligible for delivery only when every member before
    /// it is `Acknowledged`. Commands not in this sequence are not this
    /// sequence's concern.
    pub fn is_eligible<F>(&self, uuid: &Uuid, mut status_of: F) -> bool
    where
        F: FnMut(&Uuid) -> Option<CommandStatus>,
    {
        let Some(position) = self.position_of(uuid) else {
            return false;
        };
        self.members[..position]
            .iter()
            .all(|prior| status_of(prior) == Some(CommandStatus::Acknowledged))
    }

    /// Members that must be cancelled after a terminal failure: every
    /// member still sitting in `Queued`. Already-delivered members keep
    /// whatever terminal state they earned.
    pub fn cancellable_members<F>(&self, mut status_of: F) -> Vec<Uuid>
    where
        F: FnMut(&Uuid) -> Option<CommandStatus>,
    {
        self.members
            .iter()
            .filter(|m| status_of(m) == Some(CommandStatus::Queued))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(
        statuses: &HashMap<Uuid, CommandStatus>,
    ) -> impl FnMut(&Uuid) -> Option<CommandStatus> + '_ {
        |uuid| statuses.get(uuid).copied()
    }

    #[test]
    fn test_first_member_always_eligible() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let seq = CommandSequence::new(1, vec![a, b]);
        let statuses: HashMap<_, _> = [(a, CommandStatus::Queued), (b, CommandStatus::Queued)]
            .into_iter()
            .collect();

        assert!(seq.is_eligible(&a, lookup(&statuses)));
        assert!(!seq.is_eligible(&b, lookup(&statuses)));
    }

    #[test]
    fn test_member_eligible_after_prior_acknowledged() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let seq = CommandSequence::new(1, vec![a, b, c]);
        let statuses: HashMap<_, _> = [
            (a, CommandStatus::Acknowledged),
            (b, CommandStatus::Queued),
            (c, CommandStatus::Queued),
        ]
        .into_iter()
        .collect();

        assert!(seq.is_eligible(&b, lookup(&statuses)));
        assert!(!seq.is_eligible(&c, lookup(&statuses)));
    }

    #[test]
    fn test_non_member_not_eligible_here() {
        let a = Uuid::new_v4();
        let seq = CommandSequence::new(1, vec![a]);
        let statuses: HashMap<_, _> = [(a, CommandStatus::Queued)].into_iter().collect();
        assert!(!seq.is_eligible(&Uuid::new_v4(), lookup(&statuses)));
    }

    #[test]
    fn test_cancellable_members_are_queued_only() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let seq = CommandSequence::new(1, vec![a, b, c]);
        let statuses: HashMap<_, _> = [
            (a, CommandStatus::Acknowledged),
            (b, CommandStatus::Error),
            (c, CommandStatus::Queued),
        ]
        .into_iter()
        .collect();

        assert_eq!(seq.cancellable_members(lookup(&statuses)), vec![c]);
    }
}
