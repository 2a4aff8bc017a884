//! Sequence coordination.
//!
//! Sequences are persisted as an ordered member list plus a
//! UUID -> sequence membership index. Cascade cancellation always runs
//! inside the write transaction that recorded the triggering terminal
//! failure.

use redb::{ReadableTable, WriteTransaction};
use tracing::info;
use uuid::Uuid;

use mandate_commands::{Command, CommandSequence, CommandStatus, SequenceId};
use mandate_core::{Error, Result};

use crate::store::{
    decode_command, load_by_uuid, next_counter, save_command, Store, COMMANDS_TABLE,
    MEMBERSHIP_TABLE, QUEUE_INDEX_TABLE, SEQUENCES_TABLE, SEQUENCE_ID_KEY, UUID_INDEX_TABLE,
};

impl Store {
    /// Group queued commands into an ordered, all-or-nothing sequence.
    ///
    /// Every member must exist, be `Queued`, and not already belong to
    /// a sequence; otherwise the whole creation fails with
    /// `InvalidMember` and nothing is written.
    pub fn create_sequence(&self, members: Vec<Uuid>) -> Result<SequenceId> {
        if members.is_empty() {
            return Err(Error::InvalidMember("sequence has no members".to_string()));
        }
        {
            let mut seen = std::collections::HashSet::new();
            for member in &members {
                if !seen.insert(*member) {
                    return Err(Error::InvalidMember(format!(
                        "command {} listed more than once",
                        member
                    )));
                }
            }
        }

        let txn = self.db().begin_write()?;
        let sequence_id = {
            let mut commands = Vec::with_capacity(members.len());
            for member in &members {
                let command = load_by_uuid(&txn, member)?.ok_or_else(|| {
                    Error::InvalidMember(format!("command {} does not exist", member))
                })?;
                if command.status != CommandStatus::Queued {
                    return Err(Error::InvalidMember(format!(
                        "command {} is {}, not Queued",
                        member, command.status
                    )));
                }
                if command.sequence_id.is_some() {
                    return Err(Error::InvalidMember(format!(
                        "command {} already belongs to a sequence",
                        member
                    )));
                }
                commands.push(command);
            }

            let sequence_id = next_counter(&txn, SEQUENCE_ID_KEY)?;
            let sequence = CommandSequence::new(sequence_id, members.clone());
            {
                let mut sequences = txn.open_table(SEQUENCES_TABLE)?;
                sequences.insert(sequence_id, serde_json::to_string(&sequence)?.as_str())?;
            }
            {
                let mut membership = txn.open_table(MEMBERSHIP_TABLE)?;
                for member in &members {
                    membership.insert(member.to_string().as_str(), sequence_id)?;
                }
            }
            for mut command in commands {
                command.sequence_id = Some(sequence_id);
                save_command(&txn, &command)?;
            }
            sequence_id
        };
        txn.commit()?;
        info!(sequence_id, members = members.len(), "command sequence created");
        Ok(sequence_id)
    }

    /// Load a sequence by id.
    pub fn get_sequence(&self, sequence_id: SequenceId) -> Result<CommandSequence> {
        let txn = self.db().begin_read()?;
        let sequences = txn.open_table(SEQUENCES_TABLE)?;
        match sequences.get(sequence_id)? {
            Some(raw) => Ok(serde_json::from_str(raw.value())?),
            None => Err(Error::NotFound(format!("sequence {}", sequence_id))),
        }
    }

    /// Look up the sequence a command belongs to, if any.
    pub fn sequence_for_command(&self, uuid: &Uuid) -> Result<Option<SequenceId>> {
        let txn = self.db().begin_read()?;
        let membership = txn.open_table(MEMBERSHIP_TABLE)?;
        Ok(membership
            .get(uuid.to_string().as_str())?
            .map(|g| g.value()))
    }
}

/// Load a sequence inside a write transaction.
fn load_sequence(txn: &WriteTransaction, sequence_id: SequenceId) -> Result<Option<CommandSequence>> {
    let sequences = txn.open_table(SEQUENCES_TABLE)?;
    let sequence = match sequences.get(sequence_id)? {
        Some(raw) => Some(serde_json::from_str(raw.value())?),
        None => None,
    };
    Ok(sequence)
}

/// Whether a command may be delivered given its sequence's ordering
/// constraint. Non-members are always eligible.
pub(crate) fn is_sequence_eligible(txn: &WriteTransaction, command: &Command) -> Result<bool> {
    let Some(sequence_id) = command.sequence_id else {
        return Ok(true);
    };
    let Some(sequence) = load_sequence(txn, sequence_id)? else {
        return Ok(true);
    };

    let mut statuses = std::collections::HashMap::new();
    {
        let uuid_index = txn.open_table(UUID_INDEX_TABLE)?;
        let commands = txn.open_table(COMMANDS_TABLE)?;
        for member in &sequence.members {
            let seq = match uuid_index.get(member.to_string().as_str())? {
                Some(guard) => guard.value(),
                None => continue,
            };
            if let Some(raw) = commands.get(seq)? {
                statuses.insert(*member, decode_command(raw.value())?.status);
            }
        }
    }
    Ok(sequence.is_eligible(&command.uuid, |u| statuses.get(u).copied()))
}

/// Cancel every still-queued member of a sequence after one member
/// terminally failed. Runs inside the caller's transaction. Returns the
/// cancelled UUIDs.
pub(crate) fn cancel_queued_members(
    txn: &WriteTransaction,
    sequence_id: SequenceId,
) -> Result<Vec<Uuid>> {
    let Some(sequence) = load_sequence(txn, sequence_id)? else {
        return Ok(Vec::new());
    };

    let mut cancelled = Vec::new();
    let uuid_index = txn.open_table(UUID_INDEX_TABLE)?;
    let mut commands = txn.open_table(COMMANDS_TABLE)?;
    let mut queue_index = txn.open_table(QUEUE_INDEX_TABLE)?;

    for member in &sequence.members {
        let seq = match uuid_index.get(member.to_string().as_str())? {
            Some(guard) => guard.value(),
            None => continue,
        };
        let mut command = {
            match commands.get(seq)? {
                Some(raw) => decode_command(raw.value())?,
                None => continue,
            }
        };
        if command.status != CommandStatus::Queued {
            continue;
        }
        command.cancel()?;
        commands.insert(seq, crate::store::encode_command(&command)?.as_str())?;
        if let Some(device) = &command.device {
            queue_index.remove((device.as_str(), seq))?;
        }
        cancelled.push(*member);
    }

    Ok(cancelled)
}
