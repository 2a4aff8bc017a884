//! Command store using redb.
//!
//! Tables:
//! - `commands`: key = creation-order sequence number (monotonic u64),
//!   value = command record (JSON). The key doubles as the FIFO order.
//! - `command_uuid_index`: command UUID -> sequence number.
//! - `device_queue_index`: (udid, seq) row present while the command is
//!   `Queued` and assigned; range-scanned in seq order at selection.
//! - `device_inflight`: udid -> UUID of the one `Sent` command, if any.
//! - `meta`: monotonic counters.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use tracing::{debug, info};
use uuid::Uuid;

use mandate_commands::{
    queue, Command, CommandSpec, CommandStatus, ReportDisposition, ReportOutcome,
};
use mandate_core::{Error, Result};

pub(crate) const DEVICES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("devices");
pub(crate) const COMMANDS_TABLE: TableDefinition<u64, &str> = TableDefinition::new("commands");
pub(crate) const UUID_INDEX_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("command_uuid_index");
pub(crate) const QUEUE_INDEX_TABLE: TableDefinition<(&str, u64), ()> =
    TableDefinition::new("device_queue_index");
pub(crate) const INFLIGHT_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("device_inflight");
pub(crate) const SEQUENCES_TABLE: TableDefinition<u64, &str> =
    TableDefinition::new("command_sequences");
pub(crate) const MEMBERSHIP_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("sequence_membership");
pub(crate) const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

pub(crate) const COMMAND_SEQ_KEY: &str = "next_command_seq";
pub(crate) const SEQUENCE_ID_KEY: &str = "next_sequence_id";

/// Durable control-plane state. Open once at startup, pass explicitly.
pub struct Store {
    db: Database,
}

pub(crate) fn encode_command(command: &Command) -> Result<String> {
    Ok(serde_json::to_string(command)?)
}

pub(crate) fn decode_command(json: &str) -> Result<Command> {
    Ok(serde_json::from_str(json)?)
}

/// Allocate the next value of a monotonic counter.
pub(crate) fn next_counter(txn: &WriteTransaction, key: &str) -> Result<u64> {
    let mut meta = txn.open_table(META_TABLE)?;
    let next = meta.get(key)?.map(|v| v.value()).unwrap_or(0) + 1;
    meta.insert(key, next)?;
    Ok(next)
}

/// Load a command by UUID inside a write transaction.
pub(crate) fn load_by_uuid(txn: &WriteTransaction, uuid: &Uuid) -> Result<Option<Command>> {
    let seq = {
        let uuid_index = txn.open_table(UUID_INDEX_TABLE)?;
        let found = uuid_index.get(uuid.to_string().as_str())?.map(|g| g.value());
        match found {
            Some(seq) => seq,
            None => return Ok(None),
        }
    };
    let commands = txn.open_table(COMMANDS_TABLE)?;
    let command = match commands.get(seq)? {
        Some(raw) => Some(decode_command(raw.value())?),
        None => None,
    };
    Ok(command)
}

/// Persist a command record inside a write transaction.
pub(crate) fn save_command(txn: &WriteTransaction, command: &Command) -> Result<()> {
    let mut commands = txn.open_table(COMMANDS_TABLE)?;
    commands.insert(command.seq, encode_command(command)?.as_str())?;
    Ok(())
}

impl Store {
    /// Open or create the store at the given path. All tables are
    /// created up front so later transactions never race on table
    /// creation.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path.as_ref())?;
        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(DEVICES_TABLE)?;
            let _ = txn.open_table(COMMANDS_TABLE)?;
            let _ = txn.open_table(UUID_INDEX_TABLE)?;
            let _ = txn.open_table(QUEUE_INDEX_TABLE)?;
            let _ = txn.open_table(INFLIGHT_TABLE)?;
            let _ = txn.open_table(SEQUENCES_TABLE)?;
            let _ = txn.open_table(MEMBERSHIP_TABLE)?;
            let _ = txn.open_table(META_TABLE)?;
        }
        txn.commit()?;
        Ok(Self { db })
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    // ========== Command Store ==========

    /// Enqueue a new command.
    ///
    /// The spec must carry a fresh UUID; an existing UUID fails with
    /// `DuplicateUuid` and leaves the stored command untouched (the
    /// transaction is abandoned, never committed).
    pub fn enqueue(&self, spec: CommandSpec, now: DateTime<Utc>) -> Result<Command> {
        let txn = self.db.begin_write()?;
        let command = {
            let uuid_key = spec.uuid.to_string();
            {
                let uuid_index = txn.open_table(UUID_INDEX_TABLE)?;
                if uuid_index.get(uuid_key.as_str())?.is_some() {
                    return Err(Error::DuplicateUuid(spec.uuid));
                }
            }
            let seq = next_counter(&txn, COMMAND_SEQ_KEY)?;
            let command = Command::new(spec, seq, now);
            save_command(&txn, &command)?;
            {
                let mut uuid_index = txn.open_table(UUID_INDEX_TABLE)?;
                uuid_index.insert(uuid_key.as_str(), seq)?;
            }
            if let Some(device) = &command.device {
                let mut queue_index = txn.open_table(QUEUE_INDEX_TABLE)?;
                queue_index.insert((device.as_str(), seq), ())?;
            }
            command
        };
        txn.commit()?;
        debug!(
            uuid = %command.uuid,
            request_type = %command.request_type,
            device = command.device.as_deref().unwrap_or("<unassigned>"),
            "command enqueued"
        );
        Ok(command)
    }

    /// Find a command by its UUID.
    pub fn find_by_uuid(&self, uuid: &Uuid) -> Result<Command> {
        let txn = self.db.begin_read()?;
        let seq = {
            let uuid_index = txn.open_table(UUID_INDEX_TABLE)?;
            match uuid_index.get(uuid.to_string().as_str())? {
                Some(guard) => guard.value(),
                None => return Err(Error::NotFound(format!("command {}", uuid))),
            }
        };
        let commands = txn.open_table(COMMANDS_TABLE)?;
        match commands.get(seq)? {
            Some(raw) => decode_command(raw.value()),
            None => Err(Error::NotFound(format!("command {}", uuid))),
        }
    }

    /// Bind an unassigned command to its target device, making it
    /// selectable.
    pub fn assign_device(&self, uuid: &Uuid, device: &str) -> Result<Command> {
        let txn = self.db.begin_write()?;
        let command = {
            let mut command = load_by_uuid(&txn, uuid)?
                .ok_or_else(|| Error::NotFound(format!("command {}", uuid)))?;
            let was_unassigned = command.device.is_none();
            command.assign_device(device)?;
            save_command(&txn, &command)?;
            if was_unassigned {
                let mut queue_index = txn.open_table(QUEUE_INDEX_TABLE)?;
                queue_index.insert((device, command.seq), ())?;
            }
            command
        };
        txn.commit()?;
        debug!(uuid = %uuid, device, "command assigned");
        Ok(command)
    }

    /// Record the device's report on a `Sent` command.
    ///
    /// `NotNow` requeues with one less ttl, or expires the command when
    /// the budget is gone. A terminal failure (`Error`, `Expired`)
    /// cancels the still-queued members of an owning sequence in this
    /// same transaction, so no reader ever observes a half-cancelled
    /// sequence.
    pub fn record_result(
        &self,
        uuid: &Uuid,
        outcome: ReportOutcome,
        now: DateTime<Utc>,
    ) -> Result<Command> {
        let txn = self.db.begin_write()?;
        let (command, disposition) = {
            let mut command = load_by_uuid(&txn, uuid)?
                .ok_or_else(|| Error::NotFound(format!("command {}", uuid)))?;
            let disposition = command.apply_report(outcome, now)?;
            save_command(&txn, &command)?;

            if let Some(device) = &command.device {
                {
                    let mut inflight = txn.open_table(INFLIGHT_TABLE)?;
                    let owns_slot = inflight
                        .get(device.as_str())?
                        .map(|g| g.value() == uuid.to_string())
                        .unwrap_or(false);
                    if owns_slot {
                        inflight.remove(device.as_str())?;
                    }
                }
                if disposition == ReportDisposition::Requeued {
                    let mut queue_index = txn.open_table(QUEUE_INDEX_TABLE)?;
                    queue_index.insert((device.as_str(), command.seq), ())?;
                }
            }

            if disposition.is_terminal_failure() {
                if let Some(sequence_id) = command.sequence_id {
                    let cancelled =
                        crate::sequences::cancel_queued_members(&txn, sequence_id)?;
                    if !cancelled.is_empty() {
                        info!(
                            sequence_id,
                            cancelled = cancelled.len(),
                            trigger = %command.uuid,
                            "sequence aborted, queued members cancelled"
                        );
                    }
                }
            }
            (command, disposition)
        };
        txn.commit()?;
        debug!(
            uuid = %command.uuid,
            status = %command.status,
            ttl = command.ttl,
            ?disposition,
            "command result recorded"
        );
        Ok(command)
    }

    /// Select the next deliverable command for a device and mark it
    /// `Sent`, as a single atomic unit.
    ///
    /// Returns `None` when the device has nothing eligible, including
    /// when it already has a command in flight: at most one command may
    /// be `Sent` per device at any instant.
    pub fn dequeue_next(&self, device: &str, now: DateTime<Utc>) -> Result<Option<Command>> {
        let txn = self.db.begin_write()?;
        let selected = select_in_txn(&txn, device, now)?;
        let result = match selected {
            Some(mut command) => {
                command.mark_sent(now)?;
                save_command(&txn, &command)?;
                {
                    let mut queue_index = txn.open_table(QUEUE_INDEX_TABLE)?;
                    queue_index.remove((device, command.seq))?;
                }
                {
                    let mut inflight = txn.open_table(INFLIGHT_TABLE)?;
                    inflight.insert(device, command.uuid.to_string().as_str())?;
                }
                Some(command)
            }
            None => None,
        };
        txn.commit()?;
        if let Some(command) = &result {
            debug!(uuid = %command.uuid, device, "command dequeued for delivery");
        }
        Ok(result)
    }

    /// List a device's commands in creation order, optionally filtered
    /// by status. Serves the management layer's queries.
    pub fn list_for_device(
        &self,
        device: &str,
        status: Option<CommandStatus>,
    ) -> Result<Vec<Command>> {
        let txn = self.db.begin_read()?;
        let commands = txn.open_table(COMMANDS_TABLE)?;
        let mut out = Vec::new();
        for row in commands.iter()? {
            let (_seq, raw) = row?;
            let command = decode_command(raw.value())?;
            if command.device.as_deref() != Some(device) {
                continue;
            }
            if let Some(wanted) = status {
                if command.status != wanted {
                    continue;
                }
            }
            out.push(command);
        }
        Ok(out)
    }
}

/// Pick the winning candidate for a device inside the write
/// transaction that will also mark it `Sent`.
fn select_in_txn(
    txn: &WriteTransaction,
    device: &str,
    now: DateTime<Utc>,
) -> Result<Option<Command>> {
    {
        let inflight = txn.open_table(INFLIGHT_TABLE)?;
        if inflight.get(device)?.is_some() {
            return Ok(None);
        }
    }

    let candidate_seqs: Vec<u64> = {
        let queue_index = txn.open_table(QUEUE_INDEX_TABLE)?;
        let mut seqs = Vec::new();
        for row in queue_index.range((device, 0u64)..=(device, u64::MAX))? {
            let (key, _) = row?;
            seqs.push(key.value().1);
        }
        seqs
    };

    let candidates: Vec<Command> = {
        let commands = txn.open_table(COMMANDS_TABLE)?;
        let mut out = Vec::with_capacity(candidate_seqs.len());
        for seq in candidate_seqs {
            if let Some(raw) = commands.get(seq)? {
                out.push(decode_command(raw.value())?);
            }
        }
        out
    };

    let mut eligible = std::collections::HashSet::new();
    for command in &candidates {
        if !queue::is_deliverable(command, now) {
            continue;
        }
        if crate::sequences::is_sequence_eligible(txn, command)? {
            eligible.insert(command.uuid);
        }
    }

    Ok(queue::select_next(&candidates, now, |c| eligible.contains(&c.uuid)).cloned())
}
