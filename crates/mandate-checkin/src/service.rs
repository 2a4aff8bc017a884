//! Management-side command submission.
//!
//! The REST layer enqueues through this service so every enqueue for a
//! targeted device also wakes the device up with a push.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use mandate_commands::{Command, CommandSpec, SequenceId};
use mandate_core::Result;
use mandate_store::Store;

use crate::push::PushDispatcher;

/// Submits commands and sequences, dispatching pushes as a side
/// effect.
pub struct CommandService {
    store: Arc<Store>,
    dispatcher: PushDispatcher,
}

impl CommandService {
    pub fn new(store: Arc<Store>, dispatcher: PushDispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Enqueue one command. If it targets a device, a push goes out in
    /// the background.
    pub fn submit(&self, spec: CommandSpec, now: DateTime<Utc>) -> Result<Command> {
        let command = self.store.enqueue(spec, now)?;
        if let Some(device) = &command.device {
            self.dispatcher.notify_detached(device);
        }
        Ok(command)
    }

    /// Group already-enqueued commands into an ordered sequence.
    pub fn group(&self, members: Vec<Uuid>) -> Result<SequenceId> {
        self.store.create_sequence(members)
    }

    /// Enqueue a batch of commands as one ordered sequence, then push
    /// once per distinct target device.
    pub fn submit_sequence(
        &self,
        specs: Vec<CommandSpec>,
        now: DateTime<Utc>,
    ) -> Result<(SequenceId, Vec<Command>)> {
        let mut commands = Vec::with_capacity(specs.len());
        for spec in specs {
            commands.push(self.store.enqueue(spec, now)?);
        }
        let sequence_id = self
            .store
            .create_sequence(commands.iter().map(|c| c.uuid).collect())?;

        let mut notified = HashSet::new();
        for command in &commands {
            if let Some(device) = &command.device {
                if notified.insert(device.clone()) {
                    self.dispatcher.notify_detached(device);
                }
            }
        }
        Ok((sequence_id, commands))
    }
}
