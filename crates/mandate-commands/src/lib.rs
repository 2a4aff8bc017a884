//! Command domain model for the mandate MDM control plane.
//!
//! Provides:
//! - Command data structures and the status state machine
//! - Queue selection (which command a device gets next)
//! - Command sequences with all-or-nothing delivery semantics

pub mod command;
pub mod queue;
pub mod sequence;

// Re-exports
pub use command::{
    Command, CommandSpec, CommandStatus, CommandUuid, DeviceId, ReportDisposition, ReportOutcome,
};

pub use queue::select_next;

pub use sequence::{CommandSequence, SequenceId};
