//! Command data structures.
//!
//! A command is a single unit of work targeted at exactly one enrolled
//! device. Its payload is opaque to the control plane: a request-type
//! tag plus free-form parameters. Every status mutation goes through
//! [`Command::set_status`], so the permitted-transition table lives in
//! exactly one place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mandate_core::config;
use mandate_core::{Error, Result};

/// Globally unique command identifier.
pub type CommandUuid = Uuid;

/// Device identifier (the UDID of an enrolled endpoint).
pub type DeviceId = String;

/// Command delivery status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CommandStatus {
    /// Waiting in the queue, not yet handed to the device.
    Queued,
    /// Delivered to the device, awaiting its report.
    Sent,
    /// Device reported success. Terminal.
    Acknowledged,
    /// Device reported a hard failure. Terminal, no retry.
    Error,
    /// Delivery budget exhausted via repeated NotNow. Terminal.
    Expired,
    /// Never attempted: an owning sequence aborted. Terminal.
    Cancelled,
}

impl CommandStatus {
    /// Check if the status is terminal. Terminal commands are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Acknowledged
                | CommandStatus::Error
                | CommandStatus::Expired
                | CommandStatus::Cancelled
        )
    }

    /// The permitted-transition table. This is the only place that
    /// decides whether a status change is legal.
    pub fn can_transition(self, next: CommandStatus) -> bool {
        matches!(
            (self, next),
            (CommandStatus::Queued, CommandStatus::Sent)
                | (CommandStatus::Queued, CommandStatus::Cancelled)
                | (CommandStatus::Sent, CommandStatus::Acknowledged)
                | (CommandStatus::Sent, CommandStatus::Error)
                | (CommandStatus::Sent, CommandStatus::Queued)
                | (CommandStatus::Sent, CommandStatus::Expired)
        )
    }

    /// Get the status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Queued => "Queued",
            CommandStatus::Sent => "Sent",
            CommandStatus::Acknowledged => "Acknowledged",
            CommandStatus::Error => "Error",
            CommandStatus::Expired => "Expired",
            CommandStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome a device reports for a previously delivered command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The command succeeded.
    Acknowledged,
    /// The command failed. No retry.
    Error,
    /// The device cannot execute the command right now. Costs one ttl.
    NotNow,
}

/// What applying a device report did to the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportDisposition {
    /// Terminal success.
    Acknowledged,
    /// Terminal failure.
    Failed,
    /// Returned to the queue for another attempt.
    Requeued,
    /// ttl exhausted; terminal.
    Expired,
}

impl ReportDisposition {
    /// Terminal failures cascade into owning sequences.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, ReportDisposition::Failed | ReportDisposition::Expired)
    }
}

/// Parameters for enqueuing a new command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Fresh command UUID.
    pub uuid: CommandUuid,
    /// Request-type tag. Opaque to the control plane.
    pub request_type: String,
    /// Opaque parameter payload.
    pub parameters: serde_json::Value,
    /// Target device, if already resolved.
    pub device: Option<DeviceId>,
    /// Earliest dispatch time.
    pub after: Option<DateTime<Utc>>,
    /// Delivery attempt budget.
    pub ttl: u32,
}

impl CommandSpec {
    /// Create a spec with a fresh UUID and the default ttl.
    pub fn new(request_type: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            request_type: request_type.into(),
            parameters: serde_json::json!({}),
            device: None,
            after: None,
            ttl: config::commands::DEFAULT_TTL,
        }
    }

    /// Use a caller-supplied UUID.
    pub fn with_uuid(mut self, uuid: CommandUuid) -> Self {
        self.uuid = uuid;
        self
    }

    /// Set the target device.
    pub fn with_device(mut self, device: impl Into<DeviceId>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Set the parameter payload.
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the earliest dispatch time.
    pub fn with_after(mut self, after: DateTime<Utc>) -> Self {
        self.after = Some(after);
        self
    }

    /// Set the delivery attempt budget.
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }
}

/// A queued, in-flight, or completed management command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Creation-order sequence number. Strictly increasing and stable;
    /// delivery order is FIFO over this.
    pub seq: u64,
    /// Globally unique identifier, immutable once assigned.
    pub uuid: CommandUuid,
    /// Request-type tag.
    pub request_type: String,
    /// Opaque parameter payload.
    pub parameters: serde_json::Value,
    /// Current delivery status.
    pub status: CommandStatus,
    /// When the command entered the queue.
    pub queued_at: DateTime<Utc>,
    /// When the command was last handed to the device.
    pub sent_at: Option<DateTime<Utc>>,
    /// When the device's final report arrived.
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Earliest dispatch time, if any.
    pub after: Option<DateTime<Utc>>,
    /// Remaining delivery attempts. Only ever decreases.
    pub ttl: u32,
    /// Owning device, or None while the target is unresolved.
    pub device: Option<DeviceId>,
    /// Owning command sequence, if any.
    pub sequence_id: Option<u64>,
}

impl Command {
    /// Build a fresh queued command from a spec.
    pub fn new(spec: CommandSpec, seq: u64, now: DateTime<Utc>) -> Self {
        Self {
            seq,
            uuid: spec.uuid,
            request_type: spec.request_type,
            parameters: spec.parameters,
            status: CommandStatus::Queued,
            queued_at: now,
            sent_at: None,
            acknowledged_at: None,
            after: spec.after,
            ttl: spec.ttl,
            device: spec.device,
            sequence_id: None,
        }
    }

    /// Validate and apply a status change. The single mutation point
    /// for `status`.
    fn set_status(&mut self, next: CommandStatus) -> Result<()> {
        if !self.status.can_transition(next) {
            return Err(Error::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Hand the command to the device: `Queued -> Sent`.
    pub fn mark_sent(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.set_status(CommandStatus::Sent)?;
        self.sent_at = Some(now);
        Ok(())
    }

    /// Apply the device's report on a `Sent` command.
    ///
    /// `NotNow` costs one ttl and requeues the command, or expires it
    /// when the budget runs out. `Acknowledged` and `Error` are
    /// terminal.
    pub fn apply_report(
        &mut self,
        outcome: ReportOutcome,
        now: DateTime<Utc>,
    ) -> Result<ReportDisposition> {
        match outcome {
            ReportOutcome::Acknowledged => {
                self.set_status(CommandStatus::Acknowledged)?;
                self.acknowledged_at = Some(now);
                Ok(ReportDisposition::Acknowledged)
            }
            ReportOutcome::Error => {
                self.set_status(CommandStatus::Error)?;
                self.acknowledged_at = Some(now);
                Ok(ReportDisposition::Failed)
            }
            ReportOutcome::NotNow => {
                self.acknowledged_at = Some(now);
                let remaining = self.ttl.saturating_sub(1);
                if remaining == 0 {
                    self.set_status(CommandStatus::Expired)?;
                    self.ttl = 0;
                    Ok(ReportDisposition::Expired)
                } else {
                    self.set_status(CommandStatus::Queued)?;
                    self.ttl = remaining;
                    Ok(ReportDisposition::Requeued)
                }
            }
        }
    }

    /// Cancel a not-yet-delivered member of an aborted sequence.
    pub fn cancel(&mut self) -> Result<()> {
        self.set_status(CommandStatus::Cancelled)
    }

    /// Bind an unassigned command to its target device.
    pub fn assign_device(&mut self, device: impl Into<DeviceId>) -> Result<()> {
        if self.status != CommandStatus::Queued {
            return Err(Error::InvalidInput(format!(
                "cannot assign a device to a {} command",
                self.status
            )));
        }
        let device = device.into();
        if let Some(existing) = &self.device {
            if *existing != device {
                return Err(Error::InvalidInput(format!(
                    "command {} is already assigned to {}",
                    self.uuid, existing
                )));
            }
        }
        self.device = Some(device);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(ttl: u32) -> Command {
        Command::new(CommandSpec::new("DeviceInformation").with_ttl(ttl), 1, Utc::now())
    }

    #[test]
    fn test_status_is_terminal() {
        assert!(CommandStatus::Acknowledged.is_terminal());
        assert!(CommandStatus::Error.is_terminal());
        assert!(CommandStatus::Expired.is_terminal());
        assert!(CommandStatus::Cancelled.is_terminal());
        assert!(!CommandStatus::Queued.is_terminal());
        assert!(!CommandStatus::Sent.is_terminal());
    }

    #[test]
    fn test_terminal_states_are_immutable() {
        for terminal in [
            CommandStatus::Acknowledged,
            CommandStatus::Error,
            CommandStatus::Expired,
            CommandStatus::Cancelled,
        ] {
            for next in [
                CommandStatus::Queued,
                CommandStatus::Sent,
                CommandStatus::Acknowledged,
                CommandStatus::Error,
                CommandStatus::Expired,
                CommandStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition(next));
            }
        }
    }

    #[test]
    fn test_mark_sent_requires_queued() {
        let now = Utc::now();
        let mut cmd = queued(5);
        cmd.mark_sent(now).unwrap();
        assert_eq!(cmd.status, CommandStatus::Sent);
        assert_eq!(cmd.sent_at, Some(now));

        let err = cmd.mark_sent(now).unwrap_err();
        assert!(matches!(
            err,
            mandate_core::Error::InvalidTransition { .. }
        ));
    }

    #[test]
    fn test_report_requires_sent() {
        let mut cmd = queued(5);
        let err = cmd
            .apply_report(ReportOutcome::Acknowledged, Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            mandate_core::Error::InvalidTransition { .. }
        ));
    }

    #[test]
    fn test_not_now_decrements_ttl_by_one() {
        let now = Utc::now();
        let mut cmd = queued(3);
        cmd.mark_sent(now).unwrap();
        let d = cmd.apply_report(ReportOutcome::NotNow, now).unwrap();
        assert_eq!(d, ReportDisposition::Requeued);
        assert_eq!(cmd.ttl, 2);
        assert_eq!(cmd.status, CommandStatus::Queued);
    }

    #[test]
    fn test_not_now_exhaustion_expires() {
        let now = Utc::now();
        let mut cmd = queued(1);
        cmd.mark_sent(now).unwrap();
        let d = cmd.apply_report(ReportOutcome::NotNow, now).unwrap();
        assert_eq!(d, ReportDisposition::Expired);
        assert_eq!(cmd.ttl, 0);
        assert_eq!(cmd.status, CommandStatus::Expired);
        assert!(d.is_terminal_failure());
        // Expired is terminal: nothing can requeue it.
        assert!(cmd.mark_sent(now).is_err());
    }

    #[test]
    fn test_error_is_terminal_failure() {
        let now = Utc::now();
        let mut cmd = queued(5);
        cmd.mark_sent(now).unwrap();
        let d = cmd.apply_report(ReportOutcome::Error, now).unwrap();
        assert_eq!(d, ReportDisposition::Failed);
        assert!(d.is_terminal_failure());
        assert_eq!(cmd.ttl, 5);
    }

    #[test]
    fn test_cancel_only_from_queued() {
        let now = Utc::now();
        let mut cmd = queued(5);
        cmd.cancel().unwrap();
        assert_eq!(cmd.status, CommandStatus::Cancelled);

        let mut sent = queued(5);
        sent.mark_sent(now).unwrap();
        assert!(sent.cancel().is_err());
    }

    #[test]
    fn test_assign_device() {
        let mut cmd = queued(5);
        cmd.assign_device("udid-1").unwrap();
        // Idempotent for the same device.
        cmd.assign_device("udid-1").unwrap();
        assert!(cmd.assign_device("udid-2").is_err());
    }

    #[test]
    fn test_spec_builder() {
        let after = Utc::now();
        let spec = CommandSpec::new("InstallProfile")
            .with_device("udid-1")
            .with_parameters(serde_json::json!({"Payload": "AAA="}))
            .with_after(after)
            .with_ttl(2);
        assert_eq!(spec.request_type, "InstallProfile");
        assert_eq!(spec.device.as_deref(), Some("udid-1"));
        assert_eq!(spec.after, Some(after));
        assert_eq!(spec.ttl, 2);
    }
}
