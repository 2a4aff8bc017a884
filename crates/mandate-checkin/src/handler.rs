//! Check-in protocol handler.
//!
//! The single entry point of the control plane: interprets each inbound
//! device message, drives the store accordingly, and decides whether
//! the response carries the device's next command.
//!
//! A stale or replayed report (unknown UUID, or a UUID owned by another
//! device) is logged and ignored so the device still gets its next
//! command; everything else propagates as a typed failure.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use mandate_commands::{Command, ReportOutcome};
use mandate_core::{decode_push_token, Error, Result};
use mandate_store::{DeviceAttributes, Store};

use crate::message::{CheckinMessage, CheckinResponse};

/// Handles inbound check-in messages against a shared [`Store`].
pub struct CheckinHandler {
    store: Arc<Store>,
}

impl CheckinHandler {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Process one inbound message and produce the response.
    pub fn handle(&self, message: CheckinMessage, now: DateTime<Utc>) -> Result<CheckinResponse> {
        match message {
            CheckinMessage::Authenticate {
                udid,
                topic,
                serial_number,
                device_name,
                model,
                os_version,
                build_version,
                product_name,
            } => {
                let attributes = DeviceAttributes {
                    serial_number,
                    device_name,
                    model,
                    os_version,
                    build_version,
                    product_name,
                    topic,
                };
                self.store.upsert_device(&udid, attributes, now)?;
                info!(udid, "device authenticated");
                self.next_command(&udid, now)
            }
            CheckinMessage::TokenUpdate {
                udid,
                token,
                push_magic,
                topic,
            } => {
                let token = decode_push_token(&token)?;
                // TokenUpdate can arrive for a device the server has
                // not seen authenticate; register it on the fly.
                self.store
                    .upsert_device(&udid, DeviceAttributes::default(), now)?;
                self.store
                    .record_push_address(&udid, &token, &push_magic, &topic, now)?;
                self.next_command(&udid, now)
            }
            CheckinMessage::CheckOut { udid } => {
                match self.store.check_out(&udid, now) {
                    Ok(_) => info!(udid, "device checked out"),
                    Err(Error::NotFound(_)) => {
                        warn!(udid, "check-out from unknown device ignored");
                    }
                    Err(err) => return Err(err),
                }
                // No command lookup: the device is leaving and will not
                // report back, so handing it work would strand a Sent
                // command forever.
                Ok(CheckinResponse::empty())
            }
            CheckinMessage::CommandResult {
                udid,
                command_uuid,
                status,
                result,
            } => {
                self.store.touch_device(&udid, now)?;
                if let Some(result) = &result {
                    debug!(udid, uuid = %command_uuid, %result, "command result payload");
                }
                match self.record_report(&udid, &command_uuid, status.outcome(), now) {
                    Ok(command) => {
                        info!(
                            udid,
                            uuid = %command_uuid,
                            status = %command.status,
                            "command report recorded"
                        );
                    }
                    Err(err) if err.is_benign_report() => {
                        warn!(udid, uuid = %command_uuid, %err, "stale report ignored");
                    }
                    Err(err) => return Err(err),
                }
                self.next_command(&udid, now)
            }
            CheckinMessage::Idle { udid } => {
                self.store.touch_device(&udid, now)?;
                self.next_command(&udid, now)
            }
        }
    }

    /// Record a device's report, rejecting reports for commands the
    /// device does not own.
    fn record_report(
        &self,
        udid: &str,
        uuid: &Uuid,
        outcome: ReportOutcome,
        now: DateTime<Utc>,
    ) -> Result<Command> {
        let command = self.store.find_by_uuid(uuid)?;
        if command.device.as_deref() != Some(udid) {
            return Err(Error::UnknownCommand(*uuid));
        }
        self.store.record_result(uuid, outcome, now)
    }

    fn next_command(&self, udid: &str, now: DateTime<Utc>) -> Result<CheckinResponse> {
        match self.store.dequeue_next(udid, now)? {
            Some(command) => {
                info!(
                    udid,
                    uuid = %command.uuid,
                    request_type = %command.request_type,
                    "delivering command"
                );
                Ok(command.into())
            }
            None => Ok(CheckinResponse::empty()),
        }
    }
}
