//! Wire messages for the check-in endpoint.
//!
//! Every inbound device message is one payload whose `MessageType`
//! field selects the kind. Field names mirror the device-side property
//! list keys, so a transcoded plist deserializes directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use mandate_commands::{Command, ReportOutcome};

/// An inbound device message, discriminated by `MessageType`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "MessageType")]
pub enum CheckinMessage {
    /// Enrollment event. Registers or re-registers the device.
    Authenticate {
        #[serde(rename = "UDID")]
        udid: String,
        #[serde(rename = "Topic", default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        #[serde(rename = "SerialNumber", default, skip_serializing_if = "Option::is_none")]
        serial_number: Option<String>,
        #[serde(rename = "DeviceName", default, skip_serializing_if = "Option::is_none")]
        device_name: Option<String>,
        #[serde(rename = "Model", default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(rename = "OSVersion", default, skip_serializing_if = "Option::is_none")]
        os_version: Option<String>,
        #[serde(rename = "BuildVersion", default, skip_serializing_if = "Option::is_none")]
        build_version: Option<String>,
        #[serde(rename = "ProductName", default, skip_serializing_if = "Option::is_none")]
        product_name: Option<String>,
    },
    /// New or rotated push address for the device.
    TokenUpdate {
        #[serde(rename = "UDID")]
        udid: String,
        /// Push token, base64 on the wire.
        #[serde(rename = "Token")]
        token: String,
        #[serde(rename = "PushMagic")]
        push_magic: String,
        #[serde(rename = "Topic")]
        topic: String,
    },
    /// The device is leaving management.
    CheckOut {
        #[serde(rename = "UDID")]
        udid: String,
    },
    /// The device reports the outcome of a previously delivered
    /// command and asks for the next one.
    CommandResult {
        #[serde(rename = "UDID")]
        udid: String,
        #[serde(rename = "CommandUUID")]
        command_uuid: Uuid,
        #[serde(rename = "Status")]
        status: ReportStatus,
        /// Opaque result payload. Logged, not persisted.
        #[serde(rename = "Result", default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    /// The device has nothing to report and asks for the next command.
    Idle {
        #[serde(rename = "UDID")]
        udid: String,
    },
}

impl CheckinMessage {
    /// The reporting device's UDID.
    pub fn udid(&self) -> &str {
        match self {
            CheckinMessage::Authenticate { udid, .. }
            | CheckinMessage::TokenUpdate { udid, .. }
            | CheckinMessage::CheckOut { udid }
            | CheckinMessage::CommandResult { udid, .. }
            | CheckinMessage::Idle { udid } => udid,
        }
    }
}

/// Command outcome as reported on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReportStatus {
    Acknowledged,
    Error,
    /// The payload could not even be parsed by the device. Treated as
    /// a hard failure.
    CommandFormatError,
    NotNow,
}

impl ReportStatus {
    /// Map the wire status onto a store-level outcome.
    pub fn outcome(self) -> ReportOutcome {
        match self {
            ReportStatus::Acknowledged => ReportOutcome::Acknowledged,
            ReportStatus::Error | ReportStatus::CommandFormatError => ReportOutcome::Error,
            ReportStatus::NotNow => ReportOutcome::NotNow,
        }
    }
}

/// The response to a check-in: either the next command to execute or
/// an empty acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CheckinResponse {
    NextCommand(NextCommand),
    Empty {},
}

impl CheckinResponse {
    pub fn empty() -> Self {
        CheckinResponse::Empty {}
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CheckinResponse::Empty {})
    }
}

/// The delivery payload handed to a device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NextCommand {
    #[serde(rename = "CommandUUID")]
    pub command_uuid: Uuid,
    #[serde(rename = "RequestType")]
    pub request_type: String,
    #[serde(rename = "Parameters")]
    pub parameters: Value,
}

impl From<Command> for CheckinResponse {
    fn from(command: Command) -> Self {
        CheckinResponse::NextCommand(NextCommand {
            command_uuid: command.uuid,
            request_type: command.request_type,
            parameters: command.parameters,
        })
    }
}
