//! Device registry.
//!
//! One record per enrolled endpoint, keyed by UDID. Push tokens are
//! raw bytes in memory and base64 only inside the persisted record;
//! the encode/decode happens here at the store boundary and nowhere
//! else.

use chrono::{DateTime, Utc};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use mandate_core::{decode_push_token, encode_push_token, Error, Result};

use crate::store::{Store, DEVICES_TABLE};

/// An enrolled device.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    /// Unique Device Identifier. Stable per endpoint across its
    /// enrollment lifetime.
    pub udid: String,
    /// Hardware serial number.
    pub serial_number: Option<String>,
    /// Device name, as reported at enrollment.
    pub device_name: Option<String>,
    /// Hardware model name.
    pub model: Option<String>,
    /// Operating system version.
    pub os_version: Option<String>,
    /// OS build version.
    pub build_version: Option<String>,
    /// Base product name of the hardware.
    pub product_name: Option<String>,
    /// Whether the control plane considers this device enrolled.
    /// Devices are never hard-deleted, only soft-unenrolled.
    pub enrolled: bool,
    /// Push topic the device listens on.
    pub topic: Option<String>,
    /// The magic that ties push notifications to this enrollment.
    pub push_magic: Option<String>,
    /// Rotating push token, decoded.
    pub push_token: Option<Vec<u8>>,
    /// When the device last contacted the server.
    pub last_seen: Option<DateTime<Utc>>,
    /// When a push was last sent for this device.
    pub last_push_at: Option<DateTime<Utc>>,
    /// Consecutive failed push attempts. Observable counter only; no
    /// unenrollment threshold is enforced here.
    pub failed_push_count: u32,
}

impl Device {
    fn new(udid: impl Into<String>) -> Self {
        Self {
            udid: udid.into(),
            serial_number: None,
            device_name: None,
            model: None,
            os_version: None,
            build_version: None,
            product_name: None,
            enrolled: false,
            topic: None,
            push_magic: None,
            push_token: None,
            last_seen: None,
            last_push_at: None,
            failed_push_count: 0,
        }
    }

    /// A device is pushable once it has reported the full addressing
    /// triple.
    pub fn has_push_address(&self) -> bool {
        self.push_token.is_some() && self.push_magic.is_some() && self.topic.is_some()
    }
}

/// Attributes merged into a device at enrollment or check-in. `None`
/// fields leave the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceAttributes {
    pub serial_number: Option<String>,
    pub device_name: Option<String>,
    pub model: Option<String>,
    pub os_version: Option<String>,
    pub build_version: Option<String>,
    pub product_name: Option<String>,
    pub topic: Option<String>,
}

/// Persisted form of [`Device`]; the push token is base64.
#[derive(Debug, Serialize, Deserialize)]
struct DeviceRecord {
    udid: String,
    serial_number: Option<String>,
    device_name: Option<String>,
    model: Option<String>,
    os_version: Option<String>,
    build_version: Option<String>,
    product_name: Option<String>,
    enrolled: bool,
    topic: Option<String>,
    push_magic: Option<String>,
    push_token: Option<String>,
    last_seen: Option<DateTime<Utc>>,
    last_push_at: Option<DateTime<Utc>>,
    failed_push_count: u32,
}

fn to_record(device: &Device) -> DeviceRecord {
    DeviceRecord {
        udid: device.udid.clone(),
        serial_number: device.serial_number.clone(),
        device_name: device.device_name.clone(),
        model: device.model.clone(),
        os_version: device.os_version.clone(),
        build_version: device.build_version.clone(),
        product_name: device.product_name.clone(),
        enrolled: device.enrolled,
        topic: device.topic.clone(),
        push_magic: device.push_magic.clone(),
        push_token: device.push_token.as_deref().map(encode_push_token),
        last_seen: device.last_seen,
        last_push_at: device.last_push_at,
        failed_push_count: device.failed_push_count,
    }
}

fn from_record(record: DeviceRecord) -> Result<Device> {
    let push_token = match record.push_token {
        Some(encoded) => Some(decode_push_token(&encoded)?),
        None => None,
    };
    Ok(Device {
        udid: record.udid,
        serial_number: record.serial_number,
        device_name: record.device_name,
        model: record.model,
        os_version: record.os_version,
        build_version: record.build_version,
        product_name: record.product_name,
        enrolled: record.enrolled,
        topic: record.topic,
        push_magic: record.push_magic,
        push_token,
        last_seen: record.last_seen,
        last_push_at: record.last_push_at,
        failed_push_count: record.failed_push_count,
    })
}

fn encode_device(device: &Device) -> Result<String> {
    Ok(serde_json::to_string(&to_record(device))?)
}

fn decode_device(json: &str) -> Result<Device> {
    from_record(serde_json::from_str(json)?)
}

impl Store {
    /// Create or update a device. Idempotent: creates on first sight,
    /// otherwise merges the supplied attributes. Marks the device
    /// enrolled and bumps `last_seen`.
    pub fn upsert_device(
        &self,
        udid: &str,
        attributes: DeviceAttributes,
        now: DateTime<Utc>,
    ) -> Result<Device> {
        let txn = self.db().begin_write()?;
        let device = {
            let mut devices = txn.open_table(DEVICES_TABLE)?;
            let mut device = {
                match devices.get(udid)? {
                    Some(raw) => decode_device(raw.value())?,
                    None => {
                        debug!(udid, "registering new device");
                        Device::new(udid)
                    }
                }
            };
            if let Some(v) = attributes.serial_number {
                device.serial_number = Some(v);
            }
            if let Some(v) = attributes.device_name {
                device.device_name = Some(v);
            }
            if let Some(v) = attributes.model {
                device.model = Some(v);
            }
            if let Some(v) = attributes.os_version {
                device.os_version = Some(v);
            }
            if let Some(v) = attributes.build_version {
                device.build_version = Some(v);
            }
            if let Some(v) = attributes.product_name {
                device.product_name = Some(v);
            }
            if let Some(v) = attributes.topic {
                device.topic = Some(v);
            }
            device.enrolled = true;
            device.last_seen = Some(now);
            devices.insert(udid, encode_device(&device)?.as_str())?;
            device
        };
        txn.commit()?;
        Ok(device)
    }

    /// Update a device's push address. Idempotent; rotating tokens
    /// overwrite the previous one. No command state is touched.
    pub fn record_push_address(
        &self,
        udid: &str,
        token: &[u8],
        push_magic: &str,
        topic: &str,
        now: DateTime<Utc>,
    ) -> Result<Device> {
        let txn = self.db().begin_write()?;
        let device = {
            let mut devices = txn.open_table(DEVICES_TABLE)?;
            let mut device = {
                match devices.get(udid)? {
                    Some(raw) => decode_device(raw.value())?,
                    None => return Err(Error::NotFound(format!("device {}", udid))),
                }
            };
            device.push_token = Some(token.to_vec());
            device.push_magic = Some(push_magic.to_string());
            device.topic = Some(topic.to_string());
            device.last_seen = Some(now);
            devices.insert(udid, encode_device(&device)?.as_str())?;
            device
        };
        txn.commit()?;
        debug!(udid, "push address updated");
        Ok(device)
    }

    /// Record the outcome of a push attempt. Success resets the
    /// failure counter and stamps `last_push_at`; failure increments
    /// the counter for an external policy to observe.
    pub fn note_push_outcome(&self, udid: &str, success: bool, now: DateTime<Utc>) -> Result<()> {
        let txn = self.db().begin_write()?;
        {
            let mut devices = txn.open_table(DEVICES_TABLE)?;
            let mut device = {
                match devices.get(udid)? {
                    Some(raw) => decode_device(raw.value())?,
                    None => return Err(Error::NotFound(format!("device {}", udid))),
                }
            };
            if success {
                device.failed_push_count = 0;
                device.last_push_at = Some(now);
            } else {
                device.failed_push_count += 1;
                warn!(
                    udid,
                    failed_push_count = device.failed_push_count,
                    "push attempt failed"
                );
            }
            devices.insert(udid, encode_device(&device)?.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Soft-unenroll a device. The record and its command history stay.
    pub fn check_out(&self, udid: &str, now: DateTime<Utc>) -> Result<Device> {
        let txn = self.db().begin_write()?;
        let device = {
            let mut devices = txn.open_table(DEVICES_TABLE)?;
            let mut device = {
                match devices.get(udid)? {
                    Some(raw) => decode_device(raw.value())?,
                    None => return Err(Error::NotFound(format!("device {}", udid))),
                }
            };
            device.enrolled = false;
            device.last_seen = Some(now);
            devices.insert(udid, encode_device(&device)?.as_str())?;
            device
        };
        txn.commit()?;
        debug!(udid, "device checked out");
        Ok(device)
    }

    /// Bump `last_seen` for a known device. Unknown devices are a
    /// no-op: an idle poll must never fail the check-in.
    pub fn touch_device(&self, udid: &str, now: DateTime<Utc>) -> Result<()> {
        let txn = self.db().begin_write()?;
        {
            let mut devices = txn.open_table(DEVICES_TABLE)?;
            let existing = {
                match devices.get(udid)? {
                    Some(raw) => Some(decode_device(raw.value())?),
                    None => None,
                }
            };
            if let Some(mut device) = existing {
                device.last_seen = Some(now);
                devices.insert(udid, encode_device(&device)?.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Look up a device by UDID.
    pub fn get_device(&self, udid: &str) -> Result<Device> {
        let txn = self.db().begin_read()?;
        let devices = txn.open_table(DEVICES_TABLE)?;
        match devices.get(udid)? {
            Some(raw) => decode_device(raw.value()),
            None => Err(Error::NotFound(format!("device {}", udid))),
        }
    }

    /// List all known devices.
    pub fn list_devices(&self) -> Result<Vec<Device>> {
        let txn = self.db().begin_read()?;
        let devices = txn.open_table(DEVICES_TABLE)?;
        let mut out = Vec::new();
        for row in devices.iter()? {
            let (_udid, raw) = row?;
            out.push(decode_device(raw.value())?);
        }
        Ok(out)
    }
}
