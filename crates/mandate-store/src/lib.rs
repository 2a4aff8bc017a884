//! Durable state for the mandate MDM control plane, backed by redb.
//!
//! The [`Store`] is the unit of truth for queue state: commands, their
//! statuses, devices, and command sequences. It is opened once at
//! process start and passed explicitly to every component; there is no
//! ambient global handle.
//!
//! redb gives serialized, atomic write transactions, which is what
//! makes the check-in path safe under concurrency: selecting the next
//! command and marking it `Sent` happen in one transaction, and a
//! terminal failure cascades into its sequence in the same transaction
//! that records it.

pub mod devices;
pub mod sequences;
pub mod store;

pub use mandate_core::{Error, Result};

pub use devices::{Device, DeviceAttributes};
pub use store::Store;
