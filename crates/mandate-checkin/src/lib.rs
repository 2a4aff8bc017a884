//! Check-in protocol handling for the mandate MDM control plane.
//!
//! This crate is the boundary between devices and the store: the
//! [`CheckinHandler`] interprets inbound device messages and answers
//! with the next command, the [`PushDispatcher`] wakes devices up when
//! new work lands, and the [`CommandService`] is the management-side
//! submission surface that ties the two together.

pub mod handler;
pub mod message;
pub mod push;
pub mod service;

pub use mandate_core::{Error, Result};

pub use handler::CheckinHandler;
pub use message::{CheckinMessage, CheckinResponse, NextCommand, ReportStatus};
pub use push::{PushAddress, PushDispatcher, PushError, PushTransport};
pub use service::CommandService;
