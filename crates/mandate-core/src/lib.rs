//! Core types for the mandate MDM control plane.
//!
//! This crate defines the foundational pieces shared across the project:
//! the error taxonomy, push-token encoding, and configuration defaults.

pub mod config;
pub mod error;
pub mod token;

pub use error::{Error, Result};
pub use token::{decode_push_token, encode_push_token};
