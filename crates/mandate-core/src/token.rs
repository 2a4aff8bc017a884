//! Push token encoding.
//!
//! Device push tokens are raw bytes on the wire but are persisted as
//! base64 strings. Encoding happens only at the store boundary; the
//! in-memory representation is always the decoded bytes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};

/// Encode a raw push token for persistence.
pub fn encode_push_token(token: &[u8]) -> String {
    STANDARD.encode(token)
}

/// Decode a persisted push token back into raw bytes.
pub fn decode_push_token(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| Error::Serialization(format!("invalid push token encoding: {}", e)))
}
