//! Response vocabulary.
//!
//! Every command frame is answered by exactly one response frame; the
//! terminal `ATTACH_DETACHED` frame is the only unpaired one. Responses
//! are plain UTF-8 text, except property-bundle replies which frame the
//! serialized bundle directly.

use std::fmt::Display;

use crate::key::AttachKey;

/// Command accepted.
pub const ACK: &str = "ATTACH_ACK";
/// Terminal frame sent once when the session shuts down.
pub const DETACHED: &str = "ATTACH_DETACHED";
/// Handshake tag; the full frame carries the session key.
pub const CONNECTED: &str = "ATTACH_CONNECTED";
/// Prefix of a successful management-agent start, followed by the address.
pub const RESULT_PREFIX: &str = "ATTACH_RESULT=";
/// Error tag, followed by a space and the detail text.
pub const ERROR: &str = "ATTACH_ERROR";

/// Handshake frame: `ATTACH_CONNECTED <key> `.
///
/// The trailing space is part of the wire contract. This is the only
/// place the key is written out in full.
#[must_use]
pub fn connected(key: &AttachKey) -> String {
    format!("{CONNECTED} {} ", key.expose())
}

/// Success frame for a local management-agent start.
#[must_use]
pub fn result(address: &str) -> String {
    format!("{RESULT_PREFIX}{address}")
}

/// Error frame: `ATTACH_ERROR <detail>`.
#[must_use]
pub fn error(detail: impl Display) -> String {
    format!("{ERROR} {detail}")
}

/// Error frame for an unrecognized command, echoing the raw text.
#[must_use]
pub fn invalid_command(raw: &str) -> String {
    format!("{ERROR} command invalid: {raw}")
}

/// Error frame for a failure that escaped a capability provider.
#[must_use]
pub fn unexpected_error(detail: impl Display) -> String {
    format!("{ERROR} unexpected error: {detail}")
}
