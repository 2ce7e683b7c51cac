//! Wire protocol for loopback attach sessions.
//!
//! This crate holds everything both ends of an attach session agree on:
//! the frame codec, the command and response vocabulary, the property
//! bundle format, and the shared session key. The target-process side
//! (`attach-daemon`) builds its session loop on these primitives; a
//! controller implementation uses the same primitives from the other side
//! of the socket.
//!
//! # Protocol Stack
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Commands / Responses / Bundles        │  command, response, properties
//! ├─────────────────────────────────────────┤
//! │   Framing                               │  4-byte BE length prefix
//! ├─────────────────────────────────────────┤
//! │   Loopback TCP transport                │  tokio
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Wire Format
//!
//! Every payload (command, response, or serialized property bundle)
//! travels as one opaque length-delimited byte frame:
//!
//! ```text
//! +----------------------------+------------------+
//! | Length (4 bytes, BE)       | Payload          |
//! +----------------------------+------------------+
//! ```
//!
//! - Maximum frame size: 4 MiB, validated before allocation
//! - Payload: opaque bytes; text commands and responses are UTF-8,
//!   property bundles use the format in [`properties`]

pub mod command;
pub mod error;
pub mod framing;
pub mod key;
pub mod properties;
pub mod response;

pub use command::Command;
pub use error::{MAX_FRAME_SIZE, ProtocolError, ProtocolResult};
pub use framing::{receive_frame, send_frame};
pub use key::AttachKey;
pub use properties::PropertyBundle;
