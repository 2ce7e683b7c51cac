//! Protocol error taxonomy.
//!
//! Errors are split along one axis that the session loop branches on:
//! whether the byte stream is still usable afterwards. Recoverable errors
//! (oversized frame that was drained, malformed bundle, malformed
//! LOADAGENT syntax) are answered with an `ATTACH_ERROR` response and the
//! session keeps running. Fatal errors (mid-frame truncation, transport
//! I/O failure) terminate the session.

use std::io;

use thiserror::Error;

/// Maximum frame size in bytes (4 MiB).
///
/// Frames are capped to bound memory consumption; the limit is validated
/// against the length prefix before any payload allocation.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Errors raised by the wire protocol layer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame length prefix exceeds [`MAX_FRAME_SIZE`].
    ///
    /// The announced payload is drained from the stream before this is
    /// returned, so the connection stays synchronized and the session can
    /// answer with an error response.
    #[error("frame too large: {size} bytes exceeds maximum {max} bytes")]
    FrameTooLarge {
        /// Size announced by the length prefix.
        size: usize,
        /// Maximum allowed frame size.
        max: usize,
    },

    /// The peer closed the connection in the middle of a frame.
    ///
    /// Distinct from a clean close between frames, which
    /// [`receive_frame`](crate::framing::receive_frame) reports as
    /// `Ok(None)`.
    #[error("stream truncated while reading {context}")]
    Truncated {
        /// What was being read when the stream ended.
        context: &'static str,
    },

    /// A serialized property bundle did not parse.
    #[error("malformed property bundle: {reason}")]
    MalformedBundle {
        /// Description of the parse failure.
        reason: String,
    },

    /// A LOADAGENT command did not follow the `name(args)` syntax.
    ///
    /// The reason string is sent back to the controller verbatim.
    #[error("{reason}")]
    MalformedLoadAgent {
        /// `syntax error` or `invalid agent name`.
        reason: &'static str,
    },

    /// Underlying transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Create a frame too large error.
    #[must_use]
    pub const fn frame_too_large(size: usize) -> Self {
        Self::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        }
    }

    /// Create a truncation error.
    #[must_use]
    pub const fn truncated(context: &'static str) -> Self {
        Self::Truncated { context }
    }

    /// Create a malformed bundle error.
    #[must_use]
    pub fn malformed_bundle(reason: impl Into<String>) -> Self {
        Self::MalformedBundle {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the byte stream is no longer usable and the
    /// session must terminate.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Truncated { .. } | Self::Io(_))
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ProtocolError::truncated("payload").is_fatal());
        assert!(ProtocolError::from(io::Error::new(io::ErrorKind::BrokenPipe, "pipe")).is_fatal());

        assert!(!ProtocolError::frame_too_large(usize::MAX).is_fatal());
        assert!(!ProtocolError::malformed_bundle("missing separator").is_fatal());
        assert!(
            !ProtocolError::MalformedLoadAgent {
                reason: "syntax error"
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_display_carries_detail() {
        let err = ProtocolError::frame_too_large(20_000_000);
        let msg = err.to_string();
        assert!(msg.contains("20000000"));
        assert!(msg.contains(&MAX_FRAME_SIZE.to_string()));

        let err = ProtocolError::MalformedLoadAgent {
            reason: "invalid agent name",
        };
        assert_eq!(err.to_string(), "invalid agent name");
    }
}
