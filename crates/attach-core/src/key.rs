//! The pre-shared session key.
//!
//! The key authenticates a session to its controller. It is opaque,
//! compared in constant time, and never logged in full: `Debug` and
//! `Display` both redact it. The only sanctioned way to read it back out
//! is [`AttachKey::expose`], used when building the handshake frame.

use subtle::ConstantTimeEq;

/// Opaque pre-shared session key.
#[derive(Clone)]
pub struct AttachKey(String);

impl AttachKey {
    /// Wrap a key value.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key, for the handshake frame only. Keep it out of logs.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl PartialEq for AttachKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for AttachKey {}

impl std::fmt::Debug for AttachKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AttachKey").field(&"[REDACTED]").finish()
    }
}

impl std::fmt::Display for AttachKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<&str> for AttachKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality() {
        assert_eq!(AttachKey::new("topsecret"), AttachKey::new("topsecret"));
        assert_ne!(AttachKey::new("topsecret"), AttachKey::new("topsecreT"));
        assert_ne!(AttachKey::new("short"), AttachKey::new("longer-key"));
    }

    #[test]
    fn test_debug_and_display_redact() {
        let key = AttachKey::new("topsecret");
        assert!(!format!("{key:?}").contains("topsecret"));
        assert!(!format!("{key}").contains("topsecret"));
    }

    #[test]
    fn test_expose_returns_raw_key() {
        assert_eq!(AttachKey::new("topsecret").expose(), "topsecret");
    }
}
