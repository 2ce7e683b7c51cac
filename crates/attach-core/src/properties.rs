//! Property bundles and their wire serialization.
//!
//! A [`PropertyBundle`] is an ordered string-key/string-value collection.
//! It is the payload shape shared by the property queries and by
//! diagnostic results, and it is opaque to the session loop beyond
//! serialize/deserialize.
//!
//! # Wire Format
//!
//! One `key=value` line per entry, in insertion order, each line
//! terminated by `\n`. Backslash escapes keep the format unambiguous for
//! arbitrary values: `\\`, `\n`, `\r`, `\t` and `\0` everywhere, plus
//! `\=` and a leading `\#` in keys. Lines whose first byte is an
//! unescaped `#` are comments and are skipped by the parser. The empty
//! bundle serializes to zero bytes.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// Marker key present in a diagnostic failure bundle.
pub const DIAGNOSTIC_ERROR_KEY: &str = "diagnostic.error";

/// Error kind field of a diagnostic failure bundle.
pub const DIAGNOSTIC_ERROR_KIND_KEY: &str = "diagnostic.error.kind";

/// Error message field of a diagnostic failure bundle.
pub const DIAGNOSTIC_ERROR_MESSAGE_KEY: &str = "diagnostic.error.message";

/// Ordered string-key/string-value collection.
///
/// Insertion order is preserved. Re-inserting an existing key replaces
/// the value without moving the entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyBundle {
    entries: Vec<(String, String)>,
}

impl PropertyBundle {
    /// Create an empty bundle.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the bundle has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Insert or replace an entry.
    ///
    /// A replaced entry keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serialize to the wire format.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        for (key, value) in &self.entries {
            escape_into(&mut out, key, true);
            out.push('=');
            escape_into(&mut out, value, false);
            out.push('\n');
        }
        out.into_bytes()
    }

    /// Deserialize from the wire format.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedBundle`] on invalid UTF-8, a
    /// line without a key/value separator, or a bad escape sequence.
    pub fn from_bytes(bytes: &[u8]) -> ProtocolResult<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ProtocolError::malformed_bundle("payload is not valid UTF-8"))?;

        let mut bundle = Self::new();
        for line in text.split('\n') {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = parse_line(line)?;
            bundle.entries.push((key, value));
        }
        Ok(bundle)
    }
}

impl FromIterator<(String, String)> for PropertyBundle {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut bundle = Self::new();
        for (key, value) in iter {
            bundle.insert(key, value);
        }
        bundle
    }
}

/// Build the bundle that reports a diagnostic failure on the wire.
///
/// Diagnostic failures travel as data, not as an error response, so the
/// reply shape is the same whether the command succeeded or not.
#[must_use]
pub fn failure_bundle(kind: &str, message: &str) -> PropertyBundle {
    let mut bundle = PropertyBundle::new();
    bundle.insert(DIAGNOSTIC_ERROR_KEY, "true");
    bundle.insert(DIAGNOSTIC_ERROR_KIND_KEY, kind);
    bundle.insert(DIAGNOSTIC_ERROR_MESSAGE_KEY, message);
    bundle
}

fn escape_into(out: &mut String, raw: &str, is_key: bool) {
    for (index, ch) in raw.chars().enumerate() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            '=' if is_key => out.push_str("\\="),
            '#' if is_key && index == 0 => out.push_str("\\#"),
            _ => out.push(ch),
        }
    }
}

/// Split one line into an unescaped key/value pair.
fn parse_line(line: &str) -> ProtocolResult<(String, String)> {
    let mut key = String::new();
    let mut value = String::new();
    let mut target = &mut key;
    let mut saw_separator = false;

    let mut chars = line.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some('\\') => target.push('\\'),
                Some('n') => target.push('\n'),
                Some('r') => target.push('\r'),
                Some('t') => target.push('\t'),
                Some('0') => target.push('\0'),
                Some('=') => target.push('='),
                Some('#') => target.push('#'),
                Some(other) => {
                    return Err(ProtocolError::malformed_bundle(format!(
                        "unknown escape sequence \\{other}"
                    )));
                }
                None => {
                    return Err(ProtocolError::malformed_bundle("dangling escape at end of line"));
                }
            },
            '=' if !saw_separator => {
                saw_separator = true;
                target = &mut value;
            }
            _ => target.push(ch),
        }
    }

    if !saw_separator {
        return Err(ProtocolError::malformed_bundle(
            "line is missing the key/value separator",
        ));
    }
    Ok((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(entries: &[(&str, &str)]) -> PropertyBundle {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn assert_round_trip(original: &PropertyBundle) {
        let decoded = PropertyBundle::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(&decoded, original);
    }

    #[test]
    fn test_round_trip_plain() {
        assert_round_trip(&bundle(&[
            ("process.pid", "4242"),
            ("process.executable", "/usr/bin/daemon"),
        ]));
    }

    #[test]
    fn test_round_trip_empty_bundle() {
        let empty = PropertyBundle::new();
        assert!(empty.to_bytes().is_empty());
        assert_round_trip(&empty);
    }

    #[test]
    fn test_round_trip_control_bytes() {
        assert_round_trip(&bundle(&[
            ("multi\nline", "a\nb\r\nc"),
            ("tabs\tand=equals", "v=1\t2"),
            ("nul", "before\0after"),
            ("#leading.hash", "#value"),
            ("back\\slash", "c:\\path\\x"),
            ("", "empty key"),
            ("empty value", ""),
        ]));
    }

    #[test]
    fn test_order_preserved() {
        let b = bundle(&[("z", "1"), ("a", "2"), ("m", "3")]);
        let keys: Vec<&str> = b.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["z", "a", "m"]);

        let decoded = PropertyBundle::from_bytes(&b.to_bytes()).unwrap();
        let keys: Vec<String> = decoded.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut b = bundle(&[("first", "1"), ("second", "2")]);
        b.insert("first", "updated");

        assert_eq!(b.len(), 2);
        assert_eq!(b.get("first"), Some("updated"));
        let keys: Vec<&str> = b.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["first", "second"]);
    }

    #[test]
    fn test_comment_lines_skipped() {
        let decoded = PropertyBundle::from_bytes(b"# generated\nkey=value\n").unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get("key"), Some("value"));
    }

    #[test]
    fn test_malformed_inputs() {
        for (input, fragment) in [
            (&b"\xff\xfe"[..], "UTF-8"),
            (&b"no separator\n"[..], "separator"),
            (&b"key=value\\q\n"[..], "escape"),
            (&b"key=value\\"[..], "dangling"),
        ] {
            let err = PropertyBundle::from_bytes(input).unwrap_err();
            assert!(
                matches!(&err, ProtocolError::MalformedBundle { reason } if reason.contains(fragment)),
                "input {input:?} produced {err}"
            );
            assert!(!err.is_fatal());
        }
    }

    #[test]
    fn test_failure_bundle_fields() {
        let b = failure_bundle("unknown command", "no such diagnostic: x");
        assert_eq!(b.get(DIAGNOSTIC_ERROR_KEY), Some("true"));
        assert_eq!(b.get(DIAGNOSTIC_ERROR_KIND_KEY), Some("unknown command"));
        assert_eq!(
            b.get(DIAGNOSTIC_ERROR_MESSAGE_KEY),
            Some("no such diagnostic: x")
        );
        assert_round_trip(&b);
    }
}
