//! Command vocabulary and parsing.
//!
//! Commands form a closed set of ASCII, case-sensitive verbs. Dispatch is
//! by prefix, matching the wire contract: trailing bytes after a
//! recognized verb are tolerated, and `ATTACH_LOADAGENTPATH` must be
//! tested before `ATTACH_LOADAGENT` (the latter is a prefix of the
//! former). An unrecognized verb is a recoverable condition carried as
//! [`Command::Unknown`], never a parse error.

use crate::error::{ProtocolError, ProtocolResult};

/// Terminate the session loop.
pub const DETACH: &str = "ATTACH_DETACH";
/// Load a native extension library by name, with platform decoration.
pub const LOADAGENT: &str = "ATTACH_LOADAGENT";
/// Load a native extension library by full path, without decoration.
pub const LOADAGENT_PATH: &str = "ATTACH_LOADAGENTPATH";
/// Fetch the process property bundle.
pub const GET_SYSTEM_PROPERTIES: &str = "ATTACH_GET_SYSTEM_PROPERTIES";
/// Fetch the agent-scoped property bundle.
pub const GET_AGENT_PROPERTIES: &str = "ATTACH_GET_AGENT_PROPERTIES";
/// Start the local management endpoint and return its address.
pub const START_LOCAL_MANAGEMENT_AGENT: &str = "ATTACH_START_LOCAL_MANAGEMENT_AGENT";
/// Start the remote management endpoint, configured by a property bundle.
pub const START_MANAGEMENT_AGENT: &str = "ATTACH_START_MANAGEMENT_AGENT";
/// Prefix for diagnostic commands; the remainder is the diagnostic name.
pub const DIAGNOSTICS_PREFIX: &str = "ATTACH_DIAGNOSTICS:";

/// One parsed inbound command, fully consumed from exactly one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `ATTACH_DETACH`.
    Detach,
    /// `ATTACH_LOADAGENT(name,options)` / `ATTACH_LOADAGENTPATH(path,options)`.
    LoadAgent {
        /// Library name or path, never empty.
        library: String,
        /// Options handed to the extension entry point; may be empty.
        options: String,
        /// Whether the provider should decorate the library name with
        /// platform prefixes and suffixes.
        decorate: bool,
    },
    /// `ATTACH_GET_SYSTEM_PROPERTIES`.
    GetSystemProperties,
    /// `ATTACH_GET_AGENT_PROPERTIES`.
    GetAgentProperties,
    /// `ATTACH_START_LOCAL_MANAGEMENT_AGENT`.
    StartLocalManagementAgent,
    /// `ATTACH_START_MANAGEMENT_AGENT`, with the configuration bundle
    /// either embedded after a NUL byte or expected in a follow-up frame.
    StartManagementAgent {
        /// Serialized property bundle embedded in the command frame, when
        /// present. `None` means the bundle arrives in the next frame.
        inline_bundle: Option<Vec<u8>>,
    },
    /// `ATTACH_DIAGNOSTICS:<name>`.
    RunDiagnostic {
        /// Diagnostic command name; may be empty.
        name: String,
    },
    /// Anything else. Answered with an error response; never fatal.
    Unknown {
        /// The unrecognized command text, lossily decoded for the reply.
        raw: String,
    },
}

impl Command {
    /// Parse one command frame.
    ///
    /// The frame's text portion runs to the first NUL byte (or the whole
    /// frame when none is present); bytes after the NUL are payload for
    /// commands that carry one.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedLoadAgent`] for a LOADAGENT verb
    /// whose argument list is malformed. This is recoverable: the caller
    /// answers with an error response and no provider call occurs.
    pub fn parse(frame: &[u8]) -> ProtocolResult<Self> {
        let nul = frame.iter().position(|&b| b == 0);
        let text_bytes = &frame[..nul.unwrap_or(frame.len())];
        let trailer = nul.map(|at| &frame[at + 1..]).unwrap_or_default();

        let Ok(text) = std::str::from_utf8(text_bytes) else {
            return Ok(Self::Unknown {
                raw: String::from_utf8_lossy(text_bytes).into_owned(),
            });
        };

        if text.starts_with(DETACH) {
            Ok(Self::Detach)
        } else if text.starts_with(LOADAGENT_PATH) {
            parse_load_agent(text, false)
        } else if text.starts_with(LOADAGENT) {
            parse_load_agent(text, true)
        } else if text.starts_with(GET_SYSTEM_PROPERTIES) {
            Ok(Self::GetSystemProperties)
        } else if text.starts_with(GET_AGENT_PROPERTIES) {
            Ok(Self::GetAgentProperties)
        } else if text.starts_with(START_LOCAL_MANAGEMENT_AGENT) {
            Ok(Self::StartLocalManagementAgent)
        } else if text.starts_with(START_MANAGEMENT_AGENT) {
            Ok(Self::StartManagementAgent {
                inline_bundle: (!trailer.is_empty()).then(|| trailer.to_vec()),
            })
        } else if let Some(name) = text.strip_prefix(DIAGNOSTICS_PREFIX) {
            Ok(Self::RunDiagnostic {
                name: name.to_string(),
            })
        } else {
            Ok(Self::Unknown {
                raw: text.to_string(),
            })
        }
    }

    /// The verb name used in log lines.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Detach => DETACH,
            Self::LoadAgent { .. } => LOADAGENT,
            Self::GetSystemProperties => GET_SYSTEM_PROPERTIES,
            Self::GetAgentProperties => GET_AGENT_PROPERTIES,
            Self::StartLocalManagementAgent => START_LOCAL_MANAGEMENT_AGENT,
            Self::StartManagementAgent { .. } => START_MANAGEMENT_AGENT,
            Self::RunDiagnostic { .. } => DIAGNOSTICS_PREFIX,
            Self::Unknown { .. } => "unknown",
        }
    }
}

/// Parse the `name(options)` argument list of a LOADAGENT command.
///
/// The name runs from the first `(` to the first `,` inside the
/// parentheses, or to the last `)` when there is no comma; the options
/// are the remainder before the last `)` and may be empty.
fn parse_load_agent(text: &str, decorate: bool) -> ProtocolResult<Command> {
    const SYNTAX_ERROR: ProtocolError = ProtocolError::MalformedLoadAgent {
        reason: "syntax error",
    };

    let open = text.find('(').ok_or(SYNTAX_ERROR)?;
    let close = text.rfind(')').ok_or(SYNTAX_ERROR)?;
    if close < open {
        return Err(SYNTAX_ERROR);
    }

    let arguments = &text[open + 1..close];
    let (library, options) = match arguments.find(',') {
        Some(comma) => (&arguments[..comma], &arguments[comma + 1..]),
        None => (arguments, ""),
    };
    if library.is_empty() {
        return Err(ProtocolError::MalformedLoadAgent {
            reason: "invalid agent name",
        });
    }

    Ok(Command::LoadAgent {
        library: library.to_string(),
        options: options.to_string(),
        decorate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Command {
        Command::parse(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_detach() {
        assert_eq!(parse("ATTACH_DETACH"), Command::Detach);
    }

    #[test]
    fn test_load_agent_with_options() {
        assert_eq!(
            parse("ATTACH_LOADAGENT(myagent,-opt1)"),
            Command::LoadAgent {
                library: "myagent".into(),
                options: "-opt1".into(),
                decorate: true,
            }
        );
    }

    #[test]
    fn test_load_agent_without_options() {
        assert_eq!(
            parse("ATTACH_LOADAGENT(myagent)"),
            Command::LoadAgent {
                library: "myagent".into(),
                options: String::new(),
                decorate: true,
            }
        );
    }

    #[test]
    fn test_load_agent_options_keep_embedded_commas() {
        assert_eq!(
            parse("ATTACH_LOADAGENT(myagent,a,b,c)"),
            Command::LoadAgent {
                library: "myagent".into(),
                options: "a,b,c".into(),
                decorate: true,
            }
        );
    }

    #[test]
    fn test_load_agent_path_disables_decoration() {
        assert_eq!(
            parse("ATTACH_LOADAGENTPATH(/opt/ext/libtrace.so,verbose)"),
            Command::LoadAgent {
                library: "/opt/ext/libtrace.so".into(),
                options: "verbose".into(),
                decorate: false,
            }
        );
    }

    #[test]
    fn test_load_agent_empty_name_rejected() {
        for text in ["ATTACH_LOADAGENT(,)", "ATTACH_LOADAGENT()"] {
            let err = Command::parse(text.as_bytes()).unwrap_err();
            assert!(
                matches!(
                    err,
                    ProtocolError::MalformedLoadAgent {
                        reason: "invalid agent name"
                    }
                ),
                "{text} produced {err}"
            );
        }
    }

    #[test]
    fn test_load_agent_unbalanced_parens_rejected() {
        for text in [
            "ATTACH_LOADAGENT",
            "ATTACH_LOADAGENT(myagent",
            "ATTACH_LOADAGENTmyagent)",
            "ATTACH_LOADAGENT)myagent(",
        ] {
            let err = Command::parse(text.as_bytes()).unwrap_err();
            assert!(
                matches!(
                    err,
                    ProtocolError::MalformedLoadAgent {
                        reason: "syntax error"
                    }
                ),
                "{text} produced {err}"
            );
        }
    }

    #[test]
    fn test_property_queries() {
        assert_eq!(
            parse("ATTACH_GET_SYSTEM_PROPERTIES"),
            Command::GetSystemProperties
        );
        assert_eq!(
            parse("ATTACH_GET_AGENT_PROPERTIES"),
            Command::GetAgentProperties
        );
    }

    #[test]
    fn test_start_local_management_agent() {
        assert_eq!(
            parse("ATTACH_START_LOCAL_MANAGEMENT_AGENT"),
            Command::StartLocalManagementAgent
        );
    }

    #[test]
    fn test_start_management_agent_without_inline_bundle() {
        // No NUL, and NUL with nothing after it, both defer to a
        // follow-up frame.
        for frame in [
            &b"ATTACH_START_MANAGEMENT_AGENT"[..],
            b"ATTACH_START_MANAGEMENT_AGENT\0",
        ] {
            assert_eq!(
                Command::parse(frame).unwrap(),
                Command::StartManagementAgent { inline_bundle: None }
            );
        }
    }

    #[test]
    fn test_start_management_agent_with_inline_bundle() {
        let frame = b"ATTACH_START_MANAGEMENT_AGENT\0management.port=9010\n";
        assert_eq!(
            Command::parse(frame).unwrap(),
            Command::StartManagementAgent {
                inline_bundle: Some(b"management.port=9010\n".to_vec()),
            }
        );
    }

    #[test]
    fn test_diagnostics_name_extraction() {
        assert_eq!(
            parse("ATTACH_DIAGNOSTICS:gc.run"),
            Command::RunDiagnostic {
                name: "gc.run".into()
            }
        );
        assert_eq!(
            parse("ATTACH_DIAGNOSTICS:"),
            Command::RunDiagnostic {
                name: String::new()
            }
        );
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            parse("ATTACH_SELF_DESTRUCT"),
            Command::Unknown {
                raw: "ATTACH_SELF_DESTRUCT".into()
            }
        );
    }

    #[test]
    fn test_non_utf8_verb_is_unknown() {
        let cmd = Command::parse(&[0xff, 0xfe, b'x']).unwrap();
        assert!(matches!(cmd, Command::Unknown { .. }));
    }
}
