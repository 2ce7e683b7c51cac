//! Capability-provider interfaces.
//!
//! Each privileged action a session can perform on behalf of a
//! controller is behind a narrow synchronous trait: loading a native
//! extension, reading process or agent properties, starting a management
//! endpoint, and running a diagnostic command. The session never
//! inspects a provider's internals; it only sees the typed
//! result-or-error outcome and converts it into a wire response.
//!
//! Provider failures are data, not control flow: an unavailable
//! capability returns [`ProviderError`] (and a diagnostic failure
//! returns a failure bundle) instead of panicking, so the session loop
//! keeps running.

use std::sync::Arc;

use attach_core::PropertyBundle;
use thiserror::Error;

mod diagnostics;
mod extension;
mod management;
mod runtime;

pub use diagnostics::{BuiltinDiagnostics, DisabledDiagnostics, select_diagnostics};
pub use extension::DisabledExtensionLoader;
pub use management::{
    CachingAgentStarter, LOCAL_CONNECTOR_ADDRESS, StaticAgentStarter, UnavailableAgentStarter,
    select_agent_starter,
};
pub use runtime::RuntimePropertySource;

/// Classification of a provider failure, named on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The operation was attempted and failed.
    OperationFailed,
    /// The capability is not available in this process.
    NotSupported,
    /// The controller supplied an unusable argument.
    InvalidArgument,
    /// A native extension library could not be loaded.
    LoadFailed,
    /// A native extension library loaded but failed to initialize.
    InitializationFailed,
}

impl ProviderErrorKind {
    /// Stable wire name for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OperationFailed => "operation failed",
            Self::NotSupported => "not supported",
            Self::InvalidArgument => "invalid argument",
            Self::LoadFailed => "load failure",
            Self::InitializationFailed => "initialization failure",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure reported by a capability provider.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    /// Failure classification.
    pub kind: ProviderErrorKind,
    /// Human-readable detail, sent to the controller.
    pub message: String,
}

impl ProviderError {
    /// Create a provider error.
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// An attempted operation failed.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::OperationFailed, message)
    }

    /// The capability is not available in this process.
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotSupported, message)
    }

    /// The controller supplied an unusable argument.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidArgument, message)
    }

    /// A native extension library could not be loaded.
    pub fn load_failed(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::LoadFailed, message)
    }
}

/// Loads native extension libraries into the process.
pub trait ExtensionLoader: Send + Sync {
    /// Load `library` and hand it `options`.
    ///
    /// `decorate` asks the loader to apply platform prefixes and
    /// suffixes to a bare library name; it is `false` when the
    /// controller supplied a full path.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] describing why the library could not
    /// be loaded or initialized.
    fn load(&self, library: &str, options: &str, decorate: bool) -> Result<(), ProviderError>;
}

/// Supplies the process and agent property bundles.
pub trait PropertySource: Send + Sync {
    /// Properties describing the running process.
    fn process_properties(&self) -> PropertyBundle;

    /// Agent-scoped properties.
    fn agent_properties(&self) -> PropertyBundle;

    /// The process argument vector, joined by the session into the
    /// derived argument-string property.
    fn process_arguments(&self) -> Vec<String>;
}

/// Starts management endpoints.
pub trait AgentStarter: Send + Sync {
    /// Start (or locate) the local management endpoint.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] when the endpoint is unavailable or
    /// its address cannot be determined.
    fn start_local(&self) -> Result<String, ProviderError>;

    /// Start the remote management endpoint with the given
    /// configuration bundle.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] when the configuration is unusable or
    /// the endpoint cannot be started.
    fn start_remote(&self, config: &PropertyBundle) -> Result<(), ProviderError>;
}

/// Runs diagnostic commands.
pub trait DiagnosticExecutor: Send + Sync {
    /// Execute the named diagnostic and return its result bundle.
    ///
    /// Failures are reported inside the bundle (see
    /// [`attach_core::properties::failure_bundle`]) so the wire reply
    /// has the same shape either way.
    fn run(&self, name: &str) -> PropertyBundle;
}

/// The full provider set injected into every session.
#[derive(Clone)]
pub struct Capabilities {
    /// Native extension loading.
    pub extensions: Arc<dyn ExtensionLoader>,
    /// Process and agent property bundles.
    pub properties: Arc<dyn PropertySource>,
    /// Management endpoint starting.
    pub management: Arc<dyn AgentStarter>,
    /// Diagnostic command execution.
    pub diagnostics: Arc<dyn DiagnosticExecutor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_kind_and_message() {
        let err = ProviderError::not_supported("management endpoint not configured");
        assert_eq!(
            err.to_string(),
            "not supported: management endpoint not configured"
        );
    }

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(ProviderErrorKind::OperationFailed.as_str(), "operation failed");
        assert_eq!(ProviderErrorKind::LoadFailed.as_str(), "load failure");
    }
}
