//! Extension-loader implementations.

use tracing::debug;

use super::{ExtensionLoader, ProviderError};

/// Extension loader for builds without native extension support.
///
/// Always reports the configured reason. Selected at process start when
/// no real loader is linked in.
pub struct DisabledExtensionLoader {
    reason: String,
}

impl DisabledExtensionLoader {
    /// Create a disabled loader with the reason reported to controllers.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl ExtensionLoader for DisabledExtensionLoader {
    fn load(&self, library: &str, options: &str, decorate: bool) -> Result<(), ProviderError> {
        debug!(library, options, decorate, "extension load refused");
        Err(ProviderError::not_supported(&self.reason))
    }
}
