//! Management-endpoint starters.
//!
//! The process decides once at startup whether management support is
//! available, and injects the matching [`AgentStarter`] flavor into
//! every session. Unavailability is an ordinary typed error, not an
//! exception path.

use std::sync::Arc;

use attach_core::PropertyBundle;
use tracing::info;

use super::{AgentStarter, ProviderError};
use crate::config::ManagementConfig;
use crate::store::PropertyStore;

/// Store key under which the local connector address is cached.
pub const LOCAL_CONNECTOR_ADDRESS: &str = "management.local.address";

/// Bundle key that a remote-management configuration must carry.
const REMOTE_PORT_KEY: &str = "management.port";

/// Starter for processes whose management endpoint is configured in.
///
/// The local endpoint is assumed to be running inside the host process;
/// this starter hands out its address. Remote starts are validated and
/// acknowledged.
pub struct StaticAgentStarter {
    local_address: String,
}

impl StaticAgentStarter {
    /// Create a starter advertising the given local endpoint address.
    pub fn new(local_address: impl Into<String>) -> Self {
        Self {
            local_address: local_address.into(),
        }
    }
}

impl AgentStarter for StaticAgentStarter {
    fn start_local(&self) -> Result<String, ProviderError> {
        Ok(self.local_address.clone())
    }

    fn start_remote(&self, config: &PropertyBundle) -> Result<(), ProviderError> {
        let port = config
            .get(REMOTE_PORT_KEY)
            .filter(|port| !port.is_empty())
            .ok_or_else(|| {
                ProviderError::invalid_argument(format!("{REMOTE_PORT_KEY} is required"))
            })?;
        info!(port, "remote management endpoint start requested");
        Ok(())
    }
}

/// Starter for processes without management support.
pub struct UnavailableAgentStarter {
    reason: String,
}

impl UnavailableAgentStarter {
    /// Create an unavailable starter with the reason reported to
    /// controllers.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl AgentStarter for UnavailableAgentStarter {
    fn start_local(&self) -> Result<String, ProviderError> {
        Err(ProviderError::not_supported(&self.reason))
    }

    fn start_remote(&self, _config: &PropertyBundle) -> Result<(), ProviderError> {
        Err(ProviderError::not_supported(&self.reason))
    }
}

/// Caches the local connector address in the shared store.
///
/// The first successful `start_local` writes the address under
/// [`LOCAL_CONNECTOR_ADDRESS`]; later calls are served from the store
/// without touching the inner starter. The read-miss-compute-write
/// sequence runs under the store lock, so concurrent sessions observe
/// exactly one start.
pub struct CachingAgentStarter {
    inner: Arc<dyn AgentStarter>,
    store: Arc<PropertyStore>,
}

impl CachingAgentStarter {
    /// Wrap a starter with store-backed address caching.
    pub fn new(inner: Arc<dyn AgentStarter>, store: Arc<PropertyStore>) -> Self {
        Self { inner, store }
    }
}

impl AgentStarter for CachingAgentStarter {
    fn start_local(&self) -> Result<String, ProviderError> {
        self.store
            .get_or_try_insert_with(LOCAL_CONNECTOR_ADDRESS, || self.inner.start_local())
    }

    fn start_remote(&self, config: &PropertyBundle) -> Result<(), ProviderError> {
        self.inner.start_remote(config)
    }
}

/// Pick the starter flavor for this process, once, from configuration.
pub fn select_agent_starter(
    config: &ManagementConfig,
    store: Arc<PropertyStore>,
) -> Arc<dyn AgentStarter> {
    match &config.local_address {
        Some(address) => Arc::new(CachingAgentStarter::new(
            Arc::new(StaticAgentStarter::new(address)),
            store,
        )),
        None => Arc::new(UnavailableAgentStarter::new(
            "management endpoint not configured",
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::provider::ProviderErrorKind;

    /// Starter that counts local starts.
    struct CountingStarter {
        calls: Mutex<usize>,
        result: Result<String, ProviderError>,
    }

    impl CountingStarter {
        fn new(result: Result<String, ProviderError>) -> Self {
            Self {
                calls: Mutex::new(0),
                result,
            }
        }
    }

    impl AgentStarter for CountingStarter {
        fn start_local(&self) -> Result<String, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            self.result.clone()
        }

        fn start_remote(&self, _config: &PropertyBundle) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[test]
    fn test_caching_starter_starts_once() {
        let counting = Arc::new(CountingStarter::new(Ok("svc:attach://127.0.0.1:9010".into())));
        let inner = Arc::clone(&counting) as Arc<dyn AgentStarter>;
        let store = Arc::new(PropertyStore::new());
        let caching = CachingAgentStarter::new(inner, Arc::clone(&store));

        assert_eq!(caching.start_local().unwrap(), "svc:attach://127.0.0.1:9010");
        assert_eq!(caching.start_local().unwrap(), "svc:attach://127.0.0.1:9010");
        assert_eq!(*counting.calls.lock().unwrap(), 1);
        assert_eq!(
            store.get(LOCAL_CONNECTOR_ADDRESS).as_deref(),
            Some("svc:attach://127.0.0.1:9010")
        );
    }

    #[test]
    fn test_caching_starter_does_not_cache_failures() {
        let counting = Arc::new(CountingStarter::new(Err(ProviderError::operation_failed(
            "endpoint refused to start",
        ))));
        let inner = Arc::clone(&counting) as Arc<dyn AgentStarter>;
        let caching = CachingAgentStarter::new(inner, Arc::new(PropertyStore::new()));

        assert!(caching.start_local().is_err());
        assert!(caching.start_local().is_err());
        assert_eq!(*counting.calls.lock().unwrap(), 2);
    }

    #[test]
    fn test_static_starter_validates_remote_config() {
        let starter = StaticAgentStarter::new("svc:attach://127.0.0.1:9010");

        let mut config = PropertyBundle::new();
        let err = starter.start_remote(&config).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::InvalidArgument);

        config.insert("management.port", "9010");
        starter.start_remote(&config).unwrap();
    }

    #[test]
    fn test_selection_without_address_is_unavailable() {
        let starter = select_agent_starter(&ManagementConfig::default(), Arc::new(PropertyStore::new()));
        let err = starter.start_local().unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::NotSupported);
    }
}
