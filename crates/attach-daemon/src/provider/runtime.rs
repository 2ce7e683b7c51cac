//! Property source backed by the running process and the shared store.

use std::sync::Arc;

use attach_core::PropertyBundle;

use super::PropertySource;
use crate::store::PropertyStore;

/// Default property source.
///
/// Process properties are runtime facts gathered on each query; agent
/// properties are a snapshot of the shared [`PropertyStore`], so entries
/// published by other parts of the process (for example a management
/// endpoint advertising its address) show up without coordination.
pub struct RuntimePropertySource {
    store: Arc<PropertyStore>,
}

impl RuntimePropertySource {
    /// Create a property source over the shared store.
    pub fn new(store: Arc<PropertyStore>) -> Self {
        Self { store }
    }
}

impl PropertySource for RuntimePropertySource {
    fn process_properties(&self) -> PropertyBundle {
        let mut bundle = PropertyBundle::new();
        bundle.insert("process.pid", std::process::id().to_string());
        if let Ok(exe) = std::env::current_exe() {
            bundle.insert("process.executable", exe.display().to_string());
        }
        if let Ok(dir) = std::env::current_dir() {
            bundle.insert("process.working_directory", dir.display().to_string());
        }
        bundle.insert("os.name", std::env::consts::OS);
        bundle.insert("os.arch", std::env::consts::ARCH);
        bundle
    }

    fn agent_properties(&self) -> PropertyBundle {
        self.store.snapshot()
    }

    fn process_arguments(&self) -> Vec<String> {
        std::env::args().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_properties_carry_runtime_facts() {
        let source = RuntimePropertySource::new(Arc::new(PropertyStore::new()));
        let bundle = source.process_properties();

        assert_eq!(
            bundle.get("process.pid"),
            Some(std::process::id().to_string().as_str())
        );
        assert_eq!(bundle.get("os.name"), Some(std::env::consts::OS));
    }

    #[test]
    fn test_agent_properties_track_the_store() {
        let store = Arc::new(PropertyStore::new());
        let source = RuntimePropertySource::new(Arc::clone(&store));
        assert!(source.agent_properties().is_empty());

        store.set("management.local.address", "svc:attach://127.0.0.1:9010");
        assert_eq!(
            source.agent_properties().get("management.local.address"),
            Some("svc:attach://127.0.0.1:9010")
        );
    }

    #[test]
    fn test_process_arguments_not_empty() {
        let source = RuntimePropertySource::new(Arc::new(PropertyStore::new()));
        assert!(!source.process_arguments().is_empty());
    }
}
