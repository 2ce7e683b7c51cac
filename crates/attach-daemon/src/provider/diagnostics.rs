//! Built-in diagnostic command execution.
//!
//! A small registry of named diagnostics. Failures never escape as
//! errors: unknown names, missing names, and disabled execution all come
//! back as a failure bundle, keeping the wire reply shape uniform.

use std::sync::Arc;
use std::time::Instant;

use attach_core::PropertyBundle;
use attach_core::properties::failure_bundle;

use super::DiagnosticExecutor;
use crate::config::DiagnosticsConfig;
use crate::store::PropertyStore;

/// The built-in diagnostic commands.
const COMMANDS: &[(&str, &str)] = &[
    ("help", "list the available diagnostic commands"),
    ("uptime", "seconds since diagnostics were initialized"),
    ("properties", "dump the shared property store"),
];

/// Default diagnostic executor.
pub struct BuiltinDiagnostics {
    started: Instant,
    store: Arc<PropertyStore>,
}

impl BuiltinDiagnostics {
    /// Create the built-in executor; `uptime` counts from this call.
    #[must_use]
    pub fn new(store: Arc<PropertyStore>) -> Self {
        Self {
            started: Instant::now(),
            store,
        }
    }

    fn help(&self) -> PropertyBundle {
        COMMANDS
            .iter()
            .map(|(name, description)| ((*name).to_string(), (*description).to_string()))
            .collect()
    }

    fn uptime(&self) -> PropertyBundle {
        let mut bundle = PropertyBundle::new();
        bundle.insert("uptime.seconds", self.started.elapsed().as_secs().to_string());
        bundle
    }
}

impl DiagnosticExecutor for BuiltinDiagnostics {
    fn run(&self, name: &str) -> PropertyBundle {
        match name {
            "help" => self.help(),
            "uptime" => self.uptime(),
            "properties" => self.store.snapshot(),
            "" => failure_bundle("invalid argument", "missing diagnostic name"),
            other => failure_bundle("unknown command", &format!("no such diagnostic: {other}")),
        }
    }
}

/// Executor used when diagnostics are disabled by configuration.
pub struct DisabledDiagnostics;

impl DiagnosticExecutor for DisabledDiagnostics {
    fn run(&self, _name: &str) -> PropertyBundle {
        failure_bundle("not supported", "diagnostic commands are disabled")
    }
}

/// Pick the diagnostic executor for this process from configuration.
pub fn select_diagnostics(
    config: &DiagnosticsConfig,
    store: Arc<PropertyStore>,
) -> Arc<dyn DiagnosticExecutor> {
    if config.enabled {
        Arc::new(BuiltinDiagnostics::new(store))
    } else {
        Arc::new(DisabledDiagnostics)
    }
}
