//! attach-daemon - loopback attach session daemon.
//!
//! Connects back to a controller that is listening on a loopback port,
//! authenticates with a pre-shared key, and serves attach commands until
//! the controller detaches or the process is asked to shut down.
//!
//! Discovery is out of scope: the controller's port and the session key
//! are handed to this binary explicitly. The key is read from a file so
//! it never appears in the process argument list.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use attach_core::AttachKey;
use attach_daemon::config::DaemonConfig;
use attach_daemon::provider::{
    Capabilities, DisabledExtensionLoader, RuntimePropertySource, select_agent_starter,
    select_diagnostics,
};
use attach_daemon::session::registry::SessionRegistry;
use attach_daemon::store::PropertyStore;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Loopback attach session daemon.
#[derive(Parser, Debug)]
#[command(name = "attach-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Controller loopback port to attach to.
    #[arg(long)]
    port: u16,

    /// File holding the pre-shared session key.
    #[arg(long)]
    key_file: PathBuf,

    /// Path to the daemon configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter override (for example `attach_daemon=debug`).
    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => DaemonConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => DaemonConfig::default(),
    };

    let filter = args.log_filter.as_ref().unwrap_or(&config.log_filter);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).context("invalid log filter")?)
        .init();

    let key = std::fs::read_to_string(&args.key_file)
        .with_context(|| format!("reading key file {}", args.key_file.display()))?;
    let key = AttachKey::new(key.trim_end());

    let store = Arc::new(PropertyStore::seeded(config.seed_properties()));
    let capabilities = Capabilities {
        extensions: Arc::new(DisabledExtensionLoader::new(
            "native extension loading is not enabled in this build",
        )),
        properties: Arc::new(RuntimePropertySource::new(Arc::clone(&store))),
        management: select_agent_starter(&config.management, Arc::clone(&store)),
        diagnostics: select_diagnostics(&config.diagnostics, Arc::clone(&store)),
    };

    let registry = SessionRegistry::new(capabilities, config.max_sessions);
    let session = registry
        .attach(args.port, key)
        .context("starting attach session")?;

    tokio::select! {
        () = session.wait_terminated() => {
            if let Some(error) = session.last_error() {
                anyhow::bail!("session failed: {error}");
            }
        }
        () = shutdown_signal() => {
            info!("shutdown requested");
            registry.shutdown_all().await;
        }
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                let _ = stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
