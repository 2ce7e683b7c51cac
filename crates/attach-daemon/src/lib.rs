//! attach-daemon - Target-process side of loopback attach sessions.
//!
//! This library lets a controller process issue administrative commands
//! to the running process over an authenticated loopback connection:
//! load a native extension, query process and agent properties, start a
//! management endpoint, run a diagnostic command, or detach.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    SessionRegistry                       │
//! │   attach(port, key) ──► Session task (one per port)      │
//! │                              │                           │
//! │          connect ── handshake ── command loop            │
//! │                              │                           │
//! │        ┌─────────────────────┼──────────────────┐        │
//! │        ▼                     ▼                  ▼        │
//! │  ExtensionLoader      AgentStarter      DiagnosticExec…  │
//! │            (capability providers, injected)              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Each session owns its socket exclusively and runs a strictly
//! sequential receive-dispatch-respond loop; the registry tracks live
//! sessions and is notified exactly once when each one terminates.
//!
//! # Modules
//!
//! - [`config`]: TOML daemon configuration
//! - [`provider`]: capability-provider interfaces and built-in
//!   implementations
//! - [`session`]: per-connection state machine and the session registry
//! - [`store`]: process-wide shared property store

pub mod config;
pub mod provider;
pub mod session;
pub mod store;
