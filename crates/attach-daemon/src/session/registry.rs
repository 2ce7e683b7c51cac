//! Session registry.
//!
//! Tracks every live session. The session set is the only mutable state
//! shared across session tasks and is mutated in exactly two places:
//! insertion when a session is spawned, removal when the session
//! delivers its one termination notice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use attach_core::AttachKey;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Session, SessionError, SessionHandle};
use crate::provider::Capabilities;

/// Errors from attach requests.
#[derive(Debug, Error)]
pub enum AttachError {
    /// A session bound to this controller port is still live.
    #[error("a session for controller port {port} is already live")]
    AlreadyAttached {
        /// Controller port of the existing session.
        port: u16,
    },

    /// The configured session limit has been reached.
    #[error("session limit reached: {limit} sessions are live")]
    LimitReached {
        /// Configured maximum number of live sessions.
        limit: usize,
    },
}

struct Registered {
    handle: SessionHandle,
    task: JoinHandle<()>,
}

/// Registry of live attach sessions.
///
/// Sessions are independent of one another; the registry only hands them
/// their shared capability providers and collects their termination
/// notices.
pub struct SessionRegistry {
    capabilities: Capabilities,
    max_sessions: usize,
    sessions: Mutex<HashMap<u16, Registered>>,
    terminated_total: AtomicUsize,
}

impl SessionRegistry {
    /// Create a registry around the process's capability providers,
    /// admitting at most `max_sessions` live sessions.
    pub fn new(capabilities: Capabilities, max_sessions: usize) -> Arc<Self> {
        Arc::new(Self {
            capabilities,
            max_sessions,
            sessions: Mutex::new(HashMap::new()),
            terminated_total: AtomicUsize::new(0),
        })
    }

    /// Construct and spawn a session for one attach request.
    ///
    /// The session connects back to the controller listening on `port`
    /// and authenticates with `key`. The returned handle observes the
    /// session and can tear it down; dropping the handle does not affect
    /// the session.
    ///
    /// # Errors
    ///
    /// Returns [`AttachError::AlreadyAttached`] while a session for the
    /// same port is live, and [`AttachError::LimitReached`] when the
    /// registry is full.
    pub fn attach(self: &Arc<Self>, port: u16, key: AttachKey) -> Result<SessionHandle, AttachError> {
        let mut sessions = self.lock();
        if sessions.contains_key(&port) {
            return Err(AttachError::AlreadyAttached { port });
        }
        if sessions.len() >= self.max_sessions {
            return Err(AttachError::LimitReached {
                limit: self.max_sessions,
            });
        }

        let session = Session::new(port, key, self.capabilities.clone(), Arc::clone(self));
        let handle = session.handle();
        info!(port, "attach request accepted");
        // Insertion happens under the same lock acquisition as the occupancy
        // check, so a session that terminates instantly cannot race its own
        // removal ahead of the insert.
        let task = tokio::spawn(session.run());
        sessions.insert(
            port,
            Registered {
                handle: handle.clone(),
                task,
            },
        );
        Ok(handle)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn live_sessions(&self) -> usize {
        self.lock().len()
    }

    /// Total number of termination notices received.
    #[must_use]
    pub fn terminated_total(&self) -> usize {
        self.terminated_total.load(Ordering::Relaxed)
    }

    /// Tear down every live session and wait for the tasks to finish.
    pub async fn shutdown_all(&self) {
        let drained: Vec<Registered> = {
            let mut sessions = self.lock();
            sessions.drain().map(|(_, registered)| registered).collect()
        };
        for registered in &drained {
            registered.handle.teardown();
        }
        for registered in drained {
            if let Err(err) = registered.task.await {
                warn!(error = %err, "session task aborted");
            }
        }
    }

    /// Termination notice, delivered exactly once per session at the end
    /// of its run.
    pub(crate) fn finish(&self, port: u16, last_error: Option<SessionError>) {
        let removed = self.lock().remove(&port);
        self.terminated_total.fetch_add(1, Ordering::Relaxed);
        match &last_error {
            Some(err) => warn!(port, error = %err, "session terminated"),
            None => info!(port, "session terminated"),
        }
        if removed.is_none() {
            // Already drained by shutdown_all.
            debug!(port, "terminated session was no longer registered");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u16, Registered>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
