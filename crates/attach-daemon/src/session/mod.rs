//! Per-connection session state machine.
//!
//! A [`Session`] handles one attach request: it connects back to the
//! controller over loopback, sends the handshake frame, then runs a
//! strictly sequential receive-dispatch-respond loop until the
//! controller detaches, disconnects, a fatal transport error occurs, or
//! the session is torn down from outside.
//!
//! # State Machine
//!
//! ```text
//! NEW ──► HANDSHAKING ──► ACTIVE ──► CLOSING ──► TERMINATED
//!              │                        ▲
//!              └────(connect failed)────┘
//! ```
//!
//! - `HANDSHAKING → ACTIVE`: connect succeeded and the
//!   `ATTACH_CONNECTED` frame went out.
//! - `ACTIVE → ACTIVE`: one command, one response.
//! - `ACTIVE → CLOSING`: DETACH, clean disconnect, fatal transport
//!   error, or teardown.
//! - `CLOSING → TERMINATED`: best-effort `ATTACH_DETACHED`, both stream
//!   halves released, registry notified exactly once.
//!
//! # Concurrency
//!
//! The loop owns the socket's two halves exclusively; at most one
//! command is in flight. [`SessionHandle::teardown`] is the only
//! external mutator: it is idempotent, safe to call from any task at any
//! time, and wakes the loop at its next (or current) await point, which
//! the loop treats as a fatal condition and routes to CLOSING.
//!
//! # Error Policy
//!
//! Nothing below the session boundary terminates the process. Protocol
//! and provider failures become `ATTACH_ERROR` responses and the loop
//! continues; transport failures terminate the session; a panic escaping
//! a capability provider is contained at the dispatch boundary and
//! answered with an `unexpected error` response.

pub mod registry;

use std::io;
use std::net::Ipv4Addr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use attach_core::command::START_LOCAL_MANAGEMENT_AGENT;
use attach_core::framing::{receive_frame, send_frame};
use attach_core::properties::failure_bundle;
use attach_core::{AttachKey, Command, PropertyBundle, ProtocolError, response};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::provider::Capabilities;
use crate::session::registry::SessionRegistry;

/// Derived property added to every `GET_SYSTEM_PROPERTIES` reply: the
/// process argument vector joined with single spaces.
pub const PROCESS_ARGS_PROPERTY: &str = "process.args";

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, loop not started.
    New,
    /// Connecting to the controller and sending the handshake frame.
    Handshaking,
    /// Command loop running.
    Active,
    /// Releasing streams and sending the terminal frame.
    Closing,
    /// Loop exited; registry has been notified.
    Terminated,
}

/// Fatal session failures, reported to the registry at termination.
///
/// Clean exits (DETACH, controller disconnect, teardown) carry no error.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The loopback connect to the controller failed.
    #[error("connect to controller port {port} failed: {source}")]
    Connect {
        /// Controller port.
        port: u16,
        /// Underlying connect failure.
        #[source]
        source: io::Error,
    },

    /// Reading or writing a frame failed fatally.
    #[error("transport failure: {0}")]
    Transport(#[from] ProtocolError),
}

/// Loop control after dispatching one command.
enum Flow {
    /// Keep reading commands.
    Continue,
    /// Controller requested detach.
    Detach,
    /// Teardown fired while a command was mid-dispatch.
    TornDown,
}

/// State shared between the session task and its handles.
#[derive(Debug)]
struct Shared {
    state: watch::Sender<SessionState>,
    teardown: watch::Sender<bool>,
    last_error: Mutex<Option<String>>,
}

/// External view of a live (or terminated) session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Request termination.
    ///
    /// Idempotent and safe to call concurrently with the session loop
    /// and with other `teardown` calls; the loop observes the request at
    /// its current or next await point and shuts down.
    pub fn teardown(&self) {
        self.shared.teardown.send_replace(true);
    }

    /// Wait until the session reaches [`SessionState::Terminated`].
    pub async fn wait_terminated(&self) {
        let mut state = self.shared.state.subscribe();
        // The sender lives in `shared`, which we hold, so this cannot fail.
        let _ = state.wait_for(|s| *s == SessionState::Terminated).await;
    }

    /// Message of the error that terminated the session, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// One attach session: connection, handshake, and command loop.
pub struct Session {
    port: u16,
    key: AttachKey,
    capabilities: Capabilities,
    registry: Arc<SessionRegistry>,
    shared: Arc<Shared>,
}

impl Session {
    /// Sessions are constructed by [`SessionRegistry::attach`].
    pub(crate) fn new(
        port: u16,
        key: AttachKey,
        capabilities: Capabilities,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::New);
        let (teardown, _) = watch::channel(false);
        Self {
            port,
            key,
            capabilities,
            registry,
            shared: Arc::new(Shared {
                state,
                teardown,
                last_error: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run the session to completion.
    ///
    /// Owns every exit path: whatever happens inside the loop, both
    /// stream halves are released, the terminal frame is attempted when
    /// a connection exists, and the registry is notified exactly once.
    pub(crate) async fn run(self) {
        let mut teardown = self.shared.teardown.subscribe();
        self.transition(SessionState::Handshaking);

        let mut last_error: Option<SessionError> = None;
        let torn_down_before_connect = *teardown.borrow();
        let stream = if torn_down_before_connect {
            None
        } else {
            tokio::select! {
                _ = teardown.changed() => {
                    debug!(port = self.port, "teardown before connect completed");
                    None
                }
                result = TcpStream::connect((Ipv4Addr::LOCALHOST, self.port)) => match result {
                    Ok(stream) => Some(stream),
                    Err(source) => {
                        warn!(port = self.port, error = %source, "connect to controller failed");
                        last_error = Some(SessionError::Connect {
                            port: self.port,
                            source,
                        });
                        None
                    }
                },
            }
        };

        if let Some(stream) = stream {
            let (mut reader, mut writer) = stream.into_split();
            match send_frame(&mut writer, response::connected(&self.key).as_bytes()).await {
                Ok(()) => {
                    info!(port = self.port, "session connected");
                    self.transition(SessionState::Active);
                    last_error = self
                        .command_loop(&mut reader, &mut writer, &mut teardown)
                        .await;
                }
                Err(err) => {
                    warn!(port = self.port, error = %err, "handshake send failed");
                    last_error = Some(SessionError::Transport(err));
                }
            }

            self.transition(SessionState::Closing);
            // Best-effort terminal frame; its own failure is only logged so a
            // clean disconnect still terminates without an error.
            if let Err(err) = send_frame(&mut writer, response::DETACHED.as_bytes()).await {
                debug!(port = self.port, error = %err, "terminal frame not delivered");
            }
            if let Err(err) = writer.shutdown().await {
                debug!(port = self.port, error = %err, "write half close failed");
            }
            drop(reader);
        } else {
            self.transition(SessionState::Closing);
        }

        if let Some(err) = &last_error {
            *self
                .shared
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
        }
        // Notify the registry before the terminal state becomes observable,
        // so anyone woken by it sees the registry already up to date.
        self.registry.finish(self.port, last_error);
        self.transition(SessionState::Terminated);
    }

    /// The ACTIVE loop: one frame in, one frame out, until something
    /// terminal happens. Returns the fatal error, if that is what ended
    /// the loop.
    async fn command_loop(
        &self,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
        teardown: &mut watch::Receiver<bool>,
    ) -> Option<SessionError> {
        loop {
            if *teardown.borrow() {
                debug!(port = self.port, "teardown requested");
                return None;
            }
            let received = tokio::select! {
                _ = teardown.changed() => {
                    debug!(port = self.port, "teardown requested");
                    return None;
                }
                received = receive_frame(reader) => received,
            };

            match received {
                Ok(Some(frame)) => {
                    match self.dispatch(&frame, reader, writer, teardown).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Detach) => {
                            debug!(port = self.port, "controller detached");
                            return None;
                        }
                        Ok(Flow::TornDown) => {
                            debug!(port = self.port, "teardown requested");
                            return None;
                        }
                        Err(err) => return Some(err),
                    }
                }
                Ok(None) => {
                    debug!(port = self.port, "controller disconnected");
                    return None;
                }
                Err(err) if err.is_fatal() => {
                    warn!(port = self.port, error = %err, "receive failed");
                    return Some(SessionError::Transport(err));
                }
                Err(err) => {
                    // Recoverable receive failure (the oversized frame was
                    // already drained); report it and keep going.
                    warn!(port = self.port, error = %err, "rejected inbound frame");
                    if let Err(err) = self.send(writer, &response::error(&err)).await {
                        return Some(err);
                    }
                }
            }
        }
    }

    /// Dispatch one command frame and send its single response.
    async fn dispatch(
        &self,
        frame: &[u8],
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
        teardown: &mut watch::Receiver<bool>,
    ) -> Result<Flow, SessionError> {
        let command = match Command::parse(frame) {
            Ok(command) => command,
            Err(err) => {
                // Malformed LOADAGENT syntax: recoverable, and the provider
                // is never called.
                self.send(writer, &response::error(&err)).await?;
                return Ok(Flow::Continue);
            }
        };
        debug!(port = self.port, verb = command.verb(), "dispatching command");

        match command {
            Command::Detach => Ok(Flow::Detach),

            Command::LoadAgent {
                library,
                options,
                decorate,
            } => {
                let outcome = self.guard("extension loader", || {
                    self.capabilities.extensions.load(&library, &options, decorate)
                });
                match outcome {
                    Ok(Ok(())) => self.send(writer, response::ACK).await?,
                    Ok(Err(err)) => self.send(writer, &response::error(&err)).await?,
                    Err(message) => {
                        self.send(writer, &response::unexpected_error(message)).await?;
                    }
                }
                Ok(Flow::Continue)
            }

            Command::GetSystemProperties => {
                let outcome = self.guard("property source", || {
                    let mut bundle = self.capabilities.properties.process_properties();
                    let args = self.capabilities.properties.process_arguments().join(" ");
                    bundle.insert(PROCESS_ARGS_PROPERTY, args);
                    bundle
                });
                self.reply_bundle_or_error(writer, outcome).await?;
                Ok(Flow::Continue)
            }

            Command::GetAgentProperties => {
                let outcome = self.guard("property source", || {
                    self.capabilities.properties.agent_properties()
                });
                self.reply_bundle_or_error(writer, outcome).await?;
                Ok(Flow::Continue)
            }

            Command::StartLocalManagementAgent => {
                let outcome = self.guard("management agent starter", || {
                    self.capabilities.management.start_local()
                });
                match outcome {
                    Ok(Ok(address)) => self.send(writer, &response::result(&address)).await?,
                    Ok(Err(err)) => {
                        let detail = format!(
                            "{} in {START_LOCAL_MANAGEMENT_AGENT}: {}",
                            err.kind, err.message
                        );
                        self.send(writer, &response::error(detail)).await?;
                    }
                    Err(message) => {
                        self.send(writer, &response::unexpected_error(message)).await?;
                    }
                }
                Ok(Flow::Continue)
            }

            Command::StartManagementAgent { inline_bundle } => {
                let bytes = match inline_bundle {
                    Some(bytes) => bytes,
                    // The configuration bundle arrives in a follow-up frame.
                    None => {
                        let received = tokio::select! {
                            _ = teardown.changed() => return Ok(Flow::TornDown),
                            received = receive_frame(reader) => received,
                        };
                        match received {
                            Ok(Some(bytes)) => bytes,
                            Ok(None) => {
                                return Err(SessionError::Transport(ProtocolError::truncated(
                                    "management agent configuration frame",
                                )));
                            }
                            Err(err) if err.is_fatal() => {
                                return Err(SessionError::Transport(err));
                            }
                            Err(err) => {
                                self.send(writer, &response::error(&err)).await?;
                                return Ok(Flow::Continue);
                            }
                        }
                    }
                };

                match PropertyBundle::from_bytes(&bytes) {
                    Err(err) => self.send(writer, &response::error(&err)).await?,
                    Ok(config) => {
                        let outcome = self.guard("management agent starter", || {
                            self.capabilities.management.start_remote(&config)
                        });
                        match outcome {
                            Ok(Ok(())) => self.send(writer, response::ACK).await?,
                            Ok(Err(err)) => self.send(writer, &response::error(&err)).await?,
                            Err(message) => {
                                self.send(writer, &response::unexpected_error(message)).await?;
                            }
                        }
                    }
                }
                Ok(Flow::Continue)
            }

            Command::RunDiagnostic { name } => {
                // Diagnostic failures travel as a failure bundle so the reply
                // shape is uniform; that includes a panicking executor.
                let bundle = self
                    .guard("diagnostic executor", || self.capabilities.diagnostics.run(&name))
                    .unwrap_or_else(|message| failure_bundle("unexpected error", &message));
                self.send_bundle(writer, &bundle).await?;
                Ok(Flow::Continue)
            }

            Command::Unknown { raw } => {
                self.send(writer, &response::invalid_command(&raw)).await?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Run one capability-provider call, containing panics.
    fn guard<T>(&self, provider: &str, call: impl FnOnce() -> T) -> Result<T, String> {
        panic::catch_unwind(AssertUnwindSafe(call)).map_err(|payload| {
            let message = panic_message(payload.as_ref());
            warn!(
                port = self.port,
                provider,
                message = %message,
                "capability provider panicked"
            );
            format!("{provider} panicked: {message}")
        })
    }

    async fn reply_bundle_or_error(
        &self,
        writer: &mut OwnedWriteHalf,
        outcome: Result<PropertyBundle, String>,
    ) -> Result<(), SessionError> {
        match outcome {
            Ok(bundle) => self.send_bundle(writer, &bundle).await,
            Err(message) => self.send(writer, &response::unexpected_error(message)).await,
        }
    }

    /// Send a text response frame. Any failure here is fatal.
    async fn send(&self, writer: &mut OwnedWriteHalf, text: &str) -> Result<(), SessionError> {
        send_frame(writer, text.as_bytes())
            .await
            .map_err(SessionError::Transport)
    }

    /// Send a property-bundle response frame. Any failure here is fatal.
    async fn send_bundle(
        &self,
        writer: &mut OwnedWriteHalf,
        bundle: &PropertyBundle,
    ) -> Result<(), SessionError> {
        send_frame(writer, &bundle.to_bytes())
            .await
            .map_err(SessionError::Transport)
    }

    fn transition(&self, next: SessionState) {
        let previous = self.shared.state.send_replace(next);
        debug!(port = self.port, ?previous, state = ?next, "session state");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(&"static str"), "static str");
        assert_eq!(panic_message(&"owned".to_string()), "owned");
        assert_eq!(panic_message(&42_u32), "opaque panic payload");
    }
}
