//! Stream Session Controller
//!
//! One session per streaming request. The session owns the only sender of a
//! bounded fragment channel; the client side holds the receiver through a
//! [`SessionHandle`].
//!
//! ```text
//!   Open ──► Completed   last fragment delivered (or empty reply)
//!     │
//!     ├────► Errored     upstream failure, client disconnect, write failure
//!     │
//!     └────► TimedOut    wall-clock budget exhausted
//! ```
//!
//! Every terminal state is entered exactly once and entering it drops the
//! sender, which closes the channel. Dropping the receiver is how a client
//! disconnects.
//!
//! The upstream call runs on its own task. A disconnect or timeout stops
//! delivery but does not cancel that call; its result is discarded when it
//! arrives.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;
use uuid::Uuid;

use super::fragment::{Fragment, FragmentEmitter, Pacing};
use crate::backend::ChatBackend;
use crate::error::{apology, GatewayError};
use crate::messages::Conversation;

/// Per-session settings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Hard wall-clock budget measured from session creation
    pub timeout: Duration,
    /// Fragment channel capacity
    pub channel_capacity: usize,
    /// Fragment pacing
    pub pacing: Pacing,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(180),
            channel_capacity: 64,
            pacing: Pacing::default(),
        }
    }
}

/// Session identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new random session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Accepting fragment deliveries
    Open,
    /// All fragments delivered
    Completed,
    /// Upstream failure or client disconnect
    Errored,
    /// Wall-clock budget exhausted
    TimedOut,
}

impl SessionState {
    /// Whether no further transitions can happen
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

/// Final outcome of a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionReport {
    /// Session identifier
    pub id: SessionId,
    /// Terminal state
    pub state: SessionState,
    /// Fragments accepted by the channel (excluding the error fragment)
    pub fragments_delivered: usize,
    /// Time from creation to the terminal transition
    pub elapsed: Duration,
    /// Failure description for non-completed sessions
    pub error: Option<String>,
}

pub(crate) type FinishHook = Box<dyn FnOnce(&SessionReport) + Send + 'static>;

/// Observes a session without holding its fragment receiver
#[derive(Debug)]
pub struct SessionMonitor {
    id: SessionId,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<SessionReport>,
}

impl SessionMonitor {
    /// Session identifier
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait for the session to reach a terminal state
    pub async fn wait(self) -> SessionReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => SessionReport {
                id: self.id,
                state: SessionState::Errored,
                fragments_delivered: 0,
                elapsed: Duration::ZERO,
                error: Some(format!("session task failed: {e}")),
            },
        }
    }
}

/// Client side of a streaming session
///
/// Dropping the handle (or the receiver obtained from [`Self::split`]) is
/// treated as a client disconnect.
#[derive(Debug)]
pub struct SessionHandle {
    fragments: mpsc::Receiver<Fragment>,
    monitor: SessionMonitor,
}

impl SessionHandle {
    /// Session identifier
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.monitor.id
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.monitor.state()
    }

    /// Receive the next fragment; `None` once the session is terminal
    pub async fn recv(&mut self) -> Option<Fragment> {
        self.fragments.recv().await
    }

    /// Separate the fragment receiver from the monitor
    #[must_use]
    pub fn split(self) -> (mpsc::Receiver<Fragment>, SessionMonitor) {
        (self.fragments, self.monitor)
    }

    /// Fragment stream for transport adapters (e.g. server-sent events)
    #[must_use]
    pub fn into_stream(self) -> (ReceiverStream<Fragment>, SessionMonitor) {
        (ReceiverStream::new(self.fragments), self.monitor)
    }

    /// Drain every fragment, then wait for the terminal state
    pub async fn collect(mut self) -> (String, SessionReport) {
        let mut text = String::new();
        while let Some(fragment) = self.fragments.recv().await {
            text.push_str(&fragment.text);
        }
        (text, self.monitor.wait().await)
    }

    /// Wait for the terminal state, dropping the receiver first
    ///
    /// Undelivered fragments are discarded; a session that is still
    /// delivering ends as [`SessionState::Errored`].
    pub async fn wait(self) -> SessionReport {
        let (fragments, monitor) = self.split();
        drop(fragments);
        monitor.wait().await
    }
}

/// Producer side: owns the sender and the state machine
struct SessionController {
    id: SessionId,
    tx: Option<mpsc::Sender<Fragment>>,
    state: watch::Sender<SessionState>,
    started: Instant,
    timeout: Duration,
    delivered: usize,
    error: Option<String>,
}

impl SessionController {
    /// Enter a terminal state and close the channel
    ///
    /// Returns `false` if the session was already terminal.
    fn finish(&mut self, state: SessionState) -> bool {
        debug_assert!(state.is_terminal());
        let Some(tx) = self.tx.take() else {
            return false;
        };
        drop(tx);
        self.state.send_replace(state);
        true
    }

    fn report(&self) -> SessionReport {
        SessionReport {
            id: self.id,
            state: *self.state.borrow(),
            fragments_delivered: self.delivered,
            elapsed: self.started.elapsed(),
            error: self.error.clone(),
        }
    }

    async fn run(
        mut self,
        backend: Arc<dyn ChatBackend>,
        conversation: Conversation,
        pacing: Pacing,
        deadline: Option<Instant>,
        on_finish: Option<FinishHook>,
    ) -> SessionReport {
        let drive = self.drive(backend, conversation, pacing);
        let outcome = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, drive).await,
            None => Ok(drive.await),
        };
        let state = match outcome {
            Ok(state) => state,
            Err(_) => {
                tracing::warn!(delivered = self.delivered, "Stream session timed out");
                self.error = Some(GatewayError::Timeout(self.timeout).to_string());
                SessionState::TimedOut
            }
        };

        self.finish(state);
        let report = self.report();

        tracing::info!(
            state = %report.state,
            delivered = report.fragments_delivered,
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            "Stream session finished"
        );

        if let Some(hook) = on_finish {
            hook(&report);
        }
        report
    }

    async fn drive(
        &mut self,
        backend: Arc<dyn ChatBackend>,
        conversation: Conversation,
        pacing: Pacing,
    ) -> SessionState {
        let Some(tx) = self.tx.as_ref() else {
            return SessionState::Errored;
        };

        // Not cancelled on disconnect or timeout; the JoinHandle is simply dropped.
        let mut upstream = tokio::spawn(async move { backend.complete(&conversation).await });

        let joined = tokio::select! {
            joined = &mut upstream => joined,
            () = tx.closed() => {
                tracing::warn!("Client disconnected before the reply arrived, discarding upstream result");
                self.error = Some(GatewayError::Session("client disconnected".into()).to_string());
                return SessionState::Errored;
            }
        };

        let completion = match joined {
            Ok(Ok(completion)) => completion,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Upstream call failed");
                let message = apology(&e);
                send_error_fragment(tx, &message).await;
                self.error = Some(GatewayError::Upstream(e).to_string());
                return SessionState::Errored;
            }
            Err(e) => {
                tracing::error!(error = %e, "Upstream task failed");
                let message = apology(&e);
                send_error_fragment(tx, &message).await;
                self.error = Some(message);
                return SessionState::Errored;
            }
        };

        tracing::debug!(
            model = %completion.model,
            chars = completion.content.chars().count(),
            "Delivering reply"
        );

        let mut fragments = FragmentEmitter::new(&completion.content, pacing).peekable();
        while let Some(fragment) = fragments.next() {
            let delay = fragment.delay;
            if tx.send(fragment).await.is_err() {
                tracing::warn!(delivered = self.delivered, "Client disconnected mid-stream");
                self.error = Some(GatewayError::Session("client disconnected".into()).to_string());
                return SessionState::Errored;
            }
            self.delivered += 1;

            if fragments.peek().is_some() && !delay.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = tx.closed() => {
                        tracing::warn!(delivered = self.delivered, "Client disconnected mid-stream");
                        self.error = Some(GatewayError::Session("client disconnected".into()).to_string());
                        return SessionState::Errored;
                    }
                }
            }
        }

        SessionState::Completed
    }
}

async fn send_error_fragment(tx: &mpsc::Sender<Fragment>, message: &str) {
    if tx.send(Fragment::immediate(message)).await.is_err() {
        tracing::debug!("Client gone before the error fragment could be delivered");
    }
}

/// Start a streaming session for `conversation`
///
/// The upstream call and fragment delivery run on a dedicated task.
#[must_use]
pub fn spawn_session(
    backend: Arc<dyn ChatBackend>,
    conversation: Conversation,
    config: SessionConfig,
) -> SessionHandle {
    spawn_with_hook(SessionId::new(), backend, conversation, config, None)
}

pub(crate) fn spawn_with_hook(
    id: SessionId,
    backend: Arc<dyn ChatBackend>,
    conversation: Conversation,
    config: SessionConfig,
    on_finish: Option<FinishHook>,
) -> SessionHandle {
    let started = Instant::now();
    // A budget too large to represent never expires.
    let deadline = started.checked_add(config.timeout);
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let (state_tx, state_rx) = watch::channel(SessionState::Open);

    let controller = SessionController {
        id,
        tx: Some(tx),
        state: state_tx,
        started,
        timeout: config.timeout,
        delivered: 0,
        error: None,
    };

    tracing::info!(session_id = %id, turns = conversation.len(), "Stream session opened");

    let span = tracing::info_span!("stream_session", session_id = %id);
    let task = tokio::spawn(
        controller
            .run(backend, conversation, config.pacing, deadline, on_finish)
            .instrument(span),
    );

    SessionHandle {
        fragments: rx,
        monitor: SessionMonitor {
            id,
            state: state_rx,
            task,
        },
    }
}
