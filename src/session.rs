//! Debug session bound to one kernel connection.
//!
//! The session owns the sequence counter and the readiness gate. Every attach
//! recreates the gate and fires a `debugInfo` request; requests queue behind the
//! gate in submission order and are dispatched once that request has answered.
//! Debug events from the connection's iopub stream are republished untouched
//! on [`DebugSession::subscribe`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{DebuggerError, Result};
use crate::protocol::{
    AttachArguments, Capabilities, DebugCommand, DebugInfoArguments, DebugInfoResponseBody,
    DisconnectArguments, EventMessage, ExceptionBreakpointsFilter, InitializeArguments,
    IopubMessage, Reply, RequestMessage, ResponseMessage, DEBUG_EVENT_MSG_TYPE,
};
use crate::transport::{ConnectionInfo, KernelConnection};

const EVENT_CAPACITY: usize = 256;

/// Lifecycle of a [`DebugSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No connection attached.
    Unattached,
    /// Connection attached, waiting for the `debugInfo` readiness check.
    Initializing,
    /// Readiness check answered; the debugger is not started.
    Ready,
    /// Debugger started on the kernel.
    Started,
    /// `disconnect` in flight.
    Terminating,
    Disposed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unattached => write!(f, "unattached"),
            SessionState::Initializing => write!(f, "initializing"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Started => write!(f, "started"),
            SessionState::Terminating => write!(f, "terminating"),
            SessionState::Disposed => write!(f, "disposed"),
        }
    }
}

struct SessionInner {
    state: SessionState,
    connection: Option<Arc<dyn KernelConnection>>,
    ready: Option<watch::Receiver<bool>>,
    /// Bumped on every attach so stale readiness checks and waiters can tell they lost.
    generation: u64,
    tasks: Vec<JoinHandle<()>>,
    capabilities: Option<Capabilities>,
    started: bool,
    exception_paths: Vec<String>,
    pausing_on_exceptions: BTreeSet<String>,
}

impl SessionInner {
    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    fn settle_state(&mut self) {
        if matches!(self.state, SessionState::Disposed | SessionState::Unattached) {
            return;
        }
        self.state = if self.started {
            SessionState::Started
        } else {
            SessionState::Ready
        };
    }
}

pub struct DebugSession {
    id: Uuid,
    inner: Arc<Mutex<SessionInner>>,
    seq: AtomicI64,
    /// FIFO: gate wait, sequence assignment and dispatch happen under this lock.
    dispatch_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<EventMessage>,
}

impl DebugSession {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id: Uuid::new_v4(),
            inner: Arc::new(Mutex::new(SessionInner {
                state: SessionState::Unattached,
                connection: None,
                ready: None,
                generation: 0,
                tasks: Vec::new(),
                capabilities: None,
                started: false,
                exception_paths: Vec::new(),
                pausing_on_exceptions: BTreeSet::new(),
            })),
            seq: AtomicI64::new(1),
            dispatch_lock: tokio::sync::Mutex::new(()),
            events,
        }
    }

    /// Session created with `connection` already attached.
    pub fn with_connection(connection: Arc<dyn KernelConnection>) -> Self {
        let session = Self::new();
        session.attach_connection(Some(connection));
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().started
    }

    pub fn has_connection(&self) -> bool {
        self.inner.lock().connection.is_some()
    }

    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.inner
            .lock()
            .connection
            .as_ref()
            .map(|connection| connection.info().clone())
    }

    pub fn capabilities(&self) -> Option<Capabilities> {
        self.inner.lock().capabilities.clone()
    }

    pub fn exception_breakpoint_filters(&self) -> Vec<ExceptionBreakpointsFilter> {
        self.inner
            .lock()
            .capabilities
            .as_ref()
            .map(|caps| caps.exception_breakpoint_filters.clone())
            .unwrap_or_default()
    }

    pub fn exception_paths(&self) -> Vec<String> {
        self.inner.lock().exception_paths.clone()
    }

    pub fn is_pausing_on_exceptions(&self, prefix: &str) -> bool {
        self.inner.lock().pausing_on_exceptions.contains(prefix)
    }

    pub fn set_pausing_on_exceptions(&self, prefix: &str, pausing: bool) {
        let mut inner = self.inner.lock();
        if pausing {
            inner.pausing_on_exceptions.insert(prefix.to_string());
        } else {
            inner.pausing_on_exceptions.remove(prefix);
        }
    }

    /// Subscribe to debug events republished from the connection.
    pub fn subscribe(&self) -> broadcast::Receiver<EventMessage> {
        self.events.subscribe()
    }

    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Replace the kernel connection.
    ///
    /// Tears down the previous event forwarder and readiness check, recreates the
    /// readiness gate and dispatches a `debugInfo` request whose reply opens it.
    /// Requests still waiting on the previous gate fail with
    /// `ConnectionReplaced`.
    pub fn attach_connection(&self, connection: Option<Arc<dyn KernelConnection>>) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Disposed {
            tracing::warn!("[session] Ignoring connection change on disposed session {}", self.id);
            return;
        }

        inner.abort_tasks();
        inner.generation += 1;
        inner.capabilities = None;

        let Some(connection) = connection else {
            tracing::info!("[session] Detached session {}", self.id);
            inner.connection = None;
            inner.ready = None;
            inner.started = false;
            inner.state = SessionState::Unattached;
            return;
        };

        let (ready_tx, ready_rx) = watch::channel(false);
        let generation = inner.generation;

        // Subscribe before spawning so no event published after attach is lost
        let iopub = connection.subscribe();
        let forwarder = tokio::spawn(forward_events(iopub, self.events.clone()));

        let check_seq = self.next_seq();
        let check = tokio::spawn(run_readiness_check(
            Arc::clone(&connection),
            Arc::clone(&self.inner),
            generation,
            check_seq,
            ready_tx,
        ));

        tracing::info!(
            "[session] Attached {} ({}) to session {}",
            connection.info().name,
            connection.info().kernel_name,
            self.id
        );

        inner.connection = Some(connection);
        inner.ready = Some(ready_rx);
        inner.tasks = vec![forwarder, check];
        inner.state = SessionState::Initializing;
    }

    /// Send a raw request and wait for its reply.
    ///
    /// Fails immediately with `NoActiveConnection` when nothing is attached.
    pub async fn send_request(&self, command: &str, arguments: Value) -> Result<ResponseMessage> {
        let (connection, mut ready, generation) = {
            let inner = self.inner.lock();
            if inner.state == SessionState::Disposed {
                return Err(DebuggerError::Disposed);
            }
            match (&inner.connection, &inner.ready) {
                (Some(connection), Some(ready)) => {
                    (Arc::clone(connection), ready.clone(), inner.generation)
                }
                _ => return Err(DebuggerError::NoActiveConnection),
            }
        };

        let pending = {
            let _turn = self.dispatch_lock.lock().await;

            let opened = ready.wait_for(|open| *open).await.is_ok();
            if !opened {
                return Err(self.abandoned_error(generation));
            }
            if self.generation() != generation {
                return Err(DebuggerError::ConnectionReplaced);
            }

            let seq = self.next_seq();
            tracing::debug!("[session] -> {} (seq {})", command, seq);
            connection
                .dispatch(RequestMessage::new(seq, command, arguments))
                .await?
        };

        let response = pending.wait().await?;
        tracing::debug!(
            "[session] <- {} (request_seq {}, success {})",
            response.command,
            response.request_seq,
            response.success
        );
        Ok(response)
    }

    fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Why the gate of `generation` closed without opening.
    fn abandoned_error(&self, generation: u64) -> DebuggerError {
        let inner = self.inner.lock();
        if inner.state == SessionState::Disposed {
            DebuggerError::Disposed
        } else if inner.generation != generation {
            DebuggerError::ConnectionReplaced
        } else {
            DebuggerError::ConnectionClosed
        }
    }

    /// Typed request: serializes `arguments` and decodes the reply body.
    pub async fn request<C>(&self, arguments: &C) -> Result<Reply<C::Body>>
    where
        C: DebugCommand + Sync,
    {
        let arguments = serde_json::to_value(arguments)?;
        self.send_request(C::COMMAND, arguments)
            .await?
            .into_reply::<C::Body>()
    }

    /// Handshake: `initialize` followed by `attach`.
    pub async fn start(&self) -> Result<()> {
        let adapter = self
            .connection_info()
            .ok_or(DebuggerError::NoActiveConnection)?
            .kernel_name;

        let capabilities = match self
            .request(&InitializeArguments::for_adapter(adapter))
            .await?
        {
            Reply::Success { body, .. } => body,
            Reply::Failure { message, .. } => return Err(DebuggerError::Handshake(message)),
        };
        self.inner.lock().capabilities = Some(capabilities);

        if let Reply::Failure { message, .. } = self.request(&AttachArguments {}).await? {
            return Err(DebuggerError::Handshake(message));
        }

        let mut inner = self.inner.lock();
        inner.started = true;
        inner.settle_state();
        tracing::info!("[session] Debugger started for session {}", self.id);
        Ok(())
    }

    /// Disconnect the debugger. The session counts as stopped afterwards
    /// whatever the kernel answered.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.state == SessionState::Started {
                inner.state = SessionState::Terminating;
            }
        }

        let result = self
            .request(&DisconnectArguments {
                restart: false,
                terminate_debuggee: false,
            })
            .await;

        {
            let mut inner = self.inner.lock();
            inner.started = false;
            inner.settle_state();
        }

        match result? {
            Reply::Success { .. } => tracing::info!("[session] Debugger stopped for session {}", self.id),
            Reply::Failure { message, .. } => {
                tracing::warn!("[session] disconnect was rejected: {}", message)
            }
        }
        Ok(())
    }

    /// Fetch the kernel's debugger state and adopt its `started` flag and
    /// exception paths.
    pub async fn restore_state(&self) -> Result<Reply<DebugInfoResponseBody>> {
        let reply = self.request(&DebugInfoArguments {}).await?;
        if let Reply::Success { body, .. } = &reply {
            let mut inner = self.inner.lock();
            inner.started = body.is_started;
            inner.exception_paths = body.exception_paths.clone();
            inner.settle_state();
        }
        Ok(reply)
    }

    /// Drop the connection and stop every background task. Terminal.
    pub fn dispose(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Disposed {
            return;
        }
        inner.abort_tasks();
        inner.connection = None;
        inner.ready = None;
        inner.started = false;
        inner.state = SessionState::Disposed;
        tracing::debug!("[session] Disposed session {}", self.id);
    }
}

impl Default for DebugSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        self.inner.lock().abort_tasks();
    }
}

async fn forward_events(
    mut iopub: broadcast::Receiver<IopubMessage>,
    events: broadcast::Sender<EventMessage>,
) {
    loop {
        match iopub.recv().await {
            Ok(message) if message.msg_type == DEBUG_EVENT_MSG_TYPE => {
                match serde_json::from_value::<EventMessage>(message.content) {
                    Ok(event) => {
                        let _ = events.send(event);
                    }
                    Err(e) => tracing::warn!("[session] Malformed debug event: {}", e),
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("[session] Event forwarder lagged, {} messages dropped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn run_readiness_check(
    connection: Arc<dyn KernelConnection>,
    inner: Arc<Mutex<SessionInner>>,
    generation: u64,
    seq: i64,
    ready: watch::Sender<bool>,
) {
    let request = RequestMessage::new(seq, DebugInfoArguments::COMMAND, serde_json::json!({}));
    let response = match connection.dispatch(request).await {
        Ok(pending) => pending.wait().await,
        Err(e) => Err(e),
    };

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            // Dropping `ready` fails every waiter of this generation
            tracing::warn!("[session] debugInfo readiness check failed: {}", e);
            return;
        }
    };

    if !response.success {
        tracing::debug!(
            "[session] debugInfo answered with failure: {}",
            response.message.as_deref().unwrap_or("")
        );
    }

    {
        // Only `start` and `restore_state` decide whether the debugger runs
        let mut inner = inner.lock();
        if inner.generation != generation {
            return;
        }
        inner.state = SessionState::Ready;
        inner.settle_state();
    }

    let _ = ready.send(true);
    tracing::debug!("[session] Readiness gate open (generation {})", generation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{wait_until, FakeKernel};
    use crate::transport::channel_connection;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_request_without_connection() {
        let session = DebugSession::new();
        let err = session.send_request("debugInfo", json!({})).await.unwrap_err();
        assert!(matches!(err, DebuggerError::NoActiveConnection));
        assert_eq!(session.state(), SessionState::Unattached);
    }

    #[tokio::test]
    async fn test_requests_wait_for_readiness_and_keep_order() {
        let (connection, kernel) = FakeKernel::spawn("python3");
        let hold = kernel.hold_debug_info();
        let session = Arc::new(DebugSession::with_connection(connection));

        let first = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.send_request("modules", json!({})).await })
        };
        wait_until(|| kernel.commands() == vec!["debugInfo".to_string()]).await;
        let second = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.send_request("configurationDone", json!({})).await })
        };
        tokio::task::yield_now().await;

        // Nothing but the readiness check reaches the kernel while the gate is closed
        assert_eq!(kernel.commands(), vec!["debugInfo".to_string()]);
        assert_eq!(session.state(), SessionState::Initializing);

        hold.notify_one();
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        assert_eq!(
            kernel.commands(),
            vec!["debugInfo", "modules", "configurationDone"]
        );
        let seqs: Vec<i64> = kernel.requests().iter().map(|r| r.seq).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(first.request_seq, seqs[1]);
        assert_eq!(second.request_seq, seqs[2]);
    }

    #[tokio::test]
    async fn test_start_stores_capabilities() {
        let (connection, kernel) = FakeKernel::spawn("python3");
        let session = DebugSession::with_connection(connection);

        session.start().await.unwrap();

        assert!(session.is_started());
        assert_eq!(session.state(), SessionState::Started);
        assert_eq!(session.exception_breakpoint_filters().len(), 1);
        let initialize = kernel.last_request("initialize").unwrap();
        assert_eq!(initialize.arguments["adapterID"], json!("python3"));
        assert!(kernel.commands().ends_with(&["initialize".to_string(), "attach".to_string()]));
    }

    #[tokio::test]
    async fn test_failed_initialize_is_handshake_error() {
        let (connection, kernel) = FakeKernel::spawn("python3");
        kernel.fail("initialize");
        let session = DebugSession::with_connection(connection);

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, DebuggerError::Handshake(ref m) if m == "initialize failed"));
        assert!(!session.is_started());
        assert!(kernel.last_request("attach").is_none());
    }

    #[tokio::test]
    async fn test_stop_clears_started_even_on_failure() {
        let (connection, kernel) = FakeKernel::spawn("python3");
        let session = DebugSession::with_connection(connection);
        session.start().await.unwrap();

        kernel.fail("disconnect");
        session.stop().await.unwrap();

        assert!(!session.is_started());
        assert_eq!(session.state(), SessionState::Ready);
        let disconnect = kernel.last_request("disconnect").unwrap();
        assert_eq!(
            disconnect.arguments,
            json!({ "restart": false, "terminateDebuggee": false })
        );
    }

    #[tokio::test]
    async fn test_restore_state_adopts_started_flag() {
        let (connection, kernel) = FakeKernel::spawn("python3");
        kernel.set_started(true);
        let session = DebugSession::with_connection(connection);

        let body = session.restore_state().await.unwrap().into_result().unwrap();
        assert!(body.is_started);
        assert!(session.is_started());
        assert_eq!(session.exception_paths(), vec!["Python Exceptions".to_string()]);
    }

    #[tokio::test]
    async fn test_readiness_does_not_adopt_started_flag() {
        let (connection, kernel) = FakeKernel::spawn("python3");
        kernel.set_started(true);
        let session = DebugSession::with_connection(connection);

        let reply = session.send_request("modules", json!({})).await.unwrap();
        assert!(reply.success);
        assert!(!session.is_started());
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.exception_paths().is_empty());

        session.restore_state().await.unwrap();
        assert!(session.is_started());
        assert_eq!(session.state(), SessionState::Started);
    }

    #[tokio::test]
    async fn test_unreachable_kernel_fails_gated_requests_as_closed() {
        let (connection, endpoint) = channel_connection(ConnectionInfo::default());
        drop(endpoint);
        let session = DebugSession::with_connection(Arc::new(connection));

        let err = session.send_request("modules", json!({})).await.unwrap_err();
        assert!(matches!(err, DebuggerError::ConnectionClosed));
        assert!(session.has_connection());
    }

    #[tokio::test]
    async fn test_events_are_republished() {
        let (connection, kernel) = FakeKernel::spawn("python3");
        let session = DebugSession::with_connection(connection);
        let mut events = session.subscribe();

        kernel.publish(EventMessage::new("output", json!({ "output": "hi" })));

        let event = events.recv().await.unwrap();
        assert_eq!(event.event, "output");
        assert_eq!(event.body["output"], json!("hi"));
    }

    #[tokio::test]
    async fn test_replacing_connection_abandons_gated_requests() {
        let (connection, kernel) = FakeKernel::spawn("python3");
        let _hold = kernel.hold_debug_info();
        let session = Arc::new(DebugSession::with_connection(connection));

        let waiting = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.send_request("modules", json!({})).await })
        };
        wait_until(|| kernel.commands().len() == 1).await;

        let (replacement, other) = FakeKernel::spawn("python3");
        session.attach_connection(Some(replacement));

        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, DebuggerError::ConnectionReplaced));

        // The new connection works and sequence numbers keep increasing
        let reply = session.send_request("modules", json!({})).await.unwrap();
        assert!(reply.success);
        let first_check = kernel.requests()[0].seq;
        assert!(other.requests().iter().all(|r| r.seq > first_check));
        assert!(kernel.last_request("modules").is_none());
    }

    #[tokio::test]
    async fn test_detach_and_dispose() {
        let (connection, _kernel) = FakeKernel::spawn("python3");
        let session = DebugSession::with_connection(connection);
        session.start().await.unwrap();

        session.attach_connection(None);
        assert_eq!(session.state(), SessionState::Unattached);
        assert!(!session.is_started());

        session.dispose();
        assert_eq!(session.state(), SessionState::Disposed);
        assert!(matches!(
            session.send_request("modules", json!({})).await,
            Err(DebuggerError::Disposed)
        ));
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Initializing.to_string(), "initializing");
        assert_eq!(SessionState::Disposed.to_string(), "disposed");
    }
}
