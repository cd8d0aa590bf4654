//! Debugger service.
//!
//! Orchestrates one [`DebugSession`] and the [`DebuggerModel`]: requests go
//! out through the session, replies and events are folded into the model.
//! Breakpoints survive kernel restarts by content id, see [`breakpoints`].
//!
//! Remote failures (a failed reply, a closed connection) are logged and
//! absorbed: the operation leaves the model untouched. A missing session, a
//! missing connection, a failed handshake and identity misconfiguration are
//! returned to the caller.

mod breakpoints;
mod inspect;
mod persist;


use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::{DebuggerError, Result};
use crate::identity::SharedIdentityRegistry;
use crate::model::{DebuggerModel, ModelChange, DEFAULT_THREAD_ID};
use crate::protocol::{
    ContinueArguments, DebugCommand, DebugEventKind, EventMessage, ExceptionBreakMode,
    ExceptionOptions, ExceptionPathSegment, NextArguments, Reply,
    SetExceptionBreakpointsArguments, StepInArguments, StepOutArguments,
};
use crate::session::DebugSession;
use crate::sources::DebuggerSources;

pub use persist::{DebuggerState, DebuggerStateFile};

const EVENT_CAPACITY: usize = 256;

pub struct DebuggerService {
    identity: SharedIdentityRegistry,
    sources: Option<Arc<dyn DebuggerSources>>,
    session: RwLock<Option<Arc<DebugSession>>>,
    model: RwLock<DebuggerModel>,
    /// Code of every dumped cell, by the path the kernel gave it.
    dumped: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<EventMessage>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl DebuggerService {
    pub fn new(
        identity: SharedIdentityRegistry,
        sources: Option<Arc<dyn DebuggerSources>>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            identity,
            sources,
            session: RwLock::new(None),
            model: RwLock::new(DebuggerModel::new()),
            dumped: Mutex::new(HashMap::new()),
            events,
            listener: Mutex::new(None),
        })
    }

    pub fn identity(&self) -> &SharedIdentityRegistry {
        &self.identity
    }

    /// Read access to the model. Do not hold the guard across an `.await`.
    pub fn model(&self) -> RwLockReadGuard<'_, DebuggerModel> {
        self.model.read()
    }

    pub fn subscribe_model(&self) -> broadcast::Receiver<ModelChange> {
        self.model.read().subscribe()
    }

    /// Debug events, re-emitted after the model has been updated for them.
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventMessage> {
        self.events.subscribe()
    }

    pub fn session(&self) -> Option<Arc<DebugSession>> {
        self.session.read().clone()
    }

    pub(crate) fn active_session(&self) -> Result<Arc<DebugSession>> {
        self.session().ok_or(DebuggerError::NoActiveSession)
    }

    /// Swap the active session. The previous one is disposed and the model
    /// cleared.
    pub fn set_session(self: &Arc<Self>, session: Option<Arc<DebugSession>>) {
        let previous = std::mem::replace(&mut *self.session.write(), session.clone());
        if let Some(previous) = previous {
            let same = session
                .as_ref()
                .map(|next| Arc::ptr_eq(next, &previous))
                .unwrap_or(false);
            if !same {
                previous.dispose();
            }
        }

        let mut listener = self.listener.lock();
        if let Some(task) = listener.take() {
            task.abort();
        }
        if let Some(session) = &session {
            let events = session.subscribe();
            *listener = Some(tokio::spawn(listen(Arc::downgrade(self), events)));
            tracing::info!("[service] Active session is now {}", session.id());
        }
        drop(listener);

        self.dumped.lock().clear();
        self.model.write().clear();
    }

    pub fn is_started(&self) -> bool {
        self.session().map(|s| s.is_started()).unwrap_or(false)
    }

    pub fn has_stopped_threads(&self) -> bool {
        !self.model.read().stopped_threads().is_empty()
    }

    pub fn is_pausing_on_exceptions(&self) -> bool {
        let Some(session) = self.session() else {
            return false;
        };
        let Ok(engine) = engine_of(&session) else {
            return false;
        };
        self.identity
            .read()
            .file_params(&engine)
            .map(|params| session.is_pausing_on_exceptions(&params.prefix))
            .unwrap_or(false)
    }

    /// Content id of `code` for the attached engine.
    pub fn code_id(&self, code: &str) -> Result<String> {
        let session = self.active_session()?;
        let engine = engine_of(&session)?;
        self.identity.read().compute_id(code, &engine)
    }

    /// Send a typed request, absorbing soft failures into `None`.
    pub(crate) async fn call<C>(&self, arguments: &C) -> Result<Option<C::Body>>
    where
        C: DebugCommand + Sync,
    {
        let session = self.active_session()?;
        absorb(C::COMMAND, session.request(arguments).await)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the debugger and sync with the kernel's state.
    pub async fn start(&self) -> Result<()> {
        let session = self.active_session()?;
        session.start().await?;
        self.restore_state(false).await
    }

    pub async fn stop(&self) -> Result<()> {
        let session = self.active_session()?;
        if let Err(e) = session.stop().await {
            if e.is_fatal() {
                return Err(e);
            }
            tracing::warn!("[service] disconnect failed: {}", e);
        }
        self.model.write().clear();
        Ok(())
    }

    // ========================================================================
    // Execution control
    // ========================================================================

    pub async fn continue_execution(&self) -> Result<()> {
        let thread_id = self.model.read().current_thread();
        if self.call(&ContinueArguments { thread_id }).await?.is_some() {
            let mut model = self.model.write();
            model.remove_stopped_thread(thread_id);
            model.clear_call_state();
        }
        Ok(())
    }

    pub async fn next(&self) -> Result<()> {
        let thread_id = self.model.read().current_thread();
        let stepped = self.call(&NextArguments { thread_id }).await?.is_some();
        self.after_step(stepped);
        Ok(())
    }

    pub async fn step_in(&self) -> Result<()> {
        let thread_id = self.model.read().current_thread();
        let stepped = self.call(&StepInArguments { thread_id }).await?.is_some();
        self.after_step(stepped);
        Ok(())
    }

    pub async fn step_out(&self) -> Result<()> {
        let thread_id = self.model.read().current_thread();
        let stepped = self.call(&StepOutArguments { thread_id }).await?.is_some();
        self.after_step(stepped);
        Ok(())
    }

    fn after_step(&self, stepped: bool) {
        if stepped {
            self.model.write().clear_call_state();
        }
    }

    /// Toggle pausing on exceptions for the attached engine and re-send the
    /// whole exception breakpoint configuration.
    pub async fn pause_on_exceptions(&self, enable: bool) -> Result<()> {
        let session = self.active_session()?;
        let engine = engine_of(&session)?;
        let prefix = self
            .identity
            .read()
            .file_params(&engine)
            .map(|params| params.prefix.clone())
            .ok_or_else(|| {
                DebuggerError::Configuration(format!("Kernel ({engine}) has no tmp file params."))
            })?;

        session.set_pausing_on_exceptions(&prefix, enable);
        self.send_exception_breakpoints(&session, enable).await
    }

    async fn send_exception_breakpoints(&self, session: &DebugSession, enable: bool) -> Result<()> {
        let filters = session.exception_breakpoint_filters();
        let paths = session.exception_paths();
        let break_mode = if enable {
            ExceptionBreakMode::UserUnhandled
        } else {
            ExceptionBreakMode::Never
        };

        let exception_options = filters
            .iter()
            .map(|_| ExceptionOptions {
                path: if paths.is_empty() {
                    Vec::new()
                } else {
                    vec![ExceptionPathSegment {
                        negate: None,
                        names: paths.clone(),
                    }]
                },
                break_mode,
            })
            .collect();
        let arguments = SetExceptionBreakpointsArguments {
            filters: if enable {
                filters.iter().map(|f| f.filter.clone()).collect()
            } else {
                Vec::new()
            },
            exception_options,
        };

        absorb(
            SetExceptionBreakpointsArguments::COMMAND,
            session.request(&arguments).await,
        )?;
        Ok(())
    }

    // ========================================================================
    // Events
    // ========================================================================

    async fn handle_event(&self, event: EventMessage) {
        match event.kind() {
            DebugEventKind::Stopped(body) => {
                let thread_id = body.thread_id.unwrap_or(DEFAULT_THREAD_ID);
                self.model.write().add_stopped_thread(thread_id);
                if let Err(e) = self.refresh_frames().await {
                    tracing::warn!("[service] Could not fetch frames after stop: {}", e);
                }
            }
            DebugEventKind::Continued(body) => {
                let mut model = self.model.write();
                model.remove_stopped_thread(body.thread_id);
                model.clear_call_state();
            }
            DebugEventKind::Terminated | DebugEventKind::Exited => {
                let mut model = self.model.write();
                model.set_stopped_threads(Vec::<i64>::new());
                model.clear_call_state();
            }
            DebugEventKind::Other => {}
        }

        let _ = self.events.send(event);
    }
}

impl Drop for DebuggerService {
    fn drop(&mut self) {
        if let Some(task) = self.listener.lock().take() {
            task.abort();
        }
    }
}

async fn listen(service: Weak<DebuggerService>, mut events: broadcast::Receiver<EventMessage>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let Some(service) = service.upgrade() else {
                    break;
                };
                tracing::debug!("[service] Event: {}", event.event);
                service.handle_event(event).await;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("[service] Event listener lagged, {} events dropped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Engine (kernel name) of the session's connection.
pub(crate) fn engine_of(session: &DebugSession) -> Result<String> {
    session
        .connection_info()
        .map(|info| info.kernel_name)
        .ok_or(DebuggerError::NoActiveConnection)
}

/// Keep fatal errors, log and drop everything else.
pub(crate) fn absorb<B>(command: &str, result: Result<Reply<B>>) -> Result<Option<B>> {
    match result {
        Ok(Reply::Success { body, .. }) => Ok(Some(body)),
        Ok(Reply::Failure { message, .. }) => {
            tracing::warn!("[service] {} failed: {}", command, message);
            Ok(None)
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            tracing::warn!("[service] {} failed: {}", command, e);
            Ok(None)
        }
    }
}
