//! Kernel transports.
//!
//! A [`KernelConnection`] dispatches debug requests and hands back a
//! [`PendingReply`] that resolves once the reply with the matching
//! `request_seq` arrives. Events arrive separately on the iopub broadcast.
//!
//! Two implementations ship with the crate:
//! - [`ChannelConnection`]: in-process channel pair, the kernel side is a
//!   [`KernelEndpoint`]
//! - [`FramedConnection`]: `Content-Length` framed JSON over any async stream

mod channel;
mod framed;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};

use crate::error::{DebuggerError, Result};
use crate::protocol::{IopubMessage, RequestMessage, ResponseMessage};

pub use channel::{channel_connection, ChannelConnection, KernelEndpoint};
pub use framed::{encode_frame, read_frame, FramedConnection};

/// Capacity of the iopub broadcast buffer.
pub(crate) const IOPUB_CAPACITY: usize = 256;

/// Describes what a connection is attached to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Display name of the kernel session.
    pub name: String,
    /// Engine identifier used to key hash and file parameters.
    pub kernel_name: String,
    /// Path of the document the kernel was launched for.
    pub path: String,
}

impl ConnectionInfo {
    pub fn new(name: impl Into<String>, kernel_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kernel_name: kernel_name.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
pub trait KernelConnection: Send + Sync + 'static {
    fn info(&self) -> &ConnectionInfo;

    /// Put `request` on the wire. The returned handle resolves with its reply.
    async fn dispatch(&self, request: RequestMessage) -> Result<PendingReply>;

    /// Subscribe to the kernel's iopub stream.
    fn subscribe(&self) -> broadcast::Receiver<IopubMessage>;
}

/// Reply handle for a dispatched request.
#[derive(Debug)]
pub struct PendingReply {
    seq: i64,
    rx: oneshot::Receiver<ResponseMessage>,
}

impl PendingReply {
    pub fn new(seq: i64, rx: oneshot::Receiver<ResponseMessage>) -> Self {
        Self { seq, rx }
    }

    pub fn seq(&self) -> i64 {
        self.seq
    }

    /// Wait for the reply. Fails with `ConnectionClosed` if the connection
    /// goes away before answering.
    pub async fn wait(self) -> Result<ResponseMessage> {
        self.rx.await.map_err(|_| DebuggerError::ConnectionClosed)
    }
}

/// Outstanding requests keyed by sequence number.
///
/// Once closed, the map stays closed: new registrations fail with
/// `ConnectionClosed` instead of waiting on a reader that is gone.
#[derive(Debug, Default, Clone)]
pub(crate) struct PendingMap {
    inner: Arc<Mutex<PendingState>>,
}

#[derive(Debug, Default)]
struct PendingState {
    waiters: HashMap<i64, oneshot::Sender<ResponseMessage>>,
    closed: bool,
}

impl PendingMap {
    pub(crate) fn register(&self, seq: i64) -> Result<PendingReply> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(DebuggerError::ConnectionClosed);
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.insert(seq, tx);
        Ok(PendingReply::new(seq, rx))
    }

    pub(crate) fn forget(&self, seq: i64) {
        self.inner.lock().waiters.remove(&seq);
    }

    /// Route a reply to its waiter. Returns false when nobody is waiting.
    pub(crate) fn resolve(&self, response: ResponseMessage) -> bool {
        let sender = self.inner.lock().waiters.remove(&response.request_seq);
        match sender {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                tracing::debug!(
                    "[transport] Dropping reply for unknown request {}",
                    response.request_seq
                );
                false
            }
        }
    }

    /// Drop every waiter so their handles resolve with `ConnectionClosed`,
    /// and refuse later registrations.
    pub(crate) fn close_all(&self) {
        let mut state = self.inner.lock();
        state.closed = true;
        state.waiters.clear();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
