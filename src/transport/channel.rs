//! In-process transport backed by tokio channels.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use super::{ConnectionInfo, KernelConnection, PendingMap, PendingReply, IOPUB_CAPACITY};
use crate::error::{DebuggerError, Result};
use crate::protocol::{EventMessage, IopubMessage, RequestMessage, ResponseMessage};

/// Create a connected pair: the client half for a session and the kernel half
/// for whatever plays the kernel (an embedded engine, a bridge, a test fake).
pub fn channel_connection(info: ConnectionInfo) -> (ChannelConnection, KernelEndpoint) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (iopub_tx, _) = broadcast::channel(IOPUB_CAPACITY);
    let pending = PendingMap::default();

    let connection = ChannelConnection {
        info,
        requests: request_tx,
        pending: pending.clone(),
        iopub: iopub_tx.clone(),
    };
    let endpoint = KernelEndpoint {
        requests: request_rx,
        pending,
        iopub: iopub_tx,
    };
    (connection, endpoint)
}

pub struct ChannelConnection {
    info: ConnectionInfo,
    requests: mpsc::UnboundedSender<RequestMessage>,
    pending: PendingMap,
    iopub: broadcast::Sender<IopubMessage>,
}

#[async_trait]
impl KernelConnection for ChannelConnection {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    async fn dispatch(&self, request: RequestMessage) -> Result<PendingReply> {
        let seq = request.seq;
        let reply = self.pending.register(seq)?;
        if self.requests.send(request).is_err() {
            self.pending.forget(seq);
            return Err(DebuggerError::ConnectionClosed);
        }
        Ok(reply)
    }

    fn subscribe(&self) -> broadcast::Receiver<IopubMessage> {
        self.iopub.subscribe()
    }
}

/// Kernel side of a [`channel_connection`] pair.
///
/// Dropping the endpoint fails every outstanding request with
/// `ConnectionClosed`.
pub struct KernelEndpoint {
    requests: mpsc::UnboundedReceiver<RequestMessage>,
    pending: PendingMap,
    iopub: broadcast::Sender<IopubMessage>,
}

impl KernelEndpoint {
    /// Next request from the client, or `None` once the client half is gone.
    pub async fn next_request(&mut self) -> Option<RequestMessage> {
        self.requests.recv().await
    }

    /// Answer a request. Returns false if nobody waits for it anymore.
    pub fn reply(&self, response: ResponseMessage) -> bool {
        self.pending.resolve(response)
    }

    pub fn publish(&self, message: IopubMessage) {
        // No subscribers is not an error: events are fire-and-forget
        let _ = self.iopub.send(message);
    }

    pub fn publish_event(&self, event: &EventMessage) {
        self.publish(IopubMessage::debug_event(event));
    }
}

impl Drop for KernelEndpoint {
    fn drop(&mut self) {
        self.pending.close_all();
    }
}
