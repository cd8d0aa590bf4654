//! `Content-Length` framed JSON transport.
//!
//! Each message is `Content-Length: N\r\n\r\n` followed by N bytes of JSON.
//! Replies are routed to their waiter by `request_seq`; events are re-wrapped
//! as `debug_event` iopub messages.

use std::io;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use super::{ConnectionInfo, KernelConnection, PendingMap, PendingReply, IOPUB_CAPACITY};
use crate::error::{DebuggerError, Result};
use crate::protocol::{EventMessage, IopubMessage, RequestMessage, ResponseMessage};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Largest frame body accepted from a peer.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Serialize `message` into a complete frame.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(message)?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Value>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut seen_header = false;

    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            if seen_header {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed while reading frame headers",
                )
                .into());
            }
            return Ok(None);
        }
        seen_header = true;

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if content_length.is_some() {
                break;
            }
            // Tolerate stray blank lines between frames
            continue;
        }

        if let Some((key, value)) = trimmed.split_once(':') {
            if key.trim().eq_ignore_ascii_case("content-length") {
                let parsed = value.trim().parse::<usize>().map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("invalid Content-Length value: {e}"),
                    )
                })?;
                content_length = Some(parsed);
            }
        }
    }

    let length = content_length.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length header")
    })?;
    if length > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {length} bytes exceeds the {MAX_FRAME_LEN} byte limit"),
        )
        .into());
    }
    let mut body = vec![0_u8; length];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

/// Debug connection over a byte stream.
pub struct FramedConnection {
    info: ConnectionInfo,
    writer: Mutex<BoxedWriter>,
    pending: PendingMap,
    iopub: broadcast::Sender<IopubMessage>,
    reader_task: JoinHandle<()>,
}

impl FramedConnection {
    /// Wrap a split stream. Spawns the reader task, so this must run inside a
    /// tokio runtime.
    pub fn new<R, W>(reader: R, writer: W, info: ConnectionInfo) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending = PendingMap::default();
        let (iopub, _) = broadcast::channel(IOPUB_CAPACITY);
        let reader_task = tokio::spawn(reader_loop(
            BufReader::new(reader),
            pending.clone(),
            iopub.clone(),
        ));

        Self {
            info,
            writer: Mutex::new(Box::new(writer)),
            pending,
            iopub,
            reader_task,
        }
    }

    pub async fn connect_tcp(address: &str, info: ConnectionInfo) -> Result<Self> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        tracing::info!("[transport] Connected to debug endpoint at {}", address);
        Ok(Self::new(reader, writer, info))
    }
}

impl Drop for FramedConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.pending.close_all();
    }
}

#[async_trait]
impl KernelConnection for FramedConnection {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    async fn dispatch(&self, request: RequestMessage) -> Result<PendingReply> {
        let seq = request.seq;
        let frame = encode_frame(&request)?;
        let reply = self.pending.register(seq)?;

        let mut writer = self.writer.lock().await;
        let written = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            self.pending.forget(seq);
            return Err(DebuggerError::Io(e));
        }

        tracing::trace!("[transport] -> {} (seq {})", request.command, seq);
        Ok(reply)
    }

    fn subscribe(&self) -> broadcast::Receiver<IopubMessage> {
        self.iopub.subscribe()
    }
}

async fn reader_loop<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    iopub: broadcast::Sender<IopubMessage>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let message = match read_frame(&mut reader).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::debug!("[transport] Debug endpoint closed the stream");
                break;
            }
            Err(e) => {
                tracing::warn!("[transport] Failed to read frame: {}", e);
                break;
            }
        };

        match message.get("type").and_then(Value::as_str) {
            Some("response") => match serde_json::from_value::<ResponseMessage>(message) {
                Ok(response) => {
                    pending.resolve(response);
                }
                Err(e) => tracing::warn!("[transport] Malformed response: {}", e),
            },
            Some("event") => match serde_json::from_value::<EventMessage>(message) {
                Ok(event) => {
                    let _ = iopub.send(IopubMessage::debug_event(&event));
                }
                Err(e) => tracing::warn!("[transport] Malformed event: {}", e),
            },
            other => {
                tracing::debug!("[transport] Ignoring message of type {:?}", other);
            }
        }
    }

    // Later dispatches fail fast with `ConnectionClosed`
    pending.close_all();
}
