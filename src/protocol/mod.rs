//! Debug protocol messages exchanged with the kernel.
//!
//! Requests, replies and events travel as JSON objects in the debug-adapter
//! shape (`seq`, `type`, `command`/`event`, `arguments`/`body`). The raw wire
//! structs live here; typed arguments and reply bodies live in [`requests`]
//! and [`types`].

pub mod requests;
pub mod types;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DebuggerError, Result};

pub use requests::*;
pub use types::*;

/// iopub message type carrying debug events.
pub const DEBUG_EVENT_MSG_TYPE: &str = "debug_event";

/// Outgoing request as it is put on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub seq: i64,
    #[serde(rename = "type")]
    pub message_type: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub arguments: Value,
}

impl RequestMessage {
    pub fn new(seq: i64, command: impl Into<String>, arguments: Value) -> Self {
        Self {
            seq,
            message_type: "request".to_string(),
            command: command.into(),
            arguments,
        }
    }
}

/// Reply as received from the kernel, correlated by `request_seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub seq: i64,
    #[serde(rename = "type", default = "response_type")]
    pub message_type: String,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,
}

fn response_type() -> String {
    "response".to_string()
}

impl ResponseMessage {
    pub fn success(request: &RequestMessage, body: Value) -> Self {
        Self {
            seq: 0,
            message_type: response_type(),
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body,
        }
    }

    pub fn failure(request: &RequestMessage, message: impl Into<String>) -> Self {
        Self {
            seq: 0,
            message_type: response_type(),
            request_seq: request.seq,
            success: false,
            command: request.command.clone(),
            message: Some(message.into()),
            body: Value::Null,
        }
    }

    /// Convert into a tagged reply, decoding the body on success.
    ///
    /// A missing body decodes to `B::default()`.
    pub fn into_reply<B>(self) -> Result<Reply<B>>
    where
        B: DeserializeOwned + Default,
    {
        if !self.success {
            return Ok(Reply::Failure {
                command: self.command,
                message: self.message.unwrap_or_default(),
            });
        }

        let body = if self.body.is_null() {
            B::default()
        } else {
            serde_json::from_value(self.body)?
        };
        Ok(Reply::Success {
            command: self.command,
            body,
        })
    }
}

/// Unsolicited event from the kernel's debugger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(default)]
    pub seq: i64,
    #[serde(rename = "type", default = "event_type")]
    pub message_type: String,
    pub event: String,
    #[serde(default)]
    pub body: Value,
}

fn event_type() -> String {
    "event".to_string()
}

/// Typed view over the events the service reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugEventKind {
    Stopped(StoppedEventBody),
    Continued(ContinuedEventBody),
    Terminated,
    Exited,
    Other,
}

impl EventMessage {
    pub fn new(event: impl Into<String>, body: Value) -> Self {
        Self {
            seq: 0,
            message_type: event_type(),
            event: event.into(),
            body,
        }
    }

    /// Interpret the event. Malformed stopped/continued bodies fall back to `Other`.
    pub fn kind(&self) -> DebugEventKind {
        match self.event.as_str() {
            "stopped" => serde_json::from_value(self.body.clone())
                .map(DebugEventKind::Stopped)
                .unwrap_or(DebugEventKind::Other),
            "continued" => serde_json::from_value(self.body.clone())
                .map(DebugEventKind::Continued)
                .unwrap_or(DebugEventKind::Other),
            "terminated" => DebugEventKind::Terminated,
            "exited" => DebugEventKind::Exited,
            _ => DebugEventKind::Other,
        }
    }
}

/// Message on the kernel's broadcast (iopub) channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IopubMessage {
    pub msg_type: String,
    pub content: Value,
}

impl IopubMessage {
    pub fn debug_event(event: &EventMessage) -> Self {
        Self {
            msg_type: DEBUG_EVENT_MSG_TYPE.to_string(),
            content: serde_json::to_value(event).unwrap_or(Value::Null),
        }
    }
}

/// A reply that either succeeded with a body or failed with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<B> {
    Success { command: String, body: B },
    Failure { command: String, message: String },
}

impl<B> Reply<B> {
    pub fn is_success(&self) -> bool {
        matches!(self, Reply::Success { .. })
    }

    pub fn command(&self) -> &str {
        match self {
            Reply::Success { command, .. } | Reply::Failure { command, .. } => command,
        }
    }

    pub fn ok(self) -> Option<B> {
        match self {
            Reply::Success { body, .. } => Some(body),
            Reply::Failure { .. } => None,
        }
    }

    /// Turn a failed reply into `DebuggerError::RequestFailed`.
    pub fn into_result(self) -> Result<B> {
        match self {
            Reply::Success { body, .. } => Ok(body),
            Reply::Failure { command, message } => {
                Err(DebuggerError::RequestFailed { command, message })
            }
        }
    }
}

/// A request whose command name and reply body type are known statically.
pub trait DebugCommand: Serialize {
    const COMMAND: &'static str;
    type Body: DeserializeOwned + Default;
}
