//! kdbg: debug-session protocol engine for notebook kernels.
//!
//! Layers, bottom up:
//! - [`transport`]: request/response and broadcast channels to a kernel
//! - [`session`]: sequencing, the readiness gate and the debugger handshake
//! - [`identity`]: content ids for cells dumped to kernel temp files
//! - [`model`]: observable debugger state
//! - [`service`]: breakpoints, stepping and inspection on top of a session

#[cfg(feature = "cli")]
pub mod cli;
pub mod error;
pub mod identity;
pub mod model;
pub mod protocol;
pub mod service;
pub mod session;
pub mod settings;
pub mod sources;
pub mod transport;

#[cfg(test)]
mod testing;

pub use error::{DebuggerError, Result};
pub use identity::{CodeIdentityRegistry, SharedIdentityRegistry};
pub use model::{DebuggerModel, ModelChange};
pub use service::{DebuggerService, DebuggerState, DebuggerStateFile};
pub use session::{DebugSession, SessionState};
pub use sources::{DebuggerSources, OpenEditors};
pub use transport::{ConnectionInfo, KernelConnection};
