//! CLI module for headless debugging.
//!
//! The CLI connects to a kernel's debug endpoint over TCP, attaches a
//! [`DebugSession`](crate::session::DebugSession) and drives a
//! [`DebuggerService`](crate::service::DebuggerService) from commands typed
//! at a prompt, passed with `-e`, or read from a file with `-f`.
//!
//! ```text
//! +-----------+     +-----------------+     +---------------+
//! | repl.rs   | --> | DebuggerService | --> | output.rs     |
//! | runner.rs |     | (events, model) |     | (print/JSON)  |
//! +-----------+     +-----------------+     +---------------+
//! ```
//!
//! # REPL Mode
//!
//! When no command is provided via `-e` or `-f`, the CLI enters
//! interactive REPL mode. See `repl.rs` for the command set.

mod args;
mod bootstrap;
mod output;
mod repl;
mod runner;

pub use args::Args;
pub use bootstrap::{initialize, CliContext};
pub use output::run_event_loop;
pub use repl::{run_repl, ConfigAction, ReplCommand};
pub use runner::{execute_batch, execute_command, execute_once};
