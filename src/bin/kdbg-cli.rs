//! kdbg CLI - Headless debugger for notebook kernels
//!
//! Connects to a kernel's Content-Length framed debug endpoint and drives
//! the debugger from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Build the CLI binary
//! cargo build --features cli --bin kdbg-cli
//!
//! # Interactive mode
//! ./target/debug/kdbg-cli --address 127.0.0.1:5678
//!
//! # Single command
//! ./target/debug/kdbg-cli -e "break cell.py 3"
//!
//! # Script of commands, JSON output for scripting
//! ./target/debug/kdbg-cli -f session.kdbg --json | jq .
//! ```

use anyhow::Result;
use clap::Parser;

use kdbg_lib::cli::{execute_batch, execute_once, initialize, run_repl, Args};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut ctx = initialize(&args).await?;

    let result = if let Some(ref command) = args.execute {
        execute_once(&mut ctx, command).await
    } else if let Some(ref file) = args.file {
        execute_batch(&mut ctx, file).await
    } else {
        run_repl(&mut ctx).await
    };

    ctx.shutdown().await?;

    result
}
