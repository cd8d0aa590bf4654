//! CLI bootstrap - Connect to a kernel and assemble the debugger stack.
//!
//! This module provides `CliContext`, which owns the service, the session
//! bound to the kernel connection and the editor registry the CLI uses to
//! track which cells are "open".

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use crate::identity::CodeIdentityRegistry;
use crate::service::DebuggerService;
use crate::session::DebugSession;
use crate::settings::{KdbgSettings, SettingsManager};
use crate::sources::{DebuggerSources, OpenEditors};
use crate::transport::{ConnectionInfo, FramedConnection, KernelConnection};

use super::args::Args;
use super::output::run_event_loop;

/// Context for CLI execution containing all initialized services.
pub struct CliContext {
    pub service: Arc<DebuggerService>,

    /// Cells the CLI has loaded, by file path
    pub editors: Arc<OpenEditors>,

    pub settings_manager: Arc<SettingsManager>,

    /// Where `save` and `load` go without an explicit path
    pub state_path: PathBuf,

    pub timeout: Duration,

    /// Command-line arguments
    pub args: Args,

    output: JoinHandle<()>,
}

impl CliContext {
    /// Detach the session and stop printing events.
    pub async fn shutdown(self) -> Result<()> {
        if let Some(session) = self.service.session() {
            if session.is_started() {
                if let Err(e) = self.service.stop().await {
                    tracing::warn!("[cli] Failed to stop the debugger on exit: {}", e);
                }
            }
        }
        self.service.set_session(None);
        self.output.abort();
        Ok(())
    }
}

/// Initialize the CLI context: settings, identity registry, connection,
/// session and service.
pub async fn initialize(args: &Args) -> Result<CliContext> {
    let settings_manager = Arc::new(match &args.config {
        Some(path) => SettingsManager::with_path(path.clone()).await,
        None => SettingsManager::new().await,
    }
    .context("Failed to initialize settings manager")?);

    if args.config.is_none() {
        if let Err(e) = settings_manager.ensure_settings_file().await {
            tracing::warn!("[cli] Failed to create settings template: {}", e);
        }
    }

    let settings = settings_manager.get().await;
    init_logging(args, &settings);

    if args.verbose {
        eprintln!(
            "[cli] Settings loaded from {}",
            settings_manager.path().display()
        );
    }

    let identity = CodeIdentityRegistry::from_settings(&settings.engines)
        .context("Invalid [engines] settings")?
        .shared();
    let editors = OpenEditors::new(identity.clone());
    let lookup: Arc<dyn DebuggerSources> = editors.clone();
    let service = DebuggerService::new(identity, Some(lookup));

    let info = connection_info(args, &settings);
    let address = args
        .address
        .clone()
        .unwrap_or_else(|| settings.connection.address.clone());

    if args.verbose {
        eprintln!("[cli] Connecting to {} ({})", address, info.kernel_name);
    }

    let connection = FramedConnection::connect_tcp(&address, info)
        .await
        .with_context(|| format!("Failed to connect to debug endpoint at {}", address))?;
    let connection: Arc<dyn KernelConnection> = Arc::new(connection);
    let session = Arc::new(DebugSession::with_connection(connection));

    let output = {
        let events = service.subscribe_events();
        let json_mode = args.json;
        tokio::spawn(async move {
            if let Err(e) = run_event_loop(events, json_mode).await {
                tracing::warn!("[cli] Output handler error: {}", e);
            }
        })
    };

    service.set_session(Some(session));

    let auto_start = settings.state.auto_start && !args.no_start;
    service
        .restore_state(auto_start)
        .await
        .context("Failed to synchronize with the kernel debugger")?;

    if args.verbose {
        eprintln!(
            "[cli] Debugger {}",
            if service.is_started() { "started" } else { "attached" }
        );
    }

    let state_path = settings_manager.state_path().await;
    let timeout = args.request_timeout(settings.connection.request_timeout_secs);

    Ok(CliContext {
        service,
        editors,
        settings_manager,
        state_path,
        timeout,
        args: args.clone(),
        output,
    })
}

fn init_logging(args: &Args, settings: &KdbgSettings) {
    let log_level = if args.verbose {
        "debug"
    } else {
        settings.logging.level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match format!("kdbg_lib={}", log_level).parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Connection identity: CLI flags take precedence over settings.
fn connection_info(args: &Args, settings: &KdbgSettings) -> ConnectionInfo {
    ConnectionInfo::new(
        settings.connection.name.clone(),
        args.kernel
            .clone()
            .unwrap_or_else(|| settings.connection.kernel_name.clone()),
        args.path
            .clone()
            .unwrap_or_else(|| settings.connection.path.clone()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_connection_info_prefers_args() {
        let settings = KdbgSettings::default();
        let args = Args::parse_from(["kdbg-cli", "-k", "xpython", "--path", "a.ipynb"]);

        let info = connection_info(&args, &settings);
        assert_eq!(info.kernel_name, "xpython");
        assert_eq!(info.path, "a.ipynb");
        assert_eq!(info.name, "kernel");
    }

    #[test]
    fn test_connection_info_falls_back_to_settings() {
        let mut settings = KdbgSettings::default();
        settings.connection.path = "report.ipynb".to_string();
        let args = Args::parse_from(["kdbg-cli"]);

        let info = connection_info(&args, &settings);
        assert_eq!(info.kernel_name, "python3");
        assert_eq!(info.path, "report.ipynb");
    }
}
