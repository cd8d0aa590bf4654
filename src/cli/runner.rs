//! CLI execution runner.
//!
//! Dispatches parsed commands to the debugger service under the configured
//! per-command deadline.

use std::future::Future;
use std::path::Path;

use anyhow::{Context, Result};

use crate::model::VariableKey;
use crate::protocol::{Breakpoint, Source};

use super::bootstrap::CliContext;
use super::output;
use super::repl::{ConfigAction, ReplCommand, HELP};

/// Parse and execute a single command line.
pub async fn execute_once(ctx: &mut CliContext, line: &str) -> Result<()> {
    match ReplCommand::parse(line) {
        ReplCommand::Empty | ReplCommand::Quit => Ok(()),
        command => execute_command(ctx, &command).await,
    }
}

/// Execute commands from a file, one per line.
///
/// Lines starting with `#` are treated as comments. Execution stops on the
/// first error or at `quit`.
pub async fn execute_batch(ctx: &mut CliContext, file_path: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(file_path)
        .await
        .with_context(|| format!("Failed to read command file: {}", file_path.display()))?;

    let commands: Vec<(usize, ReplCommand)> = content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, ReplCommand::parse(line)))
        .filter(|(_, command)| *command != ReplCommand::Empty)
        .collect();

    if commands.is_empty() {
        anyhow::bail!("No commands found in file: {}", file_path.display());
    }

    for (line_no, command) in commands {
        if command == ReplCommand::Quit {
            break;
        }
        execute_command(ctx, &command)
            .await
            .with_context(|| format!("{}:{}", file_path.display(), line_no))?;
    }

    Ok(())
}

/// Run one command against the service and print its result.
pub async fn execute_command(ctx: &mut CliContext, command: &ReplCommand) -> Result<()> {
    let json = ctx.args.json;
    let service = ctx.service.clone();

    match command {
        ReplCommand::Start => {
            deadline(ctx, "start", service.start()).await?;
            output::print_status(json, "started", &service.model().title().to_string())?;
        }
        ReplCommand::Stop => {
            deadline(ctx, "stop", service.stop()).await?;
            output::print_status(json, "stopped", "")?;
        }
        ReplCommand::Restart => {
            deadline(ctx, "restart", service.restart()).await?;
            output::print_breakpoints(json, service.model().breakpoints())?;
        }
        ReplCommand::Break { cell, lines } => {
            let code = read_cell(cell).await?;
            ctx.editors.open(cell.display().to_string(), code.clone());
            let requested: Vec<Breakpoint> =
                lines.iter().copied().map(Breakpoint::pending).collect();
            deadline(
                ctx,
                "break",
                service.update_breakpoints(&code, &requested, None),
            )
            .await?;
            output::print_breakpoints(json, service.model().breakpoints())?;
        }
        ReplCommand::Clear => {
            deadline(ctx, "clear", service.clear_breakpoints()).await?;
            output::print_breakpoints(json, service.model().breakpoints())?;
        }
        ReplCommand::Continue => {
            deadline(ctx, "continue", service.continue_execution()).await?;
        }
        ReplCommand::Next => {
            deadline(ctx, "next", service.next()).await?;
        }
        ReplCommand::StepIn => {
            deadline(ctx, "stepin", service.step_in()).await?;
        }
        ReplCommand::StepOut => {
            deadline(ctx, "stepout", service.step_out()).await?;
        }
        ReplCommand::Frame(frame_id) => {
            if !deadline(ctx, "frame", service.select_frame(*frame_id)).await? {
                anyhow::bail!("Frame {} is not on the current stack", frame_id);
            }
            output::print_scopes(json, service.model().scopes())?;
        }
        ReplCommand::Expand { scope, reference } => {
            let key = VariableKey::new(*scope, *reference);
            if !deadline(ctx, "expand", service.expand_variable(key)).await? {
                anyhow::bail!("No variable with reference {} in scope {}", reference, scope);
            }
            output::print_scopes(json, service.model().scopes())?;
        }
        ReplCommand::Vars => {
            let model = service.model();
            output::print_frames(json, model.frames(), model.current_frame().map(|f| f.id))?;
            output::print_scopes(json, model.scopes())?;
        }
        ReplCommand::Globals => {
            deadline(ctx, "globals", service.display_defined_variables()).await?;
            output::print_scopes(json, service.model().scopes())?;
        }
        ReplCommand::Modules => {
            deadline(ctx, "modules", service.display_modules()).await?;
            let model = service.model();
            output::print_value(json, "modules", &model.kernel_sources().filtered())?;
        }
        ReplCommand::Threads => {
            let threads: Vec<i64> = service.model().stopped_threads().iter().copied().collect();
            output::print_value(json, "stopped threads", &threads)?;
        }
        ReplCommand::Breakpoints => {
            output::print_breakpoints(json, service.model().breakpoints())?;
        }
        ReplCommand::Eval(expression) => {
            match deadline(ctx, "eval", service.evaluate(expression)).await? {
                Some(body) => output::print_evaluation(json, &body)?,
                None => anyhow::bail!("Evaluation of '{}' failed", expression),
            }
        }
        ReplCommand::Rich(name) => {
            let frame_id = service.model().current_frame().map(|frame| frame.id);
            match deadline(ctx, "rich", service.inspect_rich_variable(name, frame_id)).await? {
                Some(body) => output::print_value(json, name, &body)?,
                None => anyhow::bail!("No rich representation for '{}'", name),
            }
        }
        ReplCommand::CopyToGlobals {
            source,
            destination,
            frame_id,
        } => {
            let copied = deadline(
                ctx,
                "copy",
                service.copy_to_globals(source, destination, *frame_id),
            )
            .await?;
            if !copied {
                anyhow::bail!("Could not copy '{}' to globals", source);
            }
            output::print_scopes(json, service.model().scopes())?;
        }
        ReplCommand::Source(path) => {
            match deadline(ctx, "source", service.get_source(Source::from_path(path.as_str()))).await? {
                Some(view) => output::print_source(json, &view)?,
                None => anyhow::bail!("Source '{}' is not available", path),
            }
        }
        ReplCommand::PauseOnExceptions(enable) => {
            deadline(ctx, "exceptions", service.pause_on_exceptions(*enable)).await?;
            output::print_status(
                json,
                "pause on exceptions",
                if service.is_pausing_on_exceptions() { "on" } else { "off" },
            )?;
        }
        ReplCommand::Id(cell) => {
            let code = read_cell(cell).await?;
            let id = service.code_id(&code)?;
            output::print_status(json, "id", &id)?;
        }
        ReplCommand::State => {
            output::print_value(json, "state", &service.get_debugger_state())?;
        }
        ReplCommand::Save(path) => {
            let path = path.clone().unwrap_or_else(|| ctx.state_path.clone());
            deadline(ctx, "save", service.save_debugger_state(&path)).await?;
            output::print_status(json, "saved", &path.display().to_string())?;
        }
        ReplCommand::Load(path) => {
            let path = path.clone().unwrap_or_else(|| ctx.state_path.clone());
            let configured = deadline(ctx, "load", service.load_debugger_state(&path)).await?;
            if !configured {
                tracing::warn!("[cli] Kernel rejected configurationDone after restoring state");
            }
            output::print_breakpoints(json, service.model().breakpoints())?;
        }
        ReplCommand::Config(action) => {
            execute_config(ctx, action).await?;
        }
        ReplCommand::Help => {
            eprintln!("{}", HELP);
        }
        ReplCommand::Usage(usage) => {
            anyhow::bail!("Usage: {}", usage);
        }
        ReplCommand::Unknown(input) => {
            anyhow::bail!("Unknown command: {} (type help)", input);
        }
        ReplCommand::Quit | ReplCommand::Empty => {}
    }

    Ok(())
}

/// Read or change settings. Changes are persisted; the request timeout and
/// state path of the running context follow them.
async fn execute_config(ctx: &mut CliContext, action: &ConfigAction) -> Result<()> {
    let json = ctx.args.json;
    let manager = ctx.settings_manager.clone();
    let location = manager.path().display().to_string();

    match action {
        ConfigAction::Show => {
            output::print_value(json, &location, &manager.get().await)?;
            return Ok(());
        }
        ConfigAction::Get(key) => {
            output::print_value(json, key, &manager.get_value(key).await?)?;
            return Ok(());
        }
        ConfigAction::Set { key, value } => {
            manager
                .set_value(key, value.clone())
                .await
                .with_context(|| format!("Failed to set '{}'", key))?;
            output::print_value(json, key, &manager.get_value(key).await?)?;
        }
        ConfigAction::Reset => {
            manager.reset().await?;
            output::print_status(json, "settings reset", &location)?;
        }
        ConfigAction::Reload => {
            manager.reload().await?;
            output::print_status(json, "settings reloaded", &location)?;
        }
    }

    let settings = manager.get().await;
    ctx.timeout = ctx.args.request_timeout(settings.connection.request_timeout_secs);
    ctx.state_path = manager.state_path().await;
    tracing::debug!(
        "[cli] Settings applied: timeout {:?}, state at {}",
        ctx.timeout,
        ctx.state_path.display()
    );
    Ok(())
}

/// Await `fut` under the context's deadline.
async fn deadline<T, E, F>(ctx: &CliContext, name: &str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    match tokio::time::timeout(ctx.timeout, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => anyhow::bail!("'{}' timed out after {:?}", name, ctx.timeout),
    }
}

async fn read_cell(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read cell: {}", path.display()))
}
