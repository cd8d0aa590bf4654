//! CLI output handling.
//!
//! Kernel events arrive on the service's broadcast channel and are printed
//! as they come. Command results are rendered either as JSON lines or as
//! short human-readable listings.

use std::collections::BTreeMap;
use std::io::{self, Write};

use anyhow::Result;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{ScopeEntry, SourceView, VariableNode};
use crate::protocol::{Breakpoint, DebugEventKind, EvaluateResponseBody, EventMessage, StackFrame};

/// Print debug events until the service's event channel closes.
pub async fn run_event_loop(
    mut events: broadcast::Receiver<EventMessage>,
    json_mode: bool,
) -> Result<()> {
    loop {
        match events.recv().await {
            Ok(event) => handle_event(&event, json_mode)?,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("[cli] Output fell behind, {} event(s) dropped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    Ok(())
}

fn handle_event(event: &EventMessage, json_mode: bool) -> Result<()> {
    if json_mode {
        let json = serde_json::json!({
            "type": "event",
            "event": event.event,
            "body": event.body,
        });
        println!("{}", json);
        io::stdout().flush()?;
        return Ok(());
    }

    match event.kind() {
        DebugEventKind::Stopped(body) => {
            let thread = body
                .thread_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "?".to_string());
            match body.text {
                Some(text) => eprintln!("[stopped] thread {} ({}): {}", thread, body.reason, text),
                None => eprintln!("[stopped] thread {} ({})", thread, body.reason),
            }
        }
        DebugEventKind::Continued(body) => {
            eprintln!("[continued] thread {}", body.thread_id);
        }
        DebugEventKind::Terminated => eprintln!("[terminated]"),
        DebugEventKind::Exited => eprintln!("[exited]"),
        DebugEventKind::Other => {
            if event.event == "output" {
                if let Some(text) = event.body.get("output").and_then(|v| v.as_str()) {
                    print!("{}", text);
                    io::stdout().flush()?;
                }
            } else {
                eprintln!("[event] {}", event.event);
            }
        }
    }
    Ok(())
}

/// Print any serializable result.
pub fn print_value<T: Serialize + ?Sized>(json_mode: bool, label: &str, value: &T) -> Result<()> {
    if json_mode {
        let json = serde_json::json!({ "type": "result", "label": label, "value": value });
        println!("{}", json);
    } else {
        println!("{}:\n{}", label, serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

pub fn print_status(json_mode: bool, label: &str, detail: &str) -> Result<()> {
    if json_mode {
        print_value(json_mode, label, detail)
    } else {
        if detail.is_empty() {
            println!("{}", label);
        } else {
            println!("{}: {}", label, detail);
        }
        Ok(())
    }
}

pub fn print_breakpoints(
    json_mode: bool,
    breakpoints: &BTreeMap<String, Vec<Breakpoint>>,
) -> Result<()> {
    if json_mode {
        return print_value(json_mode, "breakpoints", breakpoints);
    }
    if breakpoints.is_empty() {
        println!("No breakpoints");
    }
    for (source_id, list) in breakpoints {
        println!("{}", source_id);
        for bp in list {
            println!("  {}", format_breakpoint(bp));
        }
    }
    Ok(())
}

pub fn print_frames(json_mode: bool, frames: &[StackFrame], current: Option<i64>) -> Result<()> {
    if json_mode {
        return print_value(json_mode, "frames", frames);
    }
    if frames.is_empty() {
        println!("Not stopped");
    }
    for frame in frames {
        let marker = if Some(frame.id) == current { ">" } else { " " };
        println!("{} {}", marker, format_frame(frame));
    }
    Ok(())
}

pub fn print_scopes(json_mode: bool, scopes: &[ScopeEntry]) -> Result<()> {
    if json_mode {
        return print_value(json_mode, "scopes", scopes);
    }
    print!("{}", format_scopes(scopes));
    Ok(())
}

pub fn print_evaluation(json_mode: bool, body: &EvaluateResponseBody) -> Result<()> {
    if json_mode {
        return print_value(json_mode, "eval", body);
    }
    match &body.type_name {
        Some(type_name) => println!("{} ({})", body.result, type_name),
        None => println!("{}", body.result),
    }
    Ok(())
}

pub fn print_source(json_mode: bool, view: &SourceView) -> Result<()> {
    if json_mode {
        return print_value(json_mode, "source", view);
    }
    print!("{}", view.content);
    if !view.content.ends_with('\n') {
        println!();
    }
    Ok(())
}

fn format_breakpoint(bp: &Breakpoint) -> String {
    let line = bp
        .line
        .map(|line| line.to_string())
        .unwrap_or_else(|| "?".to_string());
    let state = if bp.verified { "verified" } else { "pending" };
    match &bp.message {
        Some(message) => format!("line {} [{}] {}", line, state, message),
        None => format!("line {} [{}]", line, state),
    }
}

fn format_frame(frame: &StackFrame) -> String {
    let location = frame
        .source
        .as_ref()
        .and_then(|source| source.path.as_deref().or(source.name.as_deref()))
        .unwrap_or("<unknown>");
    format!("#{} {} at {}:{}", frame.id, frame.name, location, frame.line)
}

/// Indented tree of scopes and their loaded variables.
fn format_scopes(scopes: &[ScopeEntry]) -> String {
    let mut out = String::new();
    for (index, scope) in scopes.iter().enumerate() {
        out.push_str(&format!("[{}] {}\n", index, scope.name));
        for node in &scope.variables {
            format_node(node, 1, &mut out);
        }
    }
    out
}

fn format_node(node: &VariableNode, depth: usize, out: &mut String) {
    let variable = &node.variable;
    let indent = "  ".repeat(depth);
    let type_name = variable
        .type_name
        .as_deref()
        .map(|t| format!(": {}", t))
        .unwrap_or_default();
    let reference = if variable.variables_reference > 0 && !node.expanded {
        format!(" (+{})", variable.variables_reference)
    } else {
        String::new()
    };
    out.push_str(&format!(
        "{}{}{} = {}{}\n",
        indent,
        variable.name,
        type_name,
        truncate(&variable.value, 80),
        reference
    ));
    for child in &node.children {
        format_node(child, depth + 1, out);
    }
}

/// Truncate a string to a maximum number of characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Source, Variable};

    fn variable(name: &str, value: &str, reference: i64) -> Variable {
        Variable {
            name: name.to_string(),
            value: value.to_string(),
            variables_reference: reference,
            ..Default::default()
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world!", 8), "hello...");
        assert_eq!(truncate("ééééé", 4), "é...");
    }

    #[test]
    fn test_format_breakpoint() {
        let pending = Breakpoint::pending(4);
        assert_eq!(format_breakpoint(&pending), "line 4 [pending]");

        let verified = Breakpoint {
            verified: true,
            line: Some(2),
            message: Some("moved".to_string()),
            ..Default::default()
        };
        assert_eq!(format_breakpoint(&verified), "line 2 [verified] moved");
    }

    #[test]
    fn test_format_frame_prefers_path() {
        let frame = StackFrame {
            id: 3,
            name: "<module>".to_string(),
            source: Some(Source::from_path("/tmp/ipykernel_1/42.py")),
            line: 7,
            column: 0,
        };
        assert_eq!(format_frame(&frame), "#3 <module> at /tmp/ipykernel_1/42.py:7");
    }

    #[test]
    fn test_format_scopes_marks_expandable_variables() {
        let scope = ScopeEntry::new(
            "Locals",
            110,
            vec![variable("x", "1", 0), variable("d", "{...}", 20)],
        );
        let text = format_scopes(&[scope]);
        assert!(text.starts_with("[0] Locals\n"));
        assert!(text.contains("  x = 1\n"));
        assert!(text.contains("  d = {...} (+20)\n"));
    }
}
