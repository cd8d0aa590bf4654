//! Lightweight REPL (Read-Eval-Print-Loop) for kdbg-cli.
//!
//! Provides an interactive mode when no command is given via `-e` or `-f`.
//! Each line is one debugger command; `help` lists them.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use serde_json::Value;

use super::bootstrap::CliContext;
use super::runner::execute_command;

pub const HELP: &str = "\
Commands:
  start | stop | restart            debugger lifecycle
  break <cell-file> <line>...       set the breakpoints of a cell
  clear                             remove every breakpoint
  continue | next | stepin | stepout
  frame <id>                        select a stack frame
  expand <scope> <ref>              expand a variable
  vars | globals | modules | threads | breakpoints
  eval <expr>                       evaluate in the current frame
  rich <name>                       rich representation of a variable
  copy <src> <dst> <frame>          copy a frame variable into globals
  source <path>                     show a kernel source
  exceptions on|off                 pause on raised exceptions
  id <cell-file>                    content id of a cell
  state | save [file] | load [file]
  config [get] <key>                show settings, or one dotted key
  config set <key> <value>          change and persist a setting
  config reset | reload             defaults, or re-read the file
  help | quit";

/// `config` subcommands.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigAction {
    Show,
    Get(String),
    /// `value` is JSON when it parses as JSON, a plain string otherwise
    Set { key: String, value: Value },
    Reset,
    Reload,
}

/// REPL command variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Start,
    Stop,
    Restart,
    Break { cell: PathBuf, lines: Vec<i64> },
    Clear,
    Continue,
    Next,
    StepIn,
    StepOut,
    Frame(i64),
    Expand { scope: usize, reference: i64 },
    Vars,
    Globals,
    Modules,
    Threads,
    Breakpoints,
    Eval(String),
    Rich(String),
    CopyToGlobals {
        source: String,
        destination: String,
        frame_id: i64,
    },
    Source(String),
    PauseOnExceptions(bool),
    Id(PathBuf),
    State,
    Save(Option<PathBuf>),
    Load(Option<PathBuf>),
    Config(ConfigAction),
    Help,
    Quit,
    /// Malformed arguments for a known command
    Usage(&'static str),
    /// Unknown command (will show help)
    Unknown(String),
    /// Empty input (skip)
    Empty,
}

impl ReplCommand {
    /// Parse user input into a REPL command.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return ReplCommand::Empty;
        }

        let (head, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (trimmed, ""),
        };
        let words: Vec<&str> = rest.split_whitespace().collect();

        match head.to_lowercase().as_str() {
            "start" => ReplCommand::Start,
            "stop" => ReplCommand::Stop,
            "restart" => ReplCommand::Restart,
            "break" | "b" => match words.split_first() {
                Some((cell, lines)) if !lines.is_empty() => {
                    match lines
                        .iter()
                        .map(|line| line.parse::<i64>())
                        .collect::<Result<Vec<_>, _>>()
                    {
                        Ok(lines) => ReplCommand::Break {
                            cell: PathBuf::from(cell),
                            lines,
                        },
                        Err(_) => ReplCommand::Usage("break <cell-file> <line>..."),
                    }
                }
                _ => ReplCommand::Usage("break <cell-file> <line>..."),
            },
            "clear" => ReplCommand::Clear,
            "continue" | "c" => ReplCommand::Continue,
            "next" | "n" => ReplCommand::Next,
            "stepin" | "s" => ReplCommand::StepIn,
            "stepout" | "finish" => ReplCommand::StepOut,
            "frame" | "f" => match words.as_slice() {
                [id] => id
                    .parse()
                    .map(ReplCommand::Frame)
                    .unwrap_or(ReplCommand::Usage("frame <id>")),
                _ => ReplCommand::Usage("frame <id>"),
            },
            "expand" => match words.as_slice() {
                [scope, reference] => match (scope.parse::<usize>(), reference.parse::<i64>()) {
                    (Ok(scope), Ok(reference)) => ReplCommand::Expand { scope, reference },
                    _ => ReplCommand::Usage("expand <scope> <ref>"),
                },
                _ => ReplCommand::Usage("expand <scope> <ref>"),
            },
            "vars" => ReplCommand::Vars,
            "globals" => ReplCommand::Globals,
            "modules" => ReplCommand::Modules,
            "threads" => ReplCommand::Threads,
            "breakpoints" | "bl" => ReplCommand::Breakpoints,
            "eval" | "p" | "print" => {
                if rest.is_empty() {
                    ReplCommand::Usage("eval <expr>")
                } else {
                    ReplCommand::Eval(rest.to_string())
                }
            }
            "rich" => match words.as_slice() {
                [name] => ReplCommand::Rich(name.to_string()),
                _ => ReplCommand::Usage("rich <name>"),
            },
            "copy" => match words.as_slice() {
                [source, destination, frame] => match frame.parse::<i64>() {
                    Ok(frame_id) => ReplCommand::CopyToGlobals {
                        source: source.to_string(),
                        destination: destination.to_string(),
                        frame_id,
                    },
                    Err(_) => ReplCommand::Usage("copy <src> <dst> <frame>"),
                },
                _ => ReplCommand::Usage("copy <src> <dst> <frame>"),
            },
            "source" => {
                if rest.is_empty() {
                    ReplCommand::Usage("source <path>")
                } else {
                    ReplCommand::Source(rest.to_string())
                }
            }
            "exceptions" => match words.as_slice() {
                ["on"] => ReplCommand::PauseOnExceptions(true),
                ["off"] => ReplCommand::PauseOnExceptions(false),
                _ => ReplCommand::Usage("exceptions on|off"),
            },
            "id" => match words.as_slice() {
                [cell] => ReplCommand::Id(PathBuf::from(cell)),
                _ => ReplCommand::Usage("id <cell-file>"),
            },
            "state" => ReplCommand::State,
            "save" => ReplCommand::Save(words.first().map(PathBuf::from)),
            "load" => ReplCommand::Load(words.first().map(PathBuf::from)),
            "config" => parse_config(rest),
            "help" | "?" => ReplCommand::Help,
            "quit" | "exit" | "q" => ReplCommand::Quit,
            _ => ReplCommand::Unknown(trimmed.to_string()),
        }
    }
}

fn parse_config(rest: &str) -> ReplCommand {
    const USAGE: &str = "config [get <key> | set <key> <value> | reset | reload]";

    let (verb, tail) = match rest.split_once(char::is_whitespace) {
        Some((verb, tail)) => (verb, tail.trim()),
        None => (rest, ""),
    };
    let action = match (verb, tail) {
        ("", _) => ConfigAction::Show,
        ("reset", "") => ConfigAction::Reset,
        ("reload", "") => ConfigAction::Reload,
        ("get", key) if !key.is_empty() && !key.contains(char::is_whitespace) => {
            ConfigAction::Get(key.to_string())
        }
        ("set", tail) => match tail.split_once(char::is_whitespace) {
            Some((key, raw)) => ConfigAction::Set {
                key: key.to_string(),
                value: serde_json::from_str(raw.trim())
                    .unwrap_or_else(|_| Value::String(raw.trim().to_string())),
            },
            None => return ReplCommand::Usage(USAGE),
        },
        (key, "") if !matches!(key, "get" | "set") => ConfigAction::Get(key.to_string()),
        _ => return ReplCommand::Usage(USAGE),
    };
    ReplCommand::Config(action)
}

/// Run an interactive REPL session.
///
/// Returns when the user exits or on EOF (Ctrl+D).
pub async fn run_repl(ctx: &mut CliContext) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let interactive = atty::is(atty::Stream::Stdin);

    if interactive {
        eprintln!("kdbg-cli interactive mode");
        eprintln!("Type help for commands, quit to exit\n");
    }

    loop {
        if interactive {
            print!("(kdbg) ");
            stdout.flush()?;
        }

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            if interactive {
                eprintln!();
            }
            break;
        }

        match ReplCommand::parse(&input) {
            ReplCommand::Empty => continue,
            ReplCommand::Quit => break,
            command => {
                if let Err(e) = execute_command(ctx, &command).await {
                    eprintln!("Error: {}", e);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lifecycle_commands() {
        assert_eq!(ReplCommand::parse("start"), ReplCommand::Start);
        assert_eq!(ReplCommand::parse("STOP"), ReplCommand::Stop);
        assert_eq!(ReplCommand::parse("restart\n"), ReplCommand::Restart);
    }

    #[test]
    fn parses_quit_aliases() {
        assert_eq!(ReplCommand::parse("quit"), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse("exit"), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse("  q  "), ReplCommand::Quit);
    }

    #[test]
    fn parses_break_with_lines() {
        assert_eq!(
            ReplCommand::parse("break cells/one.py 3 7"),
            ReplCommand::Break {
                cell: PathBuf::from("cells/one.py"),
                lines: vec![3, 7],
            }
        );
    }

    #[test]
    fn rejects_break_without_lines() {
        assert!(matches!(
            ReplCommand::parse("break cells/one.py"),
            ReplCommand::Usage(_)
        ));
        assert!(matches!(
            ReplCommand::parse("b cells/one.py x"),
            ReplCommand::Usage(_)
        ));
    }

    #[test]
    fn parses_stepping_aliases() {
        assert_eq!(ReplCommand::parse("c"), ReplCommand::Continue);
        assert_eq!(ReplCommand::parse("n"), ReplCommand::Next);
        assert_eq!(ReplCommand::parse("s"), ReplCommand::StepIn);
        assert_eq!(ReplCommand::parse("finish"), ReplCommand::StepOut);
    }

    #[test]
    fn eval_keeps_the_whole_expression() {
        assert_eq!(
            ReplCommand::parse("eval  x + len(d) "),
            ReplCommand::Eval("x + len(d)".to_string())
        );
        assert!(matches!(ReplCommand::parse("p"), ReplCommand::Usage(_)));
    }

    #[test]
    fn parses_numeric_arguments() {
        assert_eq!(ReplCommand::parse("frame 2"), ReplCommand::Frame(2));
        assert_eq!(
            ReplCommand::parse("expand 0 20"),
            ReplCommand::Expand {
                scope: 0,
                reference: 20
            }
        );
        assert_eq!(
            ReplCommand::parse("copy x y 1"),
            ReplCommand::CopyToGlobals {
                source: "x".to_string(),
                destination: "y".to_string(),
                frame_id: 1,
            }
        );
        assert!(matches!(
            ReplCommand::parse("frame top"),
            ReplCommand::Usage(_)
        ));
    }

    #[test]
    fn parses_exception_toggle() {
        assert_eq!(
            ReplCommand::parse("exceptions on"),
            ReplCommand::PauseOnExceptions(true)
        );
        assert_eq!(
            ReplCommand::parse("exceptions off"),
            ReplCommand::PauseOnExceptions(false)
        );
        assert!(matches!(
            ReplCommand::parse("exceptions maybe"),
            ReplCommand::Usage(_)
        ));
    }

    #[test]
    fn parses_state_file_commands() {
        assert_eq!(ReplCommand::parse("save"), ReplCommand::Save(None));
        assert_eq!(
            ReplCommand::parse("load /tmp/state.json"),
            ReplCommand::Load(Some(PathBuf::from("/tmp/state.json")))
        );
    }

    #[test]
    fn parses_config_commands() {
        assert_eq!(
            ReplCommand::parse("config"),
            ReplCommand::Config(ConfigAction::Show)
        );
        assert_eq!(
            ReplCommand::parse("config connection.address"),
            ReplCommand::Config(ConfigAction::Get("connection.address".to_string()))
        );
        assert_eq!(
            ReplCommand::parse("config get logging.level"),
            ReplCommand::Config(ConfigAction::Get("logging.level".to_string()))
        );
        assert_eq!(
            ReplCommand::parse("config reload"),
            ReplCommand::Config(ConfigAction::Reload)
        );
        assert_eq!(
            ReplCommand::parse("config reset"),
            ReplCommand::Config(ConfigAction::Reset)
        );
        assert!(matches!(
            ReplCommand::parse("config set connection.address"),
            ReplCommand::Usage(_)
        ));
        assert!(matches!(
            ReplCommand::parse("config get"),
            ReplCommand::Usage(_)
        ));
    }

    #[test]
    fn config_set_values_are_typed_when_possible() {
        assert_eq!(
            ReplCommand::parse("config set connection.request_timeout_secs 5"),
            ReplCommand::Config(ConfigAction::Set {
                key: "connection.request_timeout_secs".to_string(),
                value: serde_json::json!(5),
            })
        );
        assert_eq!(
            ReplCommand::parse("config set state.auto_start false"),
            ReplCommand::Config(ConfigAction::Set {
                key: "state.auto_start".to_string(),
                value: serde_json::json!(false),
            })
        );
        assert_eq!(
            ReplCommand::parse("config set connection.address 10.0.0.2:5678"),
            ReplCommand::Config(ConfigAction::Set {
                key: "connection.address".to_string(),
                value: serde_json::json!("10.0.0.2:5678"),
            })
        );
    }

    #[test]
    fn parses_empty_and_comment_lines() {
        assert_eq!(ReplCommand::parse(""), ReplCommand::Empty);
        assert_eq!(ReplCommand::parse("  \t\n"), ReplCommand::Empty);
        assert_eq!(ReplCommand::parse("# set up"), ReplCommand::Empty);
    }

    #[test]
    fn parses_unknown_command() {
        assert_eq!(
            ReplCommand::parse("launch rockets"),
            ReplCommand::Unknown("launch rockets".to_string())
        );
    }
}
