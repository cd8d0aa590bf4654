//! CLI argument parsing using clap.
//!
//! Defines the command-line interface for kdbg-cli.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// kdbg - Headless debugger for notebook kernels
#[derive(Parser, Debug, Clone)]
#[command(name = "kdbg-cli")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Debug endpoint as host:port (overrides settings)
    #[arg(short = 'a', long, env = "KDBG_ADDRESS")]
    pub address: Option<String>,

    /// Kernel name used as the engine identifier (overrides settings)
    #[arg(short = 'k', long)]
    pub kernel: Option<String>,

    /// Document path the kernel belongs to (overrides settings)
    #[arg(long)]
    pub path: Option<String>,

    /// Settings file (default: ~/.kdbg/settings.toml)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Execute a single debugger command and exit
    #[arg(short = 'e', long, conflicts_with = "file")]
    pub execute: Option<String>,

    /// Execute debugger commands from a file (one per line) and exit
    #[arg(short = 'f', long, conflicts_with = "execute")]
    pub file: Option<PathBuf>,

    /// Per-command deadline in seconds (overrides settings)
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// Do not start the debugger on connect
    #[arg(long)]
    pub no_start: bool,

    /// Output events and results as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Show verbose output (debug information)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Args {
    /// Command deadline: the flag wins over the settings value.
    pub fn request_timeout(&self, settings_secs: u64) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(settings_secs).max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default_values() {
        let args = Args::parse_from(["kdbg-cli"]);
        assert!(args.kernel.is_none());
        assert!(args.execute.is_none());
        assert!(!args.no_start);
        assert!(!args.json);
        assert!(!args.verbose);
    }

    #[test]
    fn test_args_execute_flag() {
        let args = Args::parse_from(["kdbg-cli", "-e", "eval 1 + 1"]);
        assert_eq!(args.execute, Some("eval 1 + 1".to_string()));
    }

    #[test]
    fn test_args_execute_conflicts_with_file() {
        let result = Args::try_parse_from(["kdbg-cli", "-e", "vars", "-f", "cmds.txt"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_args_connection_overrides() {
        let args = Args::parse_from([
            "kdbg-cli",
            "--address",
            "127.0.0.1:9000",
            "-k",
            "xpython",
            "--path",
            "analysis.ipynb",
        ]);
        assert_eq!(args.address.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(args.kernel.as_deref(), Some("xpython"));
        assert_eq!(args.path.as_deref(), Some("analysis.ipynb"));
    }

    #[test]
    fn test_request_timeout_precedence() {
        let args = Args::parse_from(["kdbg-cli"]);
        assert_eq!(args.request_timeout(30), Duration::from_secs(30));

        let args = Args::parse_from(["kdbg-cli", "--timeout", "5"]);
        assert_eq!(args.request_timeout(30), Duration::from_secs(5));

        let args = Args::parse_from(["kdbg-cli", "--timeout", "0"]);
        assert_eq!(args.request_timeout(30), Duration::from_secs(1));
    }
}
