// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::FailurePolicy;

/// Command-line arguments for `rundag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "rundag",
    version,
    about = "Run a DAG of parallel task stages and exit with its outcome.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the DAG description (TOML).
    #[arg(long, value_name = "PATH", default_value = "Rundag.toml")]
    pub dag: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the DAG, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Append every state transition to this file as JSON lines.
    #[arg(long, value_name = "PATH")]
    pub history: Option<String>,

    /// Rebuild the latest unfinished DAG from a history file written by an
    /// earlier run and continue it instead of starting over.
    #[arg(long, value_name = "PATH")]
    pub recover: Option<String>,

    /// Override `[dag].failure_policy` (fail_fast or fail_slow).
    #[arg(long, value_name = "POLICY")]
    pub failure_policy: Option<FailurePolicy>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_flags() {
        let args = CliArgs::try_parse_from([
            "rundag",
            "--dag",
            "jobs/wc.toml",
            "--log-level",
            "debug",
            "--history",
            "wc.history",
            "--recover",
            "old.history",
            "--failure-policy",
            "fail-slow",
        ])
        .unwrap();
        assert_eq!(args.dag, "jobs/wc.toml");
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert_eq!(args.history.as_deref(), Some("wc.history"));
        assert_eq!(args.recover.as_deref(), Some("old.history"));
        assert_eq!(args.failure_policy, Some(FailurePolicy::FailSlow));
        assert!(!args.dry_run);
    }

    #[test]
    fn defaults_to_rundag_toml() {
        let args = CliArgs::try_parse_from(["rundag", "--dry-run"]).unwrap();
        assert_eq!(args.dag, "Rundag.toml");
        assert!(args.dry_run);
        assert!(args.failure_policy.is_none());
    }
}
