//! Command-line surface of `splitctl`, the experiment admin tool.
//!
//! Parsing and command execution live here so they can run against any
//! [`KeyValueStore`]; `main.rs` only wires in the Redis connection.

use std::io::Write;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::*;

use crate::error::{Result, SplitError};
use crate::experiment::Experiment;
use crate::stats::ExperimentReport;
use crate::store::KeyValueStore;

/// Binary name used in help text and generated completion scripts.
pub const COMMAND_NAME: &str = "splitctl";

#[derive(Debug, Parser)]
#[command(name = "splitctl")]
#[command(version)]
#[command(about = "Inspect and administer split-testing experiments")]
pub struct Args {
    /// Redis connection URL
    #[arg(
        long,
        env = "SPLITKIT_REDIS_URL",
        default_value = "redis://127.0.0.1/",
        global = true
    )]
    pub redis_url: String,

    /// Emit JSON instead of a table
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Log engine decisions to stderr (repeat for more detail)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, PartialEq)]
pub enum Command {
    /// List every saved experiment with its totals
    List,
    /// Show per-alternative counts and significance for one experiment
    Show { experiment: String },
    /// Force every visitor onto one alternative
    Winner {
        experiment: String,
        alternative: String,
    },
    /// Remove a forced winner
    ClearWinner { experiment: String },
    /// Zero all counters and start a new version
    Reset { experiment: String },
    /// Remove the experiment and its counters
    Delete { experiment: String },
    /// Print a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Args {
    /// Log filter directive implied by `-v` flags; `RUST_LOG` still wins.
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "splitkit=info",
            2 => "splitkit=debug",
            _ => "trace",
        }
    }
}

/// Write a completion script for `shell`.
pub fn render_completions(shell: Shell, writer: &mut impl Write) {
    let mut command = Args::command();
    clap_complete::generate(shell, &mut command, COMMAND_NAME, writer);
}

/// Execute a store-backed command and return what should be printed.
pub fn run(command: &Command, store: Arc<dyn KeyValueStore>, json: bool) -> Result<String> {
    match command {
        Command::List => {
            let mut reports = Vec::new();
            for exp in Experiment::all(store)? {
                reports.push(ExperimentReport::build(&exp)?);
            }
            if json {
                to_json(&reports)
            } else {
                Ok(render_list(&reports))
            }
        }
        Command::Show { experiment } => {
            let report = ExperimentReport::build(&require(store, experiment)?)?;
            if json {
                to_json(&report)
            } else {
                Ok(render_report(&report))
            }
        }
        Command::Winner {
            experiment,
            alternative,
        } => {
            require(store, experiment)?.set_winner(alternative)?;
            Ok(format!("{experiment}: winner set to {}", alternative.green()))
        }
        Command::ClearWinner { experiment } => {
            require(store, experiment)?.reset_winner()?;
            Ok(format!("{experiment}: winner cleared"))
        }
        Command::Reset { experiment } => {
            let version = require(store, experiment)?.reset()?;
            Ok(format!("{experiment}: reset, now at version {version}"))
        }
        Command::Delete { experiment } => {
            require(store, experiment)?.delete()?;
            Ok(format!("{experiment}: {}", "deleted".red()))
        }
        Command::Completions { shell } => {
            let mut buf = Vec::new();
            render_completions(*shell, &mut buf);
            Ok(String::from_utf8_lossy(&buf).into_owned())
        }
    }
}

fn require(store: Arc<dyn KeyValueStore>, name: &str) -> Result<Experiment> {
    Experiment::find(store, name)?
        .ok_or_else(|| SplitError::InvalidDefinition(format!("no experiment named '{name}'")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| SplitError::corrupt("json", e.to_string()))
}

// ---------------------------------------------------------------------------
// Table rendering
// ---------------------------------------------------------------------------

pub fn render_list(reports: &[ExperimentReport]) -> String {
    if reports.is_empty() {
        return "no experiments".dimmed().to_string();
    }
    let mut out = format!(
        "{:<24} {:>8} {:>14} {:>10}  {}\n",
        "experiment", "version", "participants", "completed", "winner"
    );
    for r in reports {
        out.push_str(&format!(
            "{:<24} {:>8} {:>14} {:>10}  {}\n",
            r.name.bold(),
            r.version,
            r.total_participants(),
            r.total_completed(),
            r.winner.as_deref().unwrap_or("-"),
        ));
    }
    out
}

pub fn render_report(report: &ExperimentReport) -> String {
    let mut out = format!("{} (version {})\n", report.name.bold(), report.version);
    if let Some(started) = report.start_time_ms {
        out.push_str(&format!("started: {started} ms since epoch\n"));
    }
    if let Some(winner) = &report.winner {
        out.push_str(&format!("winner: {}\n", winner.green().bold()));
    }
    out.push_str(&format!(
        "{:<20} {:>12} {:>10} {:>8} {:>8}  {}\n",
        "alternative", "participants", "completed", "rate", "z", "confidence"
    ));
    for alt in &report.alternatives {
        let name = if alt.is_control {
            format!("{} (control)", alt.name)
        } else {
            alt.name.clone()
        };
        let z = alt
            .z_score
            .map(|z| format!("{z:.2}"))
            .unwrap_or_else(|| "-".to_string());
        let confidence = if alt.z_score.map(|z| z.abs() >= 1.96).unwrap_or(false) {
            alt.confidence.green().to_string()
        } else {
            alt.confidence.normal().to_string()
        };
        out.push_str(&format!(
            "{:<20} {:>12} {:>10} {:>7.2}% {:>8}  {}\n",
            name,
            alt.participants,
            alt.completed,
            alt.conversion_rate * 100.0,
            z,
            confidence,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn seeded() -> Arc<dyn KeyValueStore> {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let exp = Experiment::find_or_create(store.clone(), "link_color", ["blue", "red"]).unwrap();
        let alts = exp.alternatives();
        for _ in 0..4 {
            alts[0].increment_participation().unwrap();
        }
        alts[0].increment_completion().unwrap();
        store
    }

    #[test]
    fn test_args_parse_defaults() {
        let args = Args::parse_from(["splitctl", "list"]);
        assert_eq!(args.command, Command::List);
        assert!(!args.json);
        assert_eq!(args.log_directive(), "warn");
    }

    #[test]
    fn test_args_parse_global_flags_after_subcommand() {
        let args = Args::parse_from([
            "splitctl",
            "show",
            "link_color",
            "--json",
            "--redis-url",
            "redis://cache:6379/2",
            "-vv",
        ]);
        assert_eq!(
            args.command,
            Command::Show {
                experiment: "link_color".into()
            }
        );
        assert!(args.json);
        assert_eq!(args.redis_url, "redis://cache:6379/2");
        assert_eq!(args.log_directive(), "splitkit=debug");
    }

    #[test]
    fn test_args_parse_winner() {
        let args = Args::parse_from(["splitctl", "winner", "link_color", "red"]);
        assert_eq!(
            args.command,
            Command::Winner {
                experiment: "link_color".into(),
                alternative: "red".into()
            }
        );
    }

    #[test]
    fn test_args_reject_missing_subcommand() {
        assert!(Args::try_parse_from(["splitctl"]).is_err());
    }

    #[test]
    fn test_run_list_json() {
        let out = run(&Command::List, seeded(), true).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["name"], "link_color");
        assert_eq!(parsed[0]["alternatives"][0]["participants"], 4);
    }

    #[test]
    fn test_run_show_table_mentions_control() {
        let out = run(
            &Command::Show {
                experiment: "link_color".into(),
            },
            seeded(),
            false,
        )
        .unwrap();
        assert!(out.contains("blue (control)"));
        assert!(out.contains("25.00%"));
    }

    #[test]
    fn test_run_unknown_experiment_errors() {
        let err = run(
            &Command::Reset {
                experiment: "ghost".into(),
            },
            seeded(),
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_run_winner_then_clear() {
        let store = seeded();
        run(
            &Command::Winner {
                experiment: "link_color".into(),
                alternative: "red".into(),
            },
            store.clone(),
            false,
        )
        .unwrap();
        let exp = Experiment::find(store.clone(), "link_color").unwrap().unwrap();
        assert_eq!(exp.winner().unwrap().as_deref(), Some("red"));
        run(
            &Command::ClearWinner {
                experiment: "link_color".into(),
            },
            store,
            false,
        )
        .unwrap();
        assert_eq!(exp.winner().unwrap(), None);
    }

    #[test]
    fn test_run_winner_unknown_alternative() {
        let err = run(
            &Command::Winner {
                experiment: "link_color".into(),
                alternative: "purple".into(),
            },
            seeded(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, SplitError::UnknownWinner { .. }));
    }

    #[test]
    fn test_run_delete_removes_from_list() {
        let store = seeded();
        run(
            &Command::Delete {
                experiment: "link_color".into(),
            },
            store.clone(),
            false,
        )
        .unwrap();
        assert!(Experiment::all(store).unwrap().is_empty());
    }

    #[test]
    fn test_completions_mention_binary() {
        let out = run(
            &Command::Completions { shell: Shell::Bash },
            Arc::new(MemoryStore::new()),
            false,
        )
        .unwrap();
        assert!(out.contains(COMMAND_NAME));
    }
}
