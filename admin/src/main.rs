//! Maintenance commands for the step-count leaderboard.

#![warn(clippy::all, clippy::pedantic)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{LevelFilter, info};
use std::fs;
use std::path::PathBuf;
use stepboard_common::{
    DEFAULT_DATA_DIR, DEFAULT_LOCK_TIMEOUT_MS, Entry, Leaderboard, MergeReport, ScalarKey,
    StoreConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the leaderboard files
    #[arg(long, default_value = DEFAULT_DATA_DIR, env = "STEPBOARD_DATA_DIR")]
    data_dir: PathBuf,

    /// How long to wait for a busy leaderboard before giving up (milliseconds)
    #[arg(long, default_value_t = DEFAULT_LOCK_TIMEOUT_MS, env = "STEPBOARD_LOCK_TIMEOUT_MS")]
    lock_timeout_ms: u64,

    /// Suppress all output except errors
    #[arg(short, long, env = "STEPBOARD_QUIET")]
    quiet: bool,

    /// Show additional output
    #[arg(short, long, env = "STEPBOARD_VERBOSE")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recompute the leaderboard and its total from the stored inputs
    Merge,
    /// Print the leaderboard and progress values
    Show {
        /// Print as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print one progress value
    Get {
        #[arg(value_enum)]
        key: ScalarKey,
    },
    /// Set one progress value
    Set {
        #[arg(value_enum)]
        key: ScalarKey,
        value: f64,
    },
    /// Replace the submission set with a CSV file, then merge
    ImportSubmission { file: PathBuf },
    /// Append a manual entry CSV file to the ledger, then merge
    ImportManual { file: PathBuf },
}

impl Cli {
    fn store_config(&self) -> StoreConfig {
        StoreConfig {
            data_dir: self.data_dir.clone(),
            lock_timeout_ms: self.lock_timeout_ms,
        }
    }

    fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else if self.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }
}

fn format_table(entries: &[Entry]) -> String {
    let width = entries
        .iter()
        .map(|e| e.name.chars().count())
        .max()
        .unwrap_or(0)
        .max(4);
    let mut out = format!("{:>4}  {:<width$}  {:>12}  {:>12}\n", "#", "Name", "Total", "Avg Daily");
    for (rank, entry) in entries.iter().enumerate() {
        out.push_str(&format!(
            "{:>4}  {:<width$}  {:>12}  {:>12.1}\n",
            rank + 1,
            entry.name,
            entry.total_steps,
            entry.avg_daily_steps
        ));
    }
    out
}

fn print_report(report: &MergeReport) {
    if report.merged {
        println!(
            "Accepted {} rows. Leaderboard has {} participants and {} steps.",
            report.rows_received, report.participants, report.total_steps
        );
    } else {
        println!(
            "Accepted {} rows. No manual entries yet, so the leaderboard was not merged.",
            report.rows_received
        );
    }
}

fn run(cli: &Cli) -> Result<()> {
    let board = Leaderboard::open(&cli.store_config())
        .with_context(|| format!("Could not open data directory {}", cli.data_dir.display()))?;

    match &cli.command {
        Command::Merge => match board.merge().context("Merge failed")? {
            Some(merged) => println!(
                "Merged {} participants, {} steps.",
                merged.len(),
                merged.total_steps()
            ),
            None => println!("No manual entries yet, nothing to merge."),
        },
        Command::Show { json } => {
            let table = board.table()?.unwrap_or_default();
            let scalars = board.scalars().snapshot();
            if *json {
                let out = serde_json::json!({ "leaderboard": table, "progress": scalars });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                print!("{}", format_table(&table));
                println!();
                println!("Total steps:   {}", scalars.aggregate_total_steps);
                println!("Step goal:     {}", scalars.step_goal);
                println!("Goal:          {}", scalars.goal);
                println!("Current value: {}", scalars.current_value);
            }
        }
        Command::Get { key } => println!("{}", board.scalars().get(*key)),
        Command::Set { key, value } => {
            board
                .scalars()
                .set(*key, *value)
                .with_context(|| format!("Could not set {key}"))?;
            info!("{key} is now {value}");
        }
        Command::ImportSubmission { file } => {
            let text = fs::read_to_string(file)
                .with_context(|| format!("Could not read {}", file.display()))?;
            print_report(&board.upload_submission(&text)?);
        }
        Command::ImportManual { file } => {
            let text = fs::read_to_string(file)
                .with_context(|| format!("Could not read {}", file.display()))?;
            print_report(&board.append_manual_csv(&text)?);
        }
    }
    Ok(())
}

fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Set up logger
    env_logger::Builder::from_default_env()
        .filter_level(cli.log_level())
        .init();

    if cli.verbose {
        println!("CLI Inputs: {cli:?}");
    }

    if let Err(e) = run(&cli) {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli(dir: &TempDir, args: &[&str]) -> Cli {
        let data_dir = dir.path().display().to_string();
        let mut argv = vec!["stepboard_admin", "--data-dir", data_dir.as_str()];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_set_then_get_through_cli() {
        let dir = TempDir::new().unwrap();
        run(&cli(&dir, &["set", "goal", "2500"])).unwrap();
        let board = Leaderboard::open(&StoreConfig::new(dir.path())).unwrap();
        assert_eq!(board.scalars().get(ScalarKey::Goal), 2_500.0);
    }

    #[test]
    fn test_setting_total_is_refused() {
        let dir = TempDir::new().unwrap();
        assert!(run(&cli(&dir, &["set", "aggregate-total-steps", "5"])).is_err());
    }

    #[test]
    fn test_imports_and_merge() {
        let dir = TempDir::new().unwrap();
        let upload = dir.path().join("upload.csv");
        let manual = dir.path().join("entries.csv");
        fs::write(&upload, "Name,Total Steps,Avg Daily Steps\nA,100,10\nB,200,20\n").unwrap();
        fs::write(&manual, "name,steps\nA,50\n").unwrap();

        run(&cli(&dir, &["import-submission", upload.to_str().unwrap()])).unwrap();
        run(&cli(&dir, &["import-manual", manual.to_str().unwrap()])).unwrap();
        run(&cli(&dir, &["merge"])).unwrap();

        let board = Leaderboard::open(&StoreConfig::new(dir.path())).unwrap();
        assert_eq!(board.total_steps(), 350);
    }

    #[test]
    fn test_format_table_ranks_rows() {
        let table = format_table(&[Entry::new("Ada", 150, 15.0), Entry::new("Bo", 9, 1.0)]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].trim_start().starts_with("1  Ada"));
        assert!(lines[2].trim_start().starts_with("2  Bo"));
    }
}
