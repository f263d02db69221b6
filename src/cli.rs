//! CLI argument parsing for the constituent-import-worker binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "constituent-import-worker", about = "Voter-file import worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Analyze a voter file locally and print the suggested mappings as JSON
    Analyze {
        /// Path to the CSV file
        file: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_migrate_command_parses() {
        let cli = Cli::parse_from(["constituent-import-worker", "migrate"]);
        assert!(matches!(cli.command, Some(Command::Migrate)));
    }

    #[test]
    fn test_cli_no_command_defaults_to_none() {
        let cli = Cli::parse_from(["constituent-import-worker"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_serve_command_parses() {
        let cli = Cli::parse_from(["constituent-import-worker", "serve"]);
        assert!(matches!(cli.command, Some(Command::Serve)));
    }

    #[test]
    fn test_cli_analyze_takes_path() {
        let cli = Cli::parse_from(["constituent-import-worker", "analyze", "voters.csv"]);
        match cli.command {
            Some(Command::Analyze { file }) => assert_eq!(file, PathBuf::from("voters.csv")),
            _ => panic!("expected analyze command"),
        }
    }

    #[test]
    fn test_cli_analyze_requires_file() {
        assert!(Cli::try_parse_from(["constituent-import-worker", "analyze"]).is_err());
    }
}
