// src/cli.rs
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ValidatedConfig;
use crate::error::ConfigError;

/// Daily keyword-driven news digest.
#[derive(Debug, Parser)]
#[command(name = "daily-news-digest", version)]
pub struct Cli {
    /// TOML config file (defaults to config/digest.toml when present).
    #[arg(long, global = true, env = "DIGEST_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the scheduler until interrupted (default).
    Run,
    /// Resolve keywords and run the pipeline once, right now.
    Once,
    /// Resolve and print the keyword snapshot without running the pipeline.
    DryRun,
    /// Print the schedule and persisted run statistics.
    Status,
    /// Fetch the keyword source once and report what it returned.
    CheckSource,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Run)
    }
}

impl Command {
    /// Config this command needs beyond what validation already checked.
    /// Only the commands that summarize need the API key.
    pub fn check_config(self, cfg: &ValidatedConfig) -> Result<(), ConfigError> {
        if matches!(self, Command::Run | Command::Once) {
            cfg.require_summarizer_key()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::parse_from(["daily-news-digest"]);
        assert_eq!(cli.command(), Command::Run);
    }

    #[test]
    fn parses_kebab_case_subcommands() {
        let cli = Cli::parse_from(["daily-news-digest", "--config", "x.toml", "check-source"]);
        assert_eq!(cli.command(), Command::CheckSource);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        let cli = Cli::parse_from(["daily-news-digest", "dry-run"]);
        assert_eq!(cli.command(), Command::DryRun);
    }

    #[test]
    fn summarizing_commands_require_the_api_key() {
        let mut cfg = AppConfig::default();
        cfg.summarizer.api_key = None;
        let v = cfg.validate().unwrap();

        for cmd in [Command::Run, Command::Once] {
            assert!(matches!(
                cmd.check_config(&v),
                Err(ConfigError::Missing(_))
            ));
        }
        for cmd in [Command::DryRun, Command::Status, Command::CheckSource] {
            assert!(cmd.check_config(&v).is_ok());
        }
    }
}
