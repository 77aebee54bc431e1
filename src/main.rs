mod cli;
mod commands;
mod format;
mod output;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use std::io;
use std::process::ExitCode;

use cli::{Cli, Command};

/// Exit codes shared with scripting callers.
pub mod exit_codes {
    /// No changes were needed
    pub const SUCCESS: u8 = 0;
    /// Fatal input or validation error
    pub const ERROR: u8 = 1;
    /// Changes were computed and applied
    pub const CONFIG_APPLIED: u8 = 2;
    /// Changes were computed but not applied (dry run)
    pub const CONFIG_NOT_APPLIED: u8 = 3;
}

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    let result: Result<u8> = match cli.command {
        Command::Apply(args) => commands::apply::run(&ctx, args),
        Command::Diff(args) => commands::apply::run(&ctx, args.into_apply()),
        Command::Dump(args) => commands::dump::run(&ctx, args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "tangosync", &mut io::stdout());
            Ok(exit_codes::SUCCESS)
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red());
            ExitCode::from(exit_codes::ERROR)
        }
    }
}
