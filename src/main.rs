mod cli;
mod commands;
mod config;
mod paths;
mod progress;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Option<PathBuf>,
    pub yes: bool,
}

fn main() -> Result<()> {
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
        config: cli.config,
        yes: cli.yes,
    };
    log::trace!("verbosity {}", ctx.verbose);

    match cli.command {
        Command::Compile(args) => commands::change::compile(&ctx, args),
        Command::Update(args) => commands::change::update(&ctx, args),
        Command::Delete(args) => commands::change::delete(&ctx, args),
        Command::Reserve(args) => commands::change::reserve(&ctx, args),
        Command::Enable { device } => commands::change::enable(&ctx, &device),
        Command::Apply(args) => commands::fleet::run(&ctx, args),
        Command::Get { device } => commands::inspect::get(&ctx, &device),
        Command::Compare(args) => commands::inspect::compare(&ctx, args),
        Command::Recover(cmd) => commands::recover::run(&ctx, cmd),
        Command::State { device } => commands::inspect::state(&ctx, &device),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "fabricctl", &mut io::stdout());
            Ok(())
        }
    }
}
