// Allow dead code for items that are part of the public API but only used in tests
#![allow(dead_code)]

mod cancel;
mod cmd;
mod config;
mod dump;
mod error;
mod loader;
mod parser;
mod planner;
mod preflight;
mod progress;
mod spool;
mod target;
mod uploader;

use clap::Parser;
use cmd::Cli;
use error::LoadError;
use target::DbError;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = cmd::run(cli) {
        eprintln!("Error: {e:#}");

        let hint = e
            .downcast_ref::<LoadError>()
            .and_then(LoadError::hint)
            .or_else(|| e.downcast_ref::<DbError>().and_then(DbError::hint));
        if let Some(hint) = hint {
            eprintln!("Hint: {hint}");
        }

        let code = e
            .downcast_ref::<LoadError>()
            .map(LoadError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}
