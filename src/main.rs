mod cli;
mod execute;

use std::process::ExitCode;
use clap::Parser;
use colored::Colorize;
use kindly::Context;
use crate::cli::CLI;

fn main() -> ExitCode {
    let cli = CLI::parse();
    let ctx = Context::background();
    match execute::execute(cli, &ctx) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
