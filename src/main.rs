use clap::Parser;
use std::process;
use tidydesk::cli::{Cli, run_cli};
use tidydesk::output::OutputFormatter;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run_cli(cli) {
        OutputFormatter::error(&format!("Error: {}", e));
        process::exit(1);
    }
}
