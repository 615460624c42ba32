use clap::Parser;
use stratvault::cli::{Cli, run};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
