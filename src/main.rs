use clap::{Parser, Subcommand};
use std::io::IsTerminal;

mod commands;

use commands::{run, test, GlobalArgs};
use deckhand::output;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "deckhand")]
#[command(version = VERSION)]
#[command(about = "Build, test and deploy a service to staging or production hosts")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// GET /ping on every host
    Ping,
    /// Build, install, upload and restart on every host
    Deploy,
    /// Stop the service
    Stop,
    /// Start the service
    Start,
    /// Stop then start the service
    Restart,
    /// Show service status
    Status,
    /// Fix ownership and group-write on the install directory
    Permissions,
    /// Create install and log directories
    Mkdirs,
    /// Install the service descriptor
    Upstart,
    /// Remove the install directory and service descriptor
    Uninstall,
    /// Write build metadata and cross-compile the binary
    Build,
    /// Run tests (or vet) per target
    Test(test::TestArgs),
    /// Run tests with a coverage profile per target
    TestCoverage(test::TargetArgs),
    /// Run tests and benchmarks per target
    TestBench(test::TargetArgs),
    /// Run task specs in order, e.g. `deckhand run production deploy`
    Run(run::RunArgs),
    /// List available task specs
    Tasks,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    deckhand::test_runner::set_banner_color(std::io::stderr().is_terminal());

    let (json_result, exit_code) = commands::run_json(cli.command, &cli.global);

    if let Err(err) = output::print_json_result(json_result) {
        eprintln!("[deckhand] {}", err);
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(output::exit_code_to_u8(exit_code))
}
