use std::process::ExitCode;

use clap::Parser;
use jitbridge_cli::cli::CLI;
use jitbridge_cli::demo::{print_report, run_counter_exercise};
use jitbridge_cli::initializers::{init_bridge, init_tracing};
use tracing::{error, info};

fn main() -> ExitCode {
    let CLI { opts } = CLI::parse();

    init_tracing(&opts);

    let bridge = match init_bridge(&opts) {
        Ok(bridge) => bridge,
        Err(err) => {
            error!("Failed to initialize compiler bridge: {err}");
            return ExitCode::FAILURE;
        }
    };

    let totals = run_counter_exercise(&bridge, opts.threads, opts.increments, opts.resize);

    let mut stdout = std::io::stdout().lock();
    if let Err(err) = print_report(&mut stdout, &bridge, &totals, opts.print_events) {
        error!("Failed to write report: {err}");
        return ExitCode::FAILURE;
    }

    bridge.shutdown();
    info!("Compiler bridge stopped");
    ExitCode::SUCCESS
}
