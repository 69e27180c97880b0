//! llmux CLI Binary
//!
//! Runs a console user and one agent on a shared chat until input ends, an
//! agent asks the system to exit, or Ctrl-C.

use anyhow::Context;
use clap::Parser;
use llmux::logging::init_logging;
use llmux::tooling::{render_default_config, Cli, CliContext};
use std::process;
use std::time::Duration;
use tracing::info;

fn main() {
    let cli = Cli::parse();

    if cli.print_config {
        match render_default_config() {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting runtime: {}", e);
            process::exit(1);
        }
    };

    let result = runtime.block_on(run(cli));
    // The console reader may still be parked on stdin.
    runtime.shutdown_timeout(Duration::from_millis(200));

    match result {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<String> {
    let context = CliContext::new(&cli).context("loading configuration")?;
    init_logging(Some(&context.config().logging)).context("initializing logging")?;
    let system = context.build_system(&cli).context("building system")?;

    let token = system.shutdown_token();
    let interrupt = system.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => interrupt.request_shutdown(),
            _ = token.cancelled() => {}
        }
    });

    let stats = system.run().await;
    info!(
        dispatched = stats.dispatched,
        completed = stats.completed,
        failed = stats.failed,
        cancelled = stats.cancelled,
        "Event loop finished"
    );
    Ok(system.exit())
}
