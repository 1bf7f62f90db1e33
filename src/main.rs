use std::panic;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use bottleneck_runner::cli::{self, Args};
use bottleneck_runner::core::runner::BoundedTaskRunner;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    set_panic_hook();

    let args = Args::parse();
    tracing::debug!("Arguments: {:?}", args);

    let config = match args.run_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(ExitCode::from(3));
        }
    };

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let runner = if args.progress {
        let (runner, events) = BoundedTaskRunner::with_event_channel();
        tokio::spawn(cli::log_progress(events, config.items));
        runner
    } else {
        BoundedTaskRunner::new()
    };

    let result = match runner.run(config, &cancel).await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(ExitCode::from(3));
        }
    };

    cli::print_result(&result);
    Ok(cli::exit_code(&result))
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl-C received, stopping dispatch");
                cancel.cancel();
            }
            Err(e) => tracing::error!("Cannot listen for Ctrl-C: {}", e),
        }
    });
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
