use actuator::{ActionScript, Engines, Interpreter, RunOptions};
use actuator_worker::cancellation::cancel_on_ctrl_c;
use actuator_worker::config::{Cli, Command, RunArgs, ServeArgs};
use actuator_worker::utils::init_logging;
use actuator_worker::{Dispatcher, HttpTaskQueue, WorkerConfig};
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // .env values become defaults for the ACTUATOR_* flags
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_dir.as_deref())?;

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Run(args) => run_script(args).await,
    }
}

fn interpreter_for(config: &WorkerConfig) -> Interpreter {
    Interpreter::new(
        Engines::local(config.python.clone()),
        config.interpreter_settings(),
    )
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = Arc::new(WorkerConfig::from_serve_args(args)?);
    info!("Starting actuator worker '{}'", config.worker_name);

    let queue = HttpTaskQueue::new(
        config.endpoint.clone(),
        config.token.clone(),
        config.worker_name.clone(),
    )?;
    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    let dispatcher = Dispatcher::new(
        Arc::new(queue),
        Arc::new(interpreter_for(&config)),
        config.clone(),
    )
    .with_shutdown(shutdown);
    dispatcher.run().await;
    Ok(())
}

async fn run_script(args: RunArgs) -> Result<()> {
    let config = WorkerConfig::from_run_args(&args);
    let script = ActionScript::from_file(&args.script)
        .with_context(|| format!("Failed to load script {}", args.script.display()))?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let options = RunOptions::new(cancel).with_dry_run(config.dry_run);
    let result = interpreter_for(&config).run(&script, &options).await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
