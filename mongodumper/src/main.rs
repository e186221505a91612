use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use mongodumper::cli::{Cli, Commands};
use mongodumper::process::{CommandRunner, TokioCommandRunner};
use mongodumper::{BackupRunner, Config, Result, ToolConfig, logging, preflight, upload};
use tokio::signal;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.args.verbose);

    let exit_code = match execute(cli).await {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!("Failed at {}: {err}", err.stage());
            err.exit_code()
        }
    };
    std::process::exit(exit_code);
}

async fn execute(cli: Cli) -> Result<()> {
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Check => {
            for tool in preflight(&ToolConfig::from_args(&cli.args))? {
                println!("{}", tool.display());
            }
        }
        Commands::Plan => {
            let config = Config::from_args(&cli.args)?;
            for step in build_runner(config).await.plan(Utc::now()) {
                println!("{step}");
            }
        }
        Commands::Run => {
            let config = Config::from_args(&cli.args)?;
            preflight(&config.tools())?;
            build_runner(config).await.run(shutdown_signal()).await?;
        }
    }
    Ok(())
}

async fn build_runner(config: Config) -> BackupRunner {
    let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner);
    let uploader = upload::from_config(&config.storage, runner.clone()).await;
    BackupRunner::new(config, runner, uploader)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::warn!("Shutdown signal received, aborting backup");
}
