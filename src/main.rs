//! peerdrop - send files and folders to a listening peer over TCP
//!
//! `peerdrop serve` receives into a local directory; `peerdrop send ADDR PATH`
//! streams a file or folder to a peer. With no subcommand it serves with
//! defaults.

use anyhow::{Context, Result};
use clap::Parser;
use peerdrop::cli::{Cli, Command, SendOpts, ServeOpts};
use peerdrop::logger::{ConsoleLogger, FanoutLogger, Logger, TextLogger};
use peerdrop::progress::SendProgress;
use peerdrop::{Connector, Listener};
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    peerdrop::logging::init_logging(cli.verbose)?;

    let file_logger: Option<Arc<dyn Logger>> = match &cli.log_file {
        Some(path) => Some(Arc::new(TextLogger::new(path).with_context(|| {
            format!("Failed to open log file: {}", path.display())
        })?)),
        None => None,
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeOpts::default()));

    rt.block_on(async move {
        tokio::select! {
            res = run(command, file_logger) => res,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
                // 128 + SIGINT
                std::process::exit(130);
            }
        }
    })
}

async fn run(command: Command, file_logger: Option<Arc<dyn Logger>>) -> Result<ExitCode> {
    match command {
        Command::Serve(opts) => {
            let logger = with_file_log(Arc::new(ConsoleLogger), &file_logger);
            serve(opts, logger).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Send(opts) => send(opts, file_logger).await,
    }
}

fn with_file_log(primary: Arc<dyn Logger>, file: &Option<Arc<dyn Logger>>) -> Arc<dyn Logger> {
    match file {
        Some(f) => Arc::new(FanoutLogger::new(vec![primary, Arc::clone(f)])),
        None => primary,
    }
}

async fn start_listener(opts: &ServeOpts, logger: Arc<dyn Logger>) -> Result<Listener> {
    let listener = Listener::bind(opts.listener_config(), logger)
        .await
        .with_context(|| format!("Failed to start listener on {}", opts.bind))?;
    eprintln!(
        "Listening on {} root={}",
        listener.local_addr()?,
        listener.output_root().display()
    );
    Ok(listener)
}

async fn serve(opts: ServeOpts, logger: Arc<dyn Logger>) -> Result<()> {
    let listener = start_listener(&opts, logger).await?;
    listener.serve().await.context("Listener stopped")
}

async fn send(opts: SendOpts, file_logger: Option<Arc<dyn Logger>>) -> Result<ExitCode> {
    let listener_task = if opts.serve {
        let logger = with_file_log(Arc::new(ConsoleLogger), &file_logger);
        let listener = start_listener(&opts.listener, logger).await?;
        Some(tokio::spawn(listener.serve()))
    } else {
        None
    };

    let primary: Arc<dyn Logger> = if opts.progress {
        Arc::new(SendProgress::new())
    } else {
        Arc::new(ConsoleLogger)
    };
    let connector = Connector::new(
        opts.connector_config(),
        with_file_log(primary, &file_logger),
    );

    eprintln!("Sending: {} -> {}", opts.path.display(), connector.peer());
    // Failures were already reported through the connector's logger
    let sent = connector.send(&opts.path).await.is_ok();

    match listener_task {
        // Keep serving whatever happened to the send
        Some(task) => {
            task.await
                .context("Listener task failed")?
                .context("Listener stopped")?;
            Ok(ExitCode::SUCCESS)
        }
        None if sent => Ok(ExitCode::SUCCESS),
        None => Ok(ExitCode::FAILURE),
    }
}
