//! Edge Adapter - Main Entry Point
//!
//! The only place the process exits on a terminal error.

use clap::{Parser, Subcommand};
use edge_adapter::adapter::{Adapter, AdapterOptions, ConnectionStatus, MessageHandler};
use edge_adapter::config::AdapterArgs;
use edge_adapter::error::AdapterError;
use edge_adapter::observability::init_from_level_str;
use edge_adapter::platform::topics::join_topic;
use edge_adapter::platform::{Message, PlatformError, RemotePlatform};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Edge adapter connecting a device to the platform
#[derive(Parser)]
#[command(name = "edge-adapter")]
#[command(about = "Connectivity lifecycle manager for platform edge adapters")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    args: AdapterArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the adapter (default)
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_from_level_str(&cli.args.log_level);

    info!("Starting edge adapter v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_adapter(cli.args).await,
        Commands::Config { show } => handle_config_command(&cli.args, show),
    };

    if let Err(e) = result {
        report_fatal(&e);
        process::exit(1);
    }

    info!("Adapter shutdown complete");
}

/// Log a terminal error with its remediation hint
fn report_fatal(e: &AdapterError) {
    error!(severity = "fatal", "{}", e.detailed());
    if let Some(hint) = e.remediation() {
        error!(severity = "fatal", "{}", hint);
    }
}

async fn run_adapter(args: AdapterArgs) -> Result<(), AdapterError> {
    let store = args.credential_store()?;
    if let Some(edge) = &args.edge_name {
        info!("Running on edge {}", edge);
    }

    let adapter = Adapter::initialize(
        Arc::new(RemotePlatform::new()),
        store,
        AdapterOptions::from_args(&args),
    )
    .await?;
    let mut terminal_errors = adapter.terminal_errors();

    let topic_root = adapter.config().topic_root.clone();
    let command_topic = join_topic(&topic_root, "command/#");
    let status_topic = join_topic(&topic_root, "status");

    adapter.connect(&command_topic, logging_handler()).await?;

    match adapter
        .connection()
        .publish_status(&status_topic, &ConnectionStatus::running())
        .await
    {
        Ok(token) => {
            if let Err(e) = token.wait().await {
                warn!("Status delivery not confirmed: {}", e);
            }
        }
        Err(e) => warn!("Could not publish running status: {}", e),
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .map_err(|e| AdapterError::Platform(PlatformError::Other(e.to_string())))?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .map_err(|e| AdapterError::Platform(PlatformError::Other(e.to_string())))?;

    info!("Adapter is running and listening on {}", command_topic);

    let terminal = tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
            None
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
            None
        }
        err = next_terminal_error(&mut terminal_errors) => err,
    };

    // Best effort: the broker may already be gone
    let final_status = match &terminal {
        Some(e) => ConnectionStatus::error(&e.to_string()),
        None => ConnectionStatus::stopped(),
    };
    let _ = adapter
        .connection()
        .publish_status(&status_topic, &final_status)
        .await;

    match terminal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn next_terminal_error(
    rx: &mut Option<tokio::sync::mpsc::UnboundedReceiver<AdapterError>>,
) -> Option<AdapterError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn logging_handler() -> MessageHandler {
    Arc::new(|message: Message| {
        info!(
            "Message received on topic {} with payload {}",
            message.topic,
            message.payload_lossy()
        );
    })
}

fn handle_config_command(args: &AdapterArgs, show: bool) -> Result<(), AdapterError> {
    args.validate()?;

    if show {
        println!("Current adapter configuration:");
        match toml::to_string_pretty(&args.redacted()) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => warn!("Could not render configuration: {}", e),
        }
    }

    info!("Configuration validation complete");
    Ok(())
}
