//! iot2 - command line client for the iot-2 platform
//!
//! Monitors device traffic as an application and browses the device registry.

use clap::{Parser, Subcommand};
use iot2_sdk::api::{ApiClient, Devices, Registry};
use iot2_sdk::client::{ApplicationClient, ANY};
use iot2_sdk::config::ApplicationConfig;
use iot2_sdk::observability::init_default_logging;
use iot2_sdk::protocol::{InboundMessage, Status};
use iot2_sdk::transport::QoS;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Command line client for the iot-2 platform
#[derive(Parser)]
#[command(name = "iot2")]
#[command(about = "Monitor devices and browse the iot-2 device registry")]
#[command(version)]
struct Cli {
    /// Application configuration file (TOML); WIOTP_* variables are used without one
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log device events, status and errors until interrupted
    Monitor {
        /// Device type to watch
        #[arg(long = "type", default_value = ANY)]
        type_id: String,
        /// Device id to watch
        #[arg(long = "device", default_value = ANY)]
        device_id: String,
        /// Event id to watch
        #[arg(long = "event", default_value = ANY)]
        event_id: String,
    },
    /// List devices registered in the organization
    Devices {
        /// Only list devices of this type
        #[arg(long = "type")]
        type_id: Option<String>,
        /// Stop after this many devices
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Validate the configuration
    Config {
        /// Print the configuration with secrets redacted
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_default_logging(None);
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    init_default_logging(Some(config.log_level()));

    let result = match cli.command {
        Commands::Monitor {
            type_id,
            device_id,
            event_id,
        } => run_monitor(config, &type_id, &device_id, &event_id).await,
        Commands::Devices { type_id, limit } => list_devices(config, type_id, limit).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(path: Option<&Path>) -> Result<ApplicationConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(ApplicationConfig::load_from_file(path)?),
        None => {
            let default_path = Path::new("application.toml");
            if default_path.exists() {
                Ok(ApplicationConfig::load_from_file(default_path)?)
            } else {
                Ok(ApplicationConfig::from_env()?)
            }
        }
    }
}

async fn run_monitor(
    config: ApplicationConfig,
    type_id: &str,
    device_id: &str,
    event_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = ApplicationClient::new(config)?;
    let (tx, mut rx) = mpsc::channel(256);
    client.set_message_sender(tx);
    client.connect().await?;

    client
        .subscribe_to_device_events(type_id, device_id, event_id, ANY, QoS::AtMostOnce)
        .await?;
    client.subscribe_to_device_status(type_id, device_id).await?;
    client.subscribe_to_device_errors(type_id, device_id).await?;

    info!(client_id = %client.client_id(), "Monitoring, press Ctrl-C to stop");

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut last_status: HashMap<String, Status> = HashMap::new();

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
            message = rx.recv() => match message {
                Some(message) => log_message(message, &mut last_status),
                None => {
                    warn!("Message dispatcher stopped");
                    break;
                }
            }
        }
    }

    let connected = last_status
        .values()
        .filter(|status| status.is_connect())
        .count();
    info!(
        devices = last_status.len(),
        connected, "Monitor stopped"
    );
    client.disconnect().await?;
    Ok(())
}

fn log_message(message: InboundMessage, last_status: &mut HashMap<String, Status>) {
    match message {
        InboundMessage::Event(event) => {
            info!(device = %event.device(), event = %event.event_id, format = %event.format, data = ?event.data, "Event");
        }
        InboundMessage::Status(status) => {
            info!(device = %status.device(), action = ?status.action, client_addr = ?status.client_addr, "Status");
            last_status.insert(status.device(), status);
        }
        InboundMessage::Error(err) => {
            let payload = String::from_utf8_lossy(&err.payload).into_owned();
            warn!(source = %err.source(), payload = %payload, "Error");
        }
        other => info!(kind = ?other.kind(), "Message"),
    }
}

async fn list_devices(
    config: ApplicationConfig,
    type_id: Option<String>,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let api = ApiClient::new(&config)?;
    let devices = match type_id {
        Some(type_id) => Devices::for_type(api, type_id),
        None => Registry::new(api).devices(),
    };

    let mut listed = 0;
    let mut iter = devices.iter();
    while limit.map_or(true, |limit| listed < limit) {
        let Some(device) = iter.next().await else {
            break;
        };
        println!("{}", device?);
        listed += 1;
    }

    info!(devices = listed, requests = iter.requests(), "Listing complete");
    Ok(())
}

fn handle_config_command(
    mut config: ApplicationConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    if show {
        if let Some(auth) = config.auth.as_mut() {
            if auth.token.is_some() {
                auth.token = Some("***".to_string());
            }
        }
        println!("Client id: {}", config.client_id());
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
