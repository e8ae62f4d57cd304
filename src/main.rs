//! mqtt-session demo client
//!
//! Connects to the configured broker, subscribes the configured topics,
//! publishes a demo message after every (re)connect and logs what it
//! receives until interrupted.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use mqtt_session::config::AppConfig;
use mqtt_session::observability::{init_logging, LogSettings};
use mqtt_session::session::{
    ConnectionState, InboundMessage, OutboundMessage, SessionHandler, SessionManager,
};
use mqtt_session::transport::mqtt::RumqttcTransport;
use mqtt_session::transport::DisconnectReason;
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, warn, Level};

/// MQTT client session demo
#[derive(Parser)]
#[command(name = "mqtt-session")]
#[command(about = "Long-lived MQTT client session with automatic reconnection")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and run until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

/// Publishes the demo message on connect and logs inbound traffic
struct DemoHandler {
    message: Option<OutboundMessage>,
}

#[async_trait]
impl SessionHandler for DemoHandler {
    async fn on_connected(&self, session: &SessionManager) {
        info!(client_id = %session.config().client_id(), "MQTT client connected");

        let Some(message) = &self.message else {
            return;
        };
        match session.publish(message.clone()).await {
            Ok(()) => info!(topic = %message.topic, qos = %message.qos, "demo message published"),
            Err(e) => warn!(topic = %message.topic, error = %e.sanitized(), "demo message not published"),
        }
    }

    async fn on_message(&self, message: InboundMessage) {
        info!(
            topic = %message.topic,
            payload = %message.payload_str(),
            qos = %message.qos,
            retain = message.retain,
            "received application message"
        );
    }

    async fn on_disconnected(&self, reason: &DisconnectReason) {
        warn!(%reason, "disconnected from broker");
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut settings = LogSettings::from_env();
    match cli.verbose {
        0 => {}
        1 => settings.level = Level::DEBUG,
        _ => settings.level = Level::TRACE,
    }
    init_logging(settings);

    info!("Starting mqtt-session v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_session(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<AppConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(AppConfig::load_from_file(path)?);
    }

    for path_str in ["mqtt-session.toml", "config/mqtt-session.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(AppConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create mqtt-session.toml".into())
}

async fn run_session(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let connection = config.connection_config()?;
    info!(
        client_id = %connection.client_id(),
        broker = %connection.broker_address(),
        authenticated = connection.has_credentials(),
        "Starting session"
    );

    let session = SessionManager::builder(connection, RumqttcTransport::new())
        .handler(DemoHandler {
            message: config.demo_message(),
        })
        .options(config.session_options())
        .build();

    for topic in &config.session.topics {
        session.subscribe(topic).await?;
    }

    if let Err(e) = session.connect().await {
        error!(error = %e.sanitized(), "Initial connection failed");
        session.stop().await;
        return Err(e.into());
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut state_rx = session.state_receiver();

    info!("Session is running; press Ctrl-C to stop");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = state_rx.wait_for(|state| *state == ConnectionState::Disconnected) => {
            error!("Reconnection attempts exhausted, shutting down...");
        }
    }

    session.stop().await;

    let metrics = serde_json::to_string(&session.metrics())?;
    info!(metrics = %metrics, "Session metrics");
    Ok(())
}

fn handle_config_command(config: &AppConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
