//! CLI entry point for p2p-courier.
//!
//! Provides key generation, configuration management, and an interactive
//! `connect` command that chats with one peer over an encrypted channel.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use p2p_courier::{
    crypto::SharedKey,
    utils::{CourierConfig, DEFAULT_CONFIG_FILE},
    App, AppEvent,
};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

/// p2p-courier - encrypted peer-to-peer messages and files
#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Encrypted peer-to-peer text and file exchange over a WebRTC data channel")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a fresh shared key
    Keygen,
    /// Generate and validate configuration files
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
    /// Connect to the peer and start an interactive session
    Connect {
        /// Signaling relay URL
        #[arg(long)]
        url: Option<String>,
        /// Relay username
        #[arg(short, long)]
        username: Option<String>,
        /// Relay password
        #[arg(short, long)]
        password: Option<String>,
        /// Shared key (base64)
        #[arg(short, long)]
        key: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Generate a default configuration file
    Generate {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Include a freshly generated shared key
        #[arg(long)]
        with_key: bool,
    },
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        file: Option<PathBuf>,
    },
    /// Show current configuration
    Show,
}

/// One line typed by the user
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Text(&'a str),
    File(&'a str),
    Quit,
    Empty,
}

fn parse_input(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        Input::Empty
    } else if trimmed == "/quit" {
        Input::Quit
    } else if let Some(path) = trimmed.strip_prefix("/file ") {
        Input::File(path.trim())
    } else {
        Input::Text(line.trim_end_matches(['\r', '\n']))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = CourierConfig::load(cli.config.as_deref())?;

    // Initialize logging
    setup_logging(cli.verbose, cli.quiet, &config.logging.level)?;

    match cli.command {
        Commands::Keygen => handle_keygen_command(),
        Commands::Config { action } => handle_config_commands(action, &config),
        Commands::Connect {
            url,
            username,
            password,
            key,
        } => {
            let mut config = config;
            if let Some(url) = url {
                config.signaling.url = url;
            }
            if let Some(username) = username {
                config.signaling.username = username;
            }
            if let Some(password) = password {
                config.signaling.password = password;
            }
            if let Some(key) = key {
                config.crypto.shared_key = Some(key);
            }
            handle_connect_command(config).await
        }
    }
}

fn setup_logging(verbose: u8, quiet: bool, configured: &str) -> Result<()> {
    let log_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => configured,
            1 => "debug",
            _ => "trace",
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    Ok(())
}

fn handle_keygen_command() -> Result<()> {
    let key = SharedKey::generate();
    println!("{}", key.to_base64());
    eprintln!("Fingerprint: {}", key.fingerprint());
    eprintln!("Share this key with your peer out of band; set it as crypto.shared_key.");
    Ok(())
}

fn handle_config_commands(action: ConfigCommands, config: &CourierConfig) -> Result<()> {
    match action {
        ConfigCommands::Generate { output, with_key } => {
            let mut default_config = CourierConfig::default();
            if with_key {
                default_config.crypto.shared_key = Some(SharedKey::generate().to_base64());
            }
            let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

            default_config.save(&output_path)?;
            println!("✓ Configuration generated: {}", output_path.display());
        }
        ConfigCommands::Validate { file } => {
            let config_to_validate = if let Some(path) = file {
                CourierConfig::from_file(path)?
            } else {
                config.clone()
            };

            config_to_validate.validate()?;
            println!("✓ Configuration is valid");
        }
        ConfigCommands::Show => {
            let mut shown = config.clone();
            if !shown.signaling.password.is_empty() {
                shown.signaling.password = "********".to_string();
            }
            if let Some(key) = &shown.crypto.shared_key {
                let fingerprint = SharedKey::from_base64(key)
                    .map(|k| k.fingerprint())
                    .unwrap_or_else(|_| "invalid".to_string());
                shown.crypto.shared_key = Some(format!("<redacted, fingerprint {}>", fingerprint));
            }
            println!("{}", shown.to_toml_string()?);
        }
    }
    Ok(())
}

async fn handle_connect_command(config: CourierConfig) -> Result<()> {
    config.validate()?;
    config.ensure_directories()?;

    let mut app = App::new(config).await.context("failed to set up the session")?;

    tokio::select! {
        result = app.connect() => result.context("failed to connect to the peer")?,
        _ = signal::ctrl_c() => {
            info!("Interrupted while connecting");
            return app.shutdown().await.map_err(Into::into);
        }
    }

    println!("Connected. Type a message, /file <path> to send a file, /quit to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Input::Empty => {}
                    Input::Quit => break,
                    Input::File(path) => {
                        if let Err(e) = app.send_file(path).await {
                            error!("Could not send {}: {}", path, e);
                        }
                    }
                    Input::Text(text) => {
                        if let Err(e) = app.send_message(text).await {
                            error!("Could not send message: {}", e);
                            if e.is_fatal() {
                                break;
                            }
                        }
                    }
                }
            }
            event = app.next_event() => match event {
                Some(AppEvent::Connected { session_id }) => info!("Session {} open", session_id),
                Some(AppEvent::MessageReceived { text }) => println!("peer> {}", text),
                Some(AppEvent::FileReceived { name, path, size }) => {
                    println!("peer sent {} ({} bytes), saved to {}", name, size, path.display());
                }
                Some(AppEvent::Error { error }) => warn!("Dropped inbound frame: {}", error),
                Some(AppEvent::Disconnected { state }) => {
                    println!("Session ended ({})", state);
                    break;
                }
                None => break,
            },
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down gracefully...");
    app.shutdown().await?;
    Ok(())
}
