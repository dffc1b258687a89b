//! courier CLI
//!
//! Composition root for the dispatch engine: loads `courier.toml`, installs
//! logging, owns the broker pools, and runs one command.

mod commands;
mod config;
mod telemetry;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use courier_crypto::SecretVault;
use tracing::{error, info, warn};

use crate::config::CourierConfig;

/// courier: deliver one event to HTTP, Slack, email, AMQP or MQTT.
#[derive(Parser, Debug)]
#[command(name = "courier", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "COURIER_CONFIG", default_value = "courier.toml", global = true)]
    config: PathBuf,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt a secret with the master key. Reads plaintext from stdin.
    Encrypt,
    /// Decrypt a vault envelope. Reads the envelope from stdin.
    Decrypt,
    /// Verify that the master key is present and well-formed.
    CheckKey,
    /// Run one action and print its result.
    Dispatch(commands::dispatch::DispatchArgs),
    /// Issue one HTTP request with retries and print the captured exchange.
    Request(commands::request::RequestArgs),
    /// Send outcome notifications for a user.
    Notify(commands::notify::NotifyArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, found) = CourierConfig::load(&cli.config)?;
    config.apply_smtp_env(|key| std::env::var(key).ok())?;
    telemetry::init(&config.logging, cli.log_level.as_deref());
    if !found {
        info!(path = %cli.config.display(), "config file not found, using defaults");
    }

    let vault = SecretVault::from_env(&config.vault.master_key_env);
    if let Some(reason) = vault.configuration_error() {
        if config.is_production() {
            error!(env = %config.vault.master_key_env, %reason, "master key unavailable; credentials cannot be decrypted");
        } else {
            warn!(env = %config.vault.master_key_env, %reason, "master key unavailable");
        }
    }

    match cli.command {
        Command::Encrypt => commands::vault::encrypt(&vault),
        Command::Decrypt => commands::vault::decrypt(&vault),
        Command::CheckKey => commands::vault::check_key(&vault, &config.vault.master_key_env),
        Command::Dispatch(args) => commands::dispatch::run(&config, vault, &args).await,
        Command::Request(args) => commands::request::run(&config, &args).await,
        Command::Notify(args) => commands::notify::run(&config, &args).await,
    }
}
