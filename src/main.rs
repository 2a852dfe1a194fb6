//! AlertRelay - multi-channel alert dispatch
//!
//! Delivers notifications through webhooks, chat-bot webhooks, Slack and
//! email, with per-channel health monitoring.

use alertrelay::{
    app::{resolve_channel, serve, AppBuilder},
    cli::{Cli, Command},
    config::Config,
    core::{Channel, Settings},
    manager::ChannelManager,
    telemetry,
    transports::builtin_plugins,
};
use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli).unwrap_or_else(|err| {
        eprintln!("Failed to load configuration: {}", err);
        std::process::exit(1);
    });

    init_tracing(&config.log_level, cli.json_logs);

    match cli.command {
        Command::Serve => run_serve(config).await,
        Command::Plugins { schemas } => {
            let plugins: Vec<_> = builtin_plugins()
                .iter()
                .map(|p| {
                    let mut info = p.info();
                    if !schemas {
                        info.config_schema = serde_json::Value::Null;
                    }
                    info
                })
                .collect();
            print_json(&plugins)
        }
        Command::Validate { channel_type, file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let settings: Settings = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON object", file.display()))?;
            let plugin = builtin_plugins()
                .into_iter()
                .find(|p| p.channel_type() == channel_type)
                .context("no built-in plugin for this channel type")?;
            plugin.validate_config(&settings)?;
            println!("{}: settings are valid for `{}`", file.display(), channel_type);
            Ok(())
        }
        command => {
            let manager = AppBuilder::new(config).build().await?;
            let cancel = CancellationToken::new();
            let result = run_once(&manager, command, &cancel).await;
            manager.shutdown().await;
            result
        }
    }
}

fn init_tracing(default_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_serve(config: Config) -> Result<()> {
    info!("AlertRelay starting up...");
    if let Some(addr) = config.metrics.prometheus_listen {
        telemetry::install_prometheus(addr)?;
    }
    info!(
        health_enabled = config.health.enabled,
        health_interval_seconds = config.health.interval_seconds,
        channels = config.channels.len(),
        "Configuration loaded"
    );

    let manager = AppBuilder::new(config.clone()).build().await?;
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
        signal.cancel();
    });

    serve(manager, &config, shutdown).await?;
    info!("All tasks shut down. Exiting.");
    Ok(())
}

async fn resolve_all(manager: &ChannelManager, keys: &[String]) -> Result<Vec<Channel>> {
    let mut channels = Vec::with_capacity(keys.len());
    for key in keys {
        channels.push(resolve_channel(manager, key).await?);
    }
    Ok(channels)
}

async fn run_once(manager: &ChannelManager, command: Command, cancel: &CancellationToken) -> Result<()> {
    match command {
        Command::Send { channel, message } => {
            let channel = resolve_channel(manager, &channel).await?;
            let result = manager.send_message(&channel.id, &message.to_message(), cancel).await?;
            print_json(&result)
        }
        Command::Broadcast { channels, message } => {
            let ids: Vec<String> = resolve_all(manager, &channels).await?.into_iter().map(|c| c.id).collect();
            let results = manager.broadcast_message(&ids, &message.to_message(), cancel).await;
            print_json(&results)
        }
        Command::Test { channel } => {
            let channel = resolve_channel(manager, &channel).await?;
            print_json(&manager.test_channel(&channel.id, cancel).await?)
        }
        Command::Health { channels } => {
            let statuses = if channels.is_empty() {
                manager.check_all_channels(cancel).await?
            } else {
                let ids: Vec<String> = resolve_all(manager, &channels).await?.into_iter().map(|c| c.id).collect();
                manager.batch_health_check(&ids, cancel).await
            };
            print_json(&statuses)
        }
        other => anyhow::bail!("{:?} does not run against channels", other),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
