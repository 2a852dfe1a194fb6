//! Layered configuration loading and channel seeding.

#[path = "../helpers/mod.rs"]
mod helpers;

use alertrelay::app::{resolve_channel, AppBuilder};
use alertrelay::cli::Cli;
use alertrelay::config::Config;
use alertrelay::core::{ChannelFilter, ChannelType};
use clap::Parser;
use serial_test::serial;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Runs `test_fn` with a temporary config file holding `toml_content`.
fn with_config_file<F>(toml_content: &str, test_fn: F)
where
    F: FnOnce(PathBuf),
{
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", toml_content).unwrap();
    test_fn(file.path().to_path_buf());
}

const FULL_CONFIG: &str = r#"
    log_level = "debug"

    [dispatch]
    plugin_start_timeout_seconds = 10
    user_agent = "relay-test/1.0"
    connect_timeout_seconds = 3

    [health]
    enabled = false
    interval_seconds = 15
    probe_timeout_seconds = 4

    [metrics]
    latency_window = 50
    prometheus_listen = "127.0.0.1:9187"

    [[channels]]
    name = "ops-webhook"
    type = "webhook"
    priority = 5
    tags = ["prod"]
    [channels.config.settings]
    url = "https://example.test/hook"
    retry_count = 1

    [[channels]]
    name = "ops-slack"
    type = "slack"
    status = "inactive"
    [channels.config.settings]
    webhook_url = "https://hooks.slack.test/services/T/B/X"
"#;

#[test]
#[serial]
fn test_load_full_config() {
    with_config_file(FULL_CONFIG, |path| {
        let config = Config::load_from_path(&path).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.plugin_start_timeout(), Duration::from_secs(10));
        assert_eq!(config.dispatch.user_agent, "relay-test/1.0");
        assert!(!config.health.enabled);
        assert_eq!(config.health_interval(), Duration::from_secs(15));
        assert_eq!(config.probe_timeout(), Duration::from_secs(4));
        assert_eq!(config.metrics.latency_window, 50);
        assert_eq!(config.metrics.prometheus_listen, Some("127.0.0.1:9187".parse().unwrap()));

        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[0].channel_type, ChannelType::Webhook);
        assert_eq!(config.channels[0].priority, 5);
        assert_eq!(config.channels[0].config.settings["retry_count"], 1);

        let options = config.plugin_options();
        assert_eq!(options["user_agent"], "relay-test/1.0");
        assert_eq!(options["connect_timeout"], 3);
    });
}

#[test]
#[serial]
fn test_partial_config_uses_defaults() {
    with_config_file("[health]\ninterval_seconds = 20\n", |path| {
        let config = Config::load_from_path(&path).unwrap();
        let defaults = Config::default();

        assert_eq!(config.health.interval_seconds, 20);
        assert_eq!(config.health.probe_timeout_seconds, defaults.health.probe_timeout_seconds);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.dispatch, defaults.dispatch);
        assert!(config.channels.is_empty());
    });
}

#[test]
#[serial]
fn test_missing_file_yields_defaults() {
    let config = Config::load_from_path("/nonexistent/alertrelay.toml").unwrap();
    assert_eq!(config, Config::default());
}

#[test]
#[serial]
fn test_invalid_value_is_rejected() {
    with_config_file("[health]\ninterval_seconds = \"soon\"\n", |path| {
        assert!(Config::load_from_path(&path).is_err());
    });
}

#[test]
#[serial]
fn test_env_overrides_file() {
    with_config_file(FULL_CONFIG, |path| {
        std::env::set_var("ALERTRELAY_LOG_LEVEL", "warn");
        std::env::set_var("ALERTRELAY_HEALTH__INTERVAL_SECONDS", "45");
        let result = Config::load_from_path(&path);
        std::env::remove_var("ALERTRELAY_LOG_LEVEL");
        std::env::remove_var("ALERTRELAY_HEALTH__INTERVAL_SECONDS");

        let config = result.unwrap();
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.health.interval_seconds, 45);
        assert_eq!(config.health.probe_timeout_seconds, 4);
    });
}

#[test]
#[serial]
fn test_cli_overrides_env_and_file() {
    with_config_file(FULL_CONFIG, |path| {
        std::env::set_var("ALERTRELAY_HEALTH__INTERVAL_SECONDS", "45");
        let cli = Cli::try_parse_from([
            "alertrelay",
            "--config",
            path.to_str().unwrap(),
            "--health-interval",
            "90",
            "--log-level",
            "trace",
            "serve",
        ])
        .unwrap();
        let result = Config::load(&cli);
        std::env::remove_var("ALERTRELAY_HEALTH__INTERVAL_SECONDS");

        let config = result.unwrap();
        assert_eq!(config.health.interval_seconds, 90);
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.metrics.latency_window, 50);
    });
}

#[tokio::test]
#[serial]
async fn test_configured_channels_are_seeded() {
    helpers::init_tracing();
    let mut config = Config::default();
    with_config_file(FULL_CONFIG, |path| {
        config = Config::load_from_path(&path).unwrap();
    });

    let manager = AppBuilder::new(config).build().await.unwrap();
    assert_eq!(manager.list_plugins().len(), ChannelType::ALL.len());

    let channels = manager.list_channels(&ChannelFilter::default()).await.unwrap();
    let names: Vec<_> = channels.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["ops-webhook", "ops-slack"]);

    let slack = resolve_channel(&manager, "ops-slack").await.unwrap();
    assert_eq!(slack.channel_type, ChannelType::Slack);
    assert!(!slack.can_send());
    assert!(resolve_channel(&manager, "nope").await.unwrap_err().is_not_found());
    manager.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_invalid_seed_channel_fails_startup() {
    let toml_content = r#"
        [[channels]]
        name = "broken"
        type = "dingtalk"
        [channels.config.settings]
        secret = "SEC"
    "#;
    let mut config = Config::default();
    with_config_file(toml_content, |path| {
        config = Config::load_from_path(&path).unwrap();
    });

    let err = AppBuilder::new(config).build().await.unwrap_err();
    let chain = format!("{:#}", err);
    assert!(chain.contains("invalid channel `broken`"), "{}", chain);
    assert!(chain.contains("webhook_url"), "{}", chain);
}
