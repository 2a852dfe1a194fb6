//! Health probing through the manager.

#[path = "../helpers/mod.rs"]
mod helpers;

use alertrelay::core::{ChannelStatus, ChannelType, ChannelUpdate, HealthState};
use alertrelay::error::DispatchError;
use alertrelay::test_utils::HealthScript;
use helpers::{scripted_channel, scripted_manager};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_failures_accumulate_then_reset() {
    let (manager, plugin) = scripted_manager(ChannelType::DingTalk).await;
    let channel = scripted_channel(&manager, ChannelType::DingTalk, "robot").await;
    let cancel = CancellationToken::new();
    plugin.push_health("robot", HealthScript::Unhealthy("timeout".into()));
    plugin.push_health("robot", HealthScript::Unhealthy("timeout".into()));

    manager.health_check(&channel.id, &cancel).await;
    let status = manager.health_check(&channel.id, &cancel).await;
    assert_eq!(status.status, HealthState::Unhealthy);
    assert_eq!(status.error_count, 2);
    assert!(status.last_error_at.is_some());

    let status = manager.health_check(&channel.id, &cancel).await;
    assert_eq!(status.status, HealthState::Healthy);
    assert_eq!(status.error_count, 0);
    assert_eq!(manager.health_status(&channel.id).unwrap(), status);
}

#[tokio::test]
async fn test_batch_returns_one_status_per_id() {
    let (manager, plugin) = scripted_manager(ChannelType::Webhook).await;
    let up = scripted_channel(&manager, ChannelType::Webhook, "up").await;
    let down = scripted_channel(&manager, ChannelType::Webhook, "down").await;
    let crashing = scripted_channel(&manager, ChannelType::Webhook, "crashing").await;
    plugin.always_health("down", HealthScript::Unhealthy("connection refused".into()));
    plugin.always_health("crashing", HealthScript::Panic);

    let ids = vec![up.id.clone(), down.id.clone(), crashing.id.clone()];
    let statuses = manager.batch_health_check(&ids, &CancellationToken::new()).await;

    assert_eq!(statuses.len(), 3);
    assert_eq!(statuses[&up.id].status, HealthState::Healthy);
    assert_eq!(statuses[&down.id].status, HealthState::Unhealthy);
    assert_eq!(statuses[&crashing.id].status, HealthState::Unknown);
    assert_eq!(manager.health_statuses().len(), 3);
}

#[tokio::test]
async fn test_fleet_check_skips_inactive_channels() {
    let (manager, plugin) = scripted_manager(ChannelType::Webhook).await;
    let active = scripted_channel(&manager, ChannelType::Webhook, "active").await;
    let paused = scripted_channel(&manager, ChannelType::Webhook, "paused").await;
    manager
        .update_channel(
            &paused.id,
            ChannelUpdate {
                status: Some(ChannelStatus::Inactive),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let statuses = manager.check_all_channels(&CancellationToken::new()).await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert!(statuses.contains_key(&active.id));
    assert_eq!(plugin.health_count("paused"), 0);
}

#[tokio::test]
async fn test_monitor_start_stop_contract() {
    let (manager, _plugin) = scripted_manager(ChannelType::Webhook).await;
    let parent = CancellationToken::new();

    assert!(matches!(
        manager.stop_health_monitor().await,
        Err(DispatchError::MonitorNotRunning)
    ));

    manager.start_health_monitor(Duration::from_secs(30), &parent).unwrap();
    assert!(manager.health_monitor_running());
    assert!(matches!(
        manager.start_health_monitor(Duration::from_secs(30), &parent),
        Err(DispatchError::MonitorAlreadyRunning)
    ));

    manager.stop_health_monitor().await.unwrap();
    assert!(!manager.health_monitor_running());
    assert!(matches!(
        manager.stop_health_monitor().await,
        Err(DispatchError::MonitorNotRunning)
    ));
}

#[tokio::test]
async fn test_monitor_probes_periodically() {
    let (manager, plugin) = scripted_manager(ChannelType::Webhook).await;
    let channel = scripted_channel(&manager, ChannelType::Webhook, "watched").await;
    let parent = CancellationToken::new();

    manager.start_health_monitor(Duration::from_millis(50), &parent).unwrap();
    tokio::time::sleep(Duration::from_millis(280)).await;
    assert!(plugin.health_count("watched") >= 3);
    assert!(manager.health_status(&channel.id).unwrap().is_healthy());

    // Cancelling the parent ends the loop; a later stop still reaps it.
    parent.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!manager.health_monitor_running());
    manager.stop_health_monitor().await.unwrap();
}
