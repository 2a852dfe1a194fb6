//! Concurrent broadcast isolation.

#[path = "../helpers/mod.rs"]
mod helpers;

use alertrelay::core::{ChannelType, Message, SendOutcome};
use alertrelay::test_utils::SendScript;
use helpers::{scripted_channel, scripted_manager};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_failing_channel_does_not_affect_others() {
    let (manager, plugin) = scripted_manager(ChannelType::Webhook).await;
    let good = scripted_channel(&manager, ChannelType::Webhook, "good").await;
    let bad = scripted_channel(&manager, ChannelType::Webhook, "bad").await;
    let broken = scripted_channel(&manager, ChannelType::Webhook, "broken").await;
    plugin.always_send("bad", SendScript::Fail("HTTP 500".into()));
    plugin.always_send("broken", SendScript::Panic);

    let ids = vec![bad.id.clone(), good.id.clone(), broken.id.clone()];
    let results = manager
        .broadcast_message(&ids, &Message::new("CPU high", "92%"), &CancellationToken::new())
        .await;

    assert_eq!(results.len(), 3);
    for (result, id) in results.iter().zip(&ids) {
        assert_eq!(&result.channel_id, id);
    }
    assert!(!results[0].success);
    assert_eq!(results[0].error.as_deref(), Some("HTTP 500"));
    assert!(results[1].success);
    assert!(!results[2].success);
    assert!(results[2].error.as_deref().unwrap().contains("send task aborted"));
}

#[tokio::test]
async fn test_results_follow_input_order_not_completion_order() {
    let (manager, plugin) = scripted_manager(ChannelType::Slack).await;
    let slow = scripted_channel(&manager, ChannelType::Slack, "slow").await;
    let fast = scripted_channel(&manager, ChannelType::Slack, "fast").await;
    plugin.always_send("slow", SendScript::Delay(Duration::from_millis(300)));

    let ids = vec![slow.id.clone(), fast.id.clone()];
    let started = Instant::now();
    let results = manager
        .broadcast_message(&ids, &Message::new("t", "c"), &CancellationToken::new())
        .await;

    assert_eq!(results[0].channel_id, slow.id);
    assert_eq!(results[1].channel_id, fast.id);
    assert!(results.iter().all(|r| r.success));
    assert!(results[0].latency >= Duration::from_millis(300));
    assert!(results[1].latency < Duration::from_millis(300));
    // Sends run concurrently, so the whole broadcast takes about as long as the slowest.
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_unknown_ids_get_failed_results() {
    let (manager, _plugin) = scripted_manager(ChannelType::Webhook).await;
    let good = scripted_channel(&manager, ChannelType::Webhook, "good").await;

    let ids = vec!["missing".to_string(), good.id.clone()];
    let message = Message::new("t", "c");
    let results = manager
        .broadcast_message(&ids, &message, &CancellationToken::new())
        .await;

    assert_eq!(results[0].channel_id, "missing");
    assert_eq!(results[0].outcome, SendOutcome::Failed);
    assert!(results[0].error.as_deref().unwrap().contains("channel not found"));
    assert_eq!(results[0].message_id.as_deref(), Some(message.id.as_str()));
    assert!(results[1].success);
}

#[tokio::test]
async fn test_cancellation_reaches_every_send() {
    let (manager, plugin) = scripted_manager(ChannelType::Webhook).await;
    let a = scripted_channel(&manager, ChannelType::Webhook, "a").await;
    let b = scripted_channel(&manager, ChannelType::Webhook, "b").await;
    plugin.always_send("a", SendScript::Hang);
    plugin.always_send("b", SendScript::Hang);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let results = manager
        .broadcast_message(&[a.id.clone(), b.id.clone()], &Message::new("t", "c"), &cancel)
        .await;
    assert!(results.iter().all(|r| r.outcome == SendOutcome::Cancelled));

    let stats = manager.channel_stats(ChannelType::Webhook).await.unwrap();
    assert_eq!(stats.stats.messages_failed, 2);
}

#[tokio::test]
async fn test_empty_broadcast() {
    let (manager, _plugin) = scripted_manager(ChannelType::Webhook).await;
    let results = manager
        .broadcast_message(&[], &Message::new("t", "c"), &CancellationToken::new())
        .await;
    assert!(results.is_empty());
}
