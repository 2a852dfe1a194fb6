//! Channel and plugin lifecycle through the manager with the built-in
//! transports.

#[path = "../helpers/mod.rs"]
mod helpers;

use alertrelay::core::{ChannelFilter, ChannelStatus, ChannelType, ChannelUpdate, Message, NewChannel};
use alertrelay::error::DispatchError;
use alertrelay::test_utils::ScriptedTransport;
use helpers::{builtin_manager, config, create, scripted_manager};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_create_rejects_invalid_settings() {
    let manager = builtin_manager().await;

    let missing = manager
        .create_channel(NewChannel::new("no-url", ChannelType::Webhook, config(json!({}))))
        .await
        .unwrap_err();
    assert!(matches!(missing, DispatchError::Config { ref field, .. } if field == "url"));

    let wrong_type = manager
        .create_channel(NewChannel::new(
            "bad-retry",
            ChannelType::Webhook,
            config(json!({ "url": "https://example.test/hook", "retry_count": "three" })),
        ))
        .await
        .unwrap_err();
    assert!(matches!(wrong_type, DispatchError::Config { ref field, .. } if field == "retry_count"));

    let bad_scheme = manager
        .create_channel(NewChannel::new(
            "ftp",
            ChannelType::Webhook,
            config(json!({ "url": "ftp://example.test/hook" })),
        ))
        .await
        .unwrap_err();
    assert!(matches!(bad_scheme, DispatchError::Config { .. }));

    assert!(manager.list_channels(&ChannelFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_names_are_unique() {
    let manager = builtin_manager().await;
    let settings = json!({ "url": "https://example.test/hook" });
    let first = create(&manager, "ops", ChannelType::Webhook, settings.clone()).await;
    let second = create(&manager, "dev", ChannelType::Webhook, settings.clone()).await;

    let err = manager
        .create_channel(NewChannel::new("ops", ChannelType::Webhook, config(settings)))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::DuplicateName(ref name) if name == "ops"));

    let err = manager
        .update_channel(
            &second.id,
            ChannelUpdate {
                name: Some("ops".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::DuplicateName(_)));
    assert_eq!(manager.get_channel(&first.id).await.unwrap().name, "ops");
}

#[tokio::test]
async fn test_update_bumps_version_and_validates() {
    let manager = builtin_manager().await;
    let channel = create(
        &manager,
        "ops",
        ChannelType::Webhook,
        json!({ "url": "https://example.test/hook" }),
    )
    .await;
    assert_eq!(channel.version, 1);

    let updated = manager
        .update_channel(
            &channel.id,
            ChannelUpdate {
                description: Some("primary pager".into()),
                priority: Some(10),
                config: Some(config(json!({ "url": "https://example.test/v2" }))),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.priority, 10);
    assert_eq!(updated.config.settings["url"], "https://example.test/v2");
    assert!(updated.updated_at >= channel.updated_at);

    let err = manager
        .update_channel(
            &channel.id,
            ChannelUpdate {
                config: Some(config(json!({ "method": "POST" }))),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Config { .. }));
    assert_eq!(manager.get_channel(&channel.id).await.unwrap().version, 2);
}

#[tokio::test]
async fn test_list_filters() {
    let manager = builtin_manager().await;
    let hook = json!({ "url": "https://example.test/hook" });
    let slack = json!({ "webhook_url": "https://hooks.slack.test/services/T/B/X" });

    let mut prod = NewChannel::new("prod-hook", ChannelType::Webhook, config(hook.clone()));
    prod.tags = BTreeSet::from(["prod".to_string()]);
    prod.priority = 5;
    manager.create_channel(prod).await.unwrap();
    create(&manager, "staging-hook", ChannelType::Webhook, hook).await;
    let mut muted = NewChannel::new("muted-slack", ChannelType::Slack, config(slack));
    muted.status = ChannelStatus::Inactive;
    manager.create_channel(muted).await.unwrap();

    let names = |channels: Vec<alertrelay::core::Channel>| -> Vec<String> {
        channels.into_iter().map(|c| c.name).collect()
    };

    let all = manager.list_channels(&ChannelFilter::default()).await.unwrap();
    assert_eq!(names(all), vec!["prod-hook", "muted-slack", "staging-hook"]);

    let webhooks = manager
        .list_channels(&ChannelFilter {
            channel_type: Some(ChannelType::Webhook),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(webhooks.len(), 2);

    let tagged = manager
        .list_channels(&ChannelFilter {
            tag: Some("prod".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(names(tagged), vec!["prod-hook"]);

    let inactive = manager
        .list_channels(&ChannelFilter {
            status: Some(ChannelStatus::Inactive),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(names(inactive), vec!["muted-slack"]);
}

#[tokio::test]
async fn test_delete_updates_inventory_and_counters() {
    let manager = builtin_manager().await;
    let hook = json!({ "url": "https://example.test/hook" });
    let keep = create(&manager, "keep", ChannelType::Webhook, hook.clone()).await;
    let drop = create(&manager, "drop", ChannelType::Webhook, hook).await;

    manager.delete_channel(&drop.id).await.unwrap();
    assert!(manager.get_channel(&drop.id).await.unwrap_err().is_not_found());
    assert!(manager.delete_channel(&drop.id).await.unwrap_err().is_not_found());
    assert!(manager.get_channel(&keep.id).await.is_ok());

    let stats = manager.channel_stats(ChannelType::Webhook).await.unwrap();
    assert_eq!(stats.stats.channels_created, 2);
    assert_eq!(stats.stats.channels_deleted, 1);
    assert_eq!(stats.channels_total, 1);

    let fleet = manager.global_stats().await.unwrap();
    assert_eq!(fleet.channels_total, 1);
    assert_eq!(fleet.stats.channels_created, 2);
}

#[tokio::test]
async fn test_plugin_catalogue() {
    let manager = builtin_manager().await;

    let types: Vec<_> = manager.list_plugins().into_iter().map(|p| p.channel_type).collect();
    for channel_type in ChannelType::ALL {
        assert!(types.contains(&channel_type), "missing {}", channel_type);
    }

    let schema = manager.plugin_schema(ChannelType::DingTalk).unwrap();
    assert_eq!(schema["required"], json!(["webhook_url"]));
    assert!(manager
        .validate_config(ChannelType::Slack, &config(json!({})).settings)
        .is_err());

    let err = manager
        .register_plugin(Arc::new(ScriptedTransport::new(ChannelType::Webhook)))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::PluginAlreadyRegistered(ChannelType::Webhook)));
}

#[tokio::test]
async fn test_unregistered_plugin_blocks_dispatch() {
    let (manager, plugin) = scripted_manager(ChannelType::Slack).await;
    let channel = helpers::scripted_channel(&manager, ChannelType::Slack, "room").await;

    manager.unregister_plugin(ChannelType::Slack).await.unwrap();
    assert!(!plugin.is_started());
    assert!(manager.get_plugin(ChannelType::Slack).err().unwrap().is_not_found());

    let err = manager
        .send_message(&channel.id, &Message::new("t", "c"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::PluginNotFound(ChannelType::Slack)));

    let results = manager
        .broadcast_message(&[channel.id.clone()], &Message::new("t", "c"), &CancellationToken::new())
        .await;
    assert!(!results[0].success);
    assert_eq!(results[0].channel_id, channel.id);
}

#[tokio::test]
async fn test_end_to_end_delivery_and_stats() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let manager = builtin_manager().await;
    let channel = create(
        &manager,
        "e2e",
        ChannelType::Webhook,
        json!({ "url": server.uri(), "retry_count": 0 }),
    )
    .await;
    let cancel = CancellationToken::new();

    for title in ["first", "second"] {
        let result = manager
            .send_message(&channel.id, &Message::new(title, "body"), &cancel)
            .await
            .unwrap();
        assert!(result.success, "{:?}", result.error);
    }

    let stats = manager.channel_stats(ChannelType::Webhook).await.unwrap();
    assert_eq!(stats.stats.messages_sent, 2);
    assert_eq!(stats.stats.messages_failed, 0);
    assert_eq!(stats.stats.success_rate, 100.0);
    assert_eq!(stats.stats.latency_samples, 2);
    server.verify().await;

    manager.shutdown().await;
    assert!(manager.list_plugins().is_empty());
}
