//! Webhook delivery against a live mock endpoint.

#[path = "../helpers/mod.rs"]
mod helpers;

use alertrelay::core::{ChannelType, HealthState, Message, MessagePriority, SendOutcome};
use alertrelay::transports::signing::sign_body;
use helpers::{builtin_manager, create};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_retries_are_exhausted_on_persistent_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let manager = builtin_manager().await;
    let channel = create(
        &manager,
        "flaky",
        ChannelType::Webhook,
        json!({ "url": format!("{}/hook", server.uri()), "retry_count": 2, "retry_interval": 1 }),
    )
    .await;

    let result = manager
        .send_message(&channel.id, &Message::new("CPU high", "92%"), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.outcome, SendOutcome::Failed);
    assert_eq!(result.retry_count, 2);
    assert_eq!(result.metadata["status_code"], json!(500));
    server.verify().await;

    let stats = manager.channel_stats(ChannelType::Webhook).await.unwrap();
    assert_eq!(stats.stats.messages_failed, 1);
}

#[tokio::test]
async fn test_recovers_after_one_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let manager = builtin_manager().await;
    let channel = create(
        &manager,
        "ops-hook",
        ChannelType::Webhook,
        json!({ "url": format!("{}/hook", server.uri()), "retry_count": 1, "retry_interval": 1 }),
    )
    .await;
    let message = Message::new("CPU high", "load 12").with_priority(MessagePriority::Critical);

    let result = manager
        .send_message(&channel.id, &message, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.retry_count, 1);
    assert_eq!(result.channel_id, channel.id);
    assert_eq!(result.metadata["status_code"], json!(200));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_signed_body_matches_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("content-type", "application/json"))
        .and(header("X-Team", "sre"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let manager = builtin_manager().await;
    let channel = create(
        &manager,
        "signed",
        ChannelType::Webhook,
        json!({
            "url": server.uri(),
            "secret": "s3cret",
            "headers": { "X-Team": "sre" },
            "retry_count": 0
        }),
    )
    .await;

    let result = manager
        .send_message(&channel.id, &Message::new("Disk full", "/var"), &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.success);

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let signature = request.headers.get("X-Signature").unwrap().to_str().unwrap();
    assert_eq!(signature, sign_body("s3cret", &request.body).unwrap());

    let payload: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(payload["title"], "Disk full");
    assert_eq!(payload["priority"], "medium");
}

#[tokio::test]
async fn test_template_defines_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(body_json(json!({ "text": "[critical] CPU high" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let manager = builtin_manager().await;
    let channel = create(
        &manager,
        "templated",
        ChannelType::Webhook,
        json!({
            "url": server.uri(),
            "method": "PUT",
            "template": "{\"text\":\"[{{.Priority}}] {{.Title}}\"}",
            "retry_count": 0
        }),
    )
    .await;
    let message = Message::new("CPU high", "").with_priority(MessagePriority::Critical);

    let result = manager
        .send_message(&channel.id, &message, &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.success);
    server.verify().await;
}

#[tokio::test]
async fn test_cancellation_interrupts_retry_wait() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let manager = builtin_manager().await;
    let channel = create(
        &manager,
        "slow-retry",
        ChannelType::Webhook,
        json!({ "url": server.uri(), "retry_count": 3, "retry_interval": 60 }),
    )
    .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = manager
        .send_message(&channel.id, &Message::new("t", "c"), &cancel)
        .await
        .unwrap();

    assert_eq!(result.outcome, SendOutcome::Cancelled);
    assert!(!result.success);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_test_channel_makes_a_single_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let manager = builtin_manager().await;
    let channel = create(
        &manager,
        "probe",
        ChannelType::Webhook,
        json!({ "url": server.uri(), "retry_count": 3, "retry_interval": 1 }),
    )
    .await;

    let result = manager
        .test_channel(&channel.id, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.details["status_code"], json!(500));
    server.verify().await;
}

#[tokio::test]
async fn test_health_probe_uses_reachability() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;

    let manager = builtin_manager().await;
    let reachable = create(&manager, "up", ChannelType::Webhook, json!({ "url": server.uri() })).await;
    let unreachable = create(
        &manager,
        "down",
        ChannelType::Webhook,
        json!({ "url": "http://127.0.0.1:1/hook", "timeout": 2 }),
    )
    .await;
    let cancel = CancellationToken::new();

    assert_eq!(manager.health_check(&reachable.id, &cancel).await.status, HealthState::Healthy);
    let status = manager.health_check(&unreachable.id, &cancel).await;
    assert_eq!(status.status, HealthState::Unhealthy);
    assert_eq!(status.error_count, 1);
}
