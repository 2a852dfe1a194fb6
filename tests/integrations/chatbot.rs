//! Chat-bot webhook transports (DingTalk, WeChat Work, Slack) against mock
//! endpoints.

#[path = "../helpers/mod.rs"]
mod helpers;

use alertrelay::core::{ChannelType, Message, MessagePriority};
use alertrelay::transports::signing::sign_timestamp;
use helpers::{builtin_manager, create};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn bot_reply(errcode: i64, errmsg: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "errcode": errcode, "errmsg": errmsg }))
}

#[tokio::test]
async fn test_dingtalk_signs_url_and_mentions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/robot/send"))
        .and(query_param("access_token", "abc"))
        .respond_with(bot_reply(0, "ok"))
        .expect(1)
        .mount(&server)
        .await;

    let manager = builtin_manager().await;
    let channel = create(
        &manager,
        "oncall-dingtalk",
        ChannelType::DingTalk,
        json!({
            "webhook_url": format!("{}/robot/send?access_token=abc", server.uri()),
            "secret": "SECabc",
            "at_mobiles": ["13800000000"],
            "retry_count": 0
        }),
    )
    .await;
    let message = Message::new("CPU high", "load 12").with_priority(MessagePriority::Critical);

    let result = manager
        .send_message(&channel.id, &message, &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.error);

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let query: std::collections::HashMap<String, String> = request.url.query_pairs().into_owned().collect();
    let timestamp: i64 = query["timestamp"].parse().unwrap();
    assert_eq!(query["sign"], sign_timestamp("SECabc", timestamp).unwrap());

    let body: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["msgtype"], "text");
    assert_eq!(body["at"]["atMobiles"], json!(["13800000000"]));
    assert!(body["text"]["content"].as_str().unwrap().contains("@13800000000"));
}

#[tokio::test]
async fn test_dingtalk_nonzero_errcode_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(bot_reply(310000, "sign not match"))
        .expect(2)
        .mount(&server)
        .await;

    let manager = builtin_manager().await;
    let channel = create(
        &manager,
        "bad-sign",
        ChannelType::DingTalk,
        json!({ "webhook_url": server.uri(), "retry_count": 1, "retry_interval": 1 }),
    )
    .await;

    let result = manager
        .send_message(&channel.id, &Message::new("t", "c"), &CancellationToken::new())
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.retry_count, 1);
    let error = result.error.unwrap();
    assert!(error.contains("310000"), "{}", error);
    assert!(error.contains("sign not match"), "{}", error);
    server.verify().await;
}

#[tokio::test]
async fn test_malformed_reply_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let manager = builtin_manager().await;
    let channel = create(
        &manager,
        "proxy",
        ChannelType::WechatWork,
        json!({ "webhook_url": server.uri(), "retry_count": 3, "retry_interval": 1 }),
    )
    .await;

    let result = manager
        .send_message(&channel.id, &Message::new("t", "c"), &CancellationToken::new())
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.retry_count, 0);
    assert!(result.error.unwrap().contains("malformed response"));
    server.verify().await;
}

#[tokio::test]
async fn test_wechat_markdown_inlines_mentions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(bot_reply(0, "ok"))
        .mount(&server)
        .await;

    let manager = builtin_manager().await;
    let channel = create(
        &manager,
        "wecom",
        ChannelType::WechatWork,
        json!({
            "webhook_url": server.uri(),
            "msg_type": "markdown",
            "mentioned_list": ["zhangsan", "@all"],
            "retry_count": 0
        }),
    )
    .await;

    let result = manager
        .send_message(&channel.id, &Message::new("Disk full", "/var at 99%"), &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.success);

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["msgtype"], "markdown");
    let content = body["markdown"]["content"].as_str().unwrap();
    assert!(content.contains("Disk full"));
    assert!(content.contains("<@zhangsan>"));
    assert!(!content.contains("<@@all>"));
}

#[tokio::test]
async fn test_slack_attachment_is_colored_by_priority() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let manager = builtin_manager().await;
    let channel = create(
        &manager,
        "slack-alerts",
        ChannelType::Slack,
        json!({ "webhook_url": server.uri(), "channel": "#alerts", "retry_count": 0 }),
    )
    .await;
    let message = Message::new("CPU high", "load 12").with_priority(MessagePriority::High);

    let result = manager
        .send_message(&channel.id, &message, &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.success);

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["channel"], "#alerts");
    assert!(body["text"].as_str().unwrap().contains("CPU high"));
    assert_eq!(body["attachments"].as_array().unwrap().len(), 1);
    assert!(body["attachments"][0]["color"].is_string());
}
