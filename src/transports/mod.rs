//! Built-in notification transports.

pub mod chatbot;
pub mod dingtalk;
pub mod email;
pub mod http;
pub mod retry;
pub mod signing;
pub mod slack;
pub mod webhook;
pub mod wechat;

pub use dingtalk::DingTalkPlugin;
pub use email::EmailPlugin;
pub use slack::SlackPlugin;
pub use webhook::WebhookPlugin;
pub use wechat::WechatWorkPlugin;

use crate::plugin::TransportPlugin;
use std::sync::Arc;

/// One instance of every built-in transport, in channel-type order.
pub fn builtin_plugins() -> Vec<Arc<dyn TransportPlugin>> {
    vec![
        Arc::new(WebhookPlugin::new()),
        Arc::new(DingTalkPlugin::new()),
        Arc::new(WechatWorkPlugin::new()),
        Arc::new(SlackPlugin::new()),
        Arc::new(EmailPlugin::new()),
    ]
}
