// src/formatting.rs

use crate::core::{Message, MessagePriority};
use crate::error::DispatchError;
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::OnceLock;

/// A trait for rendering a message into a transport's text format.
pub trait TextFormatter: Send + Sync {
    fn format(&self, message: &Message) -> String;
}

/// Hex color used for priority badges and attachments.
pub fn severity_color(priority: MessagePriority) -> &'static str {
    match priority {
        MessagePriority::Critical => "#dc3545",
        MessagePriority::High => "#fd7e14",
        MessagePriority::Medium => "#ffc107",
        MessagePriority::Low => "#0dcaf0",
    }
}

fn severity_emoji(priority: MessagePriority) -> &'static str {
    match priority {
        MessagePriority::Critical => ":rotating_light:",
        MessagePriority::High => ":warning:",
        MessagePriority::Medium => ":large_yellow_circle:",
        MessagePriority::Low => ":information_source:",
    }
}

fn data_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Plain text: `[CRITICAL] title`, the content, then data lines.
pub struct PlainTextFormatter;

impl TextFormatter for PlainTextFormatter {
    fn format(&self, message: &Message) -> String {
        let mut out = format!(
            "[{}] {}\n{}",
            message.priority.as_str().to_uppercase(),
            message.title,
            message.content
        );
        for (key, value) in &message.data {
            out.push_str(&format!("\n{}: {}", key, data_value(value)));
        }
        out
    }
}

/// Which chat-bot dialect a markdown badge is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkdownFlavor {
    /// `<font color="#hex">` badges.
    DingTalk,
    /// WeChat Work only knows the `info`, `comment` and `warning` colors.
    WechatWork,
}

/// Markdown with a severity-colored badge.
pub struct MarkdownFormatter {
    pub flavor: MarkdownFlavor,
}

impl MarkdownFormatter {
    pub fn badge(&self, priority: MessagePriority) -> String {
        let color = match self.flavor {
            MarkdownFlavor::DingTalk => severity_color(priority),
            MarkdownFlavor::WechatWork => match priority {
                MessagePriority::Critical | MessagePriority::High => "warning",
                MessagePriority::Medium => "comment",
                MessagePriority::Low => "info",
            },
        };
        format!(
            "<font color=\"{}\">[{}]</font>",
            color,
            priority.as_str().to_uppercase()
        )
    }
}

impl TextFormatter for MarkdownFormatter {
    fn format(&self, message: &Message) -> String {
        let mut out = format!(
            "### {} {}\n\n{}\n",
            self.badge(message.priority),
            message.title,
            message.content
        );
        for (key, value) in &message.data {
            out.push_str(&format!("\n- **{}**: {}", key, data_value(value)));
        }
        out.push_str(&format!(
            "\n\n> {}",
            message.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        out
    }
}

/// Slack `mrkdwn` text used inside the attachment.
pub struct SlackTextFormatter;

impl TextFormatter for SlackTextFormatter {
    fn format(&self, message: &Message) -> String {
        let mut out = format!(
            "{} *{}*\n{}",
            severity_emoji(message.priority),
            message.title,
            message.content
        );
        if !message.data.is_empty() {
            let lines: Vec<String> = message
                .data
                .iter()
                .map(|(k, v)| format!("{}: {}", k, data_value(v)))
                .collect();
            out.push_str(&format!("\n```\n{}\n```", lines.join("\n")));
        }
        out
    }
}

/// Self-contained HTML body for email.
pub struct HtmlFormatter;

impl TextFormatter for HtmlFormatter {
    fn format(&self, message: &Message) -> String {
        let rows: String = message
            .data
            .iter()
            .map(|(k, v)| {
                format!(
                    "<li><strong>{}</strong>: {}</li>",
                    escape_html(k),
                    escape_html(&data_value(v))
                )
            })
            .collect();
        let details = if rows.is_empty() {
            String::new()
        } else {
            format!("<h3>Details</h3><ul>{}</ul>", rows)
        };

        format!(
            r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; color: #333;">
    <div style="max-width: 600px; margin: 0 auto;">
        <div style="background: {color}; color: white; padding: 16px;">
            <h1 style="margin: 0; font-size: 20px;">[{priority}] {title}</h1>
        </div>
        <div style="background: #f9f9f9; padding: 16px;">
            <p>{content}</p>
            {details}
            <p style="color: #666; font-size: 12px;">{time}</p>
        </div>
    </div>
</body>
</html>"#,
            color = severity_color(message.priority),
            priority = message.priority.as_str().to_uppercase(),
            title = escape_html(&message.title),
            content = escape_html(&message.content).replace('\n', "<br>"),
            details = details,
            time = message.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        )
    }
}

/// How substituted values are escaped by [`render_template`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escape {
    None,
    /// Escaped as the inside of a JSON string literal.
    Json,
    Html,
}

fn placeholder_re() -> Result<&'static Regex, DispatchError> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_-]+)*)\s*\}\}"))
        .as_ref()
        .map_err(|e| DispatchError::Template(format!("placeholder pattern: {}", e)))
}

fn lookup(message: &Message, path: &str) -> Option<String> {
    match path {
        "ID" | "Id" => Some(message.id.clone()),
        "Title" => Some(message.title.clone()),
        "Content" => Some(message.content.clone()),
        "Priority" => Some(message.priority.as_str().to_string()),
        "Type" => Some(message.message_type.clone()),
        "Timestamp" => Some(message.created_at.timestamp().to_string()),
        "Time" => Some(message.created_at.to_rfc3339()),
        _ => {
            let key = path.strip_prefix("Data.")?;
            message.data.get(key).map(data_value)
        }
    }
}

/// Substitutes `{{.Field}}` placeholders (`ID`, `Title`, `Content`,
/// `Priority`, `Type`, `Timestamp`, `Time`, `Data.<key>`).
///
/// Unknown placeholders are an error.
pub fn render_template(template: &str, message: &Message, escape: Escape) -> Result<String, DispatchError> {
    let mut missing = None;
    let rendered = placeholder_re()?.replace_all(template, |caps: &Captures| {
        let path = &caps[1];
        match lookup(message, path) {
            Some(value) => match escape {
                Escape::None => value,
                Escape::Json => escape_json(&value),
                Escape::Html => escape_html(&value),
            },
            None => {
                missing.get_or_insert_with(|| path.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(path) => Err(DispatchError::Template(format!("unknown field '.{}'", path))),
        None => Ok(rendered.into_owned()),
    }
}

fn escape_json(value: &str) -> String {
    let quoted = Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
