//! Payload 构建模块 - 把一批通知转换为 Slack Incoming Webhook 消息
//!
//! Payload 格式：
//! ```json
//! {
//!   "username": "my-server",
//!   "text": "web error, api restart",
//!   "attachments": [
//!     {
//!       "fallback": "web error: line 1, line 2",
//!       "color": "#F44336",
//!       "title": "web error",
//!       "text": "line 1\nline 2",
//!       "ts": 1680336000
//!     }
//!   ]
//! }
//! ```
//!
//! Slack 的推送通知只显示第一个 attachment 的 fallback，
//! 所以多条消息时额外带上所有标题组成的 `text`。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sysinfo::System;

use super::event::Notification;
use super::severity::get_severity;
use crate::config::DestinationConfig;

/// Slack attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackAttachment {
    /// 纯文本摘要（单行）
    pub fallback: String,
    /// 左侧色条
    pub color: String,
    pub title: String,
    /// 正文（可多行）
    pub text: String,
    /// Unix 时间戳（秒）
    pub ts: i64,
}

/// Slack 消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackPayload {
    /// 发送者显示名
    pub username: String,
    /// 多条消息时的标题汇总
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub attachments: Vec<SlackAttachment>,
}

/// Payload 构建器
pub struct PayloadBuilder {
    /// 本机主机名（username/servername 都未配置时使用）
    host_name: String,
}

impl PayloadBuilder {
    /// 创建新的 PayloadBuilder，读取本机主机名
    pub fn new() -> Self {
        Self {
            host_name: System::host_name().unwrap_or_else(|| "localhost".to_string()),
        }
    }

    /// 指定主机名（用于测试）
    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = host_name.into();
        self
    }

    /// 发送者显示名：username > servername > 主机名
    pub fn sender_name(&self, config: &DestinationConfig) -> String {
        config
            .username
            .clone()
            .or_else(|| config.servername.clone())
            .unwrap_or_else(|| self.host_name.clone())
    }

    /// 构建 Slack 消息
    pub fn build(&self, notifications: &[Notification], config: &DestinationConfig) -> SlackPayload {
        let attachments: Vec<SlackAttachment> =
            notifications.iter().map(Self::build_attachment).collect();

        let text = if attachments.len() > 1 {
            Some(
                attachments
                    .iter()
                    .map(|a| a.title.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        } else {
            None
        };

        SlackPayload {
            username: self.sender_name(config),
            text,
            attachments,
        }
    }

    /// 单条通知转换为 attachment
    fn build_attachment(notification: &Notification) -> SlackAttachment {
        let title = notification.title();
        let description = notification.description.as_deref().unwrap_or("").trim();

        let fallback = if description.is_empty() {
            title.clone()
        } else {
            format!("{}: {}", title, collapse_lines(description))
        };

        SlackAttachment {
            fallback: escape_slack_text(&fallback),
            color: get_severity(&notification.event_kind).color().to_string(),
            title: escape_slack_text(&title),
            text: escape_slack_text(description),
            ts: notification.timestamp.unwrap_or_else(|| Utc::now().timestamp()),
        }
    }
}

impl Default for PayloadBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 转义 Slack 控制字符
///
/// `&` 必须最先替换，否则会把 `&lt;` 再次转义。
pub fn escape_slack_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// 把连续的换行替换为 `, `，得到单行摘要
fn collapse_lines(text: &str) -> String {
    text.split(|c: char| c == '\r' || c == '\n')
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}
