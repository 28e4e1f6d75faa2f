//! 统一通知结构
//!
//! 定义从进程管理器事件总线转换而来的通知，以及事件类型枚举。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 抑制提示的标题（不使用来源名称）
pub const SUPPRESSED_TITLE: &str = "message rate limitation";

/// 事件类型
///
/// 固定集合之外的生命周期事件保存在 `Other` 中，原样透传。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// 标准输出日志
    Log,
    /// 标准错误日志
    Error,
    /// 未捕获异常
    Exception,
    /// 进程管理器被终止
    Kill,
    Start,
    Stop,
    Restart,
    /// 重启次数超限，进程已停止
    RestartOverlimit,
    Exit,
    Delete,
    /// 超出批量上限被丢弃的消息数量提示
    Suppressed,
    /// 其他生命周期事件
    Other(String),
}

impl EventKind {
    /// 事件总线使用的名称（同时也是配置开关的键名）
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Log => "log",
            EventKind::Error => "error",
            EventKind::Exception => "exception",
            EventKind::Kill => "kill",
            EventKind::Start => "start",
            EventKind::Stop => "stop",
            EventKind::Restart => "restart",
            EventKind::RestartOverlimit => "restart overlimit",
            EventKind::Exit => "exit",
            EventKind::Delete => "delete",
            EventKind::Suppressed => "suppressed",
            EventKind::Other(name) => name,
        }
    }

    /// 从事件总线名称解析（大小写不敏感，`_` 与空格等价）
    pub fn parse(name: &str) -> Self {
        let normalized = name.trim().to_lowercase().replace('_', " ");
        match normalized.as_str() {
            "log" => EventKind::Log,
            "error" => EventKind::Error,
            "exception" => EventKind::Exception,
            "kill" => EventKind::Kill,
            "start" => EventKind::Start,
            "stop" => EventKind::Stop,
            "restart" => EventKind::Restart,
            "restart overlimit" => EventKind::RestartOverlimit,
            "exit" => EventKind::Exit,
            "delete" => EventKind::Delete,
            "suppressed" => EventKind::Suppressed,
            _ => EventKind::Other(name.trim().to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(EventKind::parse(&name))
    }
}

/// 一条待发送的通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// 来源进程显示名（集群模式下带实例后缀）
    pub source_name: String,
    /// 事件类型
    pub event_kind: EventKind,
    /// 正文（可多行）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Unix 时间戳（秒），缺省时在格式化时使用当前时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Notification {
    /// 创建新的通知
    pub fn new(source_name: impl Into<String>, event_kind: EventKind) -> Self {
        Self {
            source_name: source_name.into(),
            event_kind,
            description: None,
            timestamp: None,
        }
    }

    /// 设置正文
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// 设置时间戳
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// 使用当前时间作为时间戳
    pub fn stamped_now(self) -> Self {
        self.with_timestamp(Utc::now().timestamp())
    }

    /// 抑制提示通知
    pub fn suppressed(count: usize) -> Self {
        let text = format!(
            "Next {} message{} been suppressed.",
            count,
            if count > 1 { "s have" } else { " has" }
        );
        Self::new("", EventKind::Suppressed)
            .with_description(text)
            .stamped_now()
    }

    /// 标题：来源名 + 事件类型
    pub fn title(&self) -> String {
        if self.event_kind == EventKind::Suppressed {
            return SUPPRESSED_TITLE.to_string();
        }
        format!("{} {}", self.source_name, self.event_kind)
    }

    /// 是否可以与另一条通知合并（同来源、同事件类型）
    pub fn same_origin(&self, other: &Notification) -> bool {
        self.source_name == other.source_name && self.event_kind == other.event_kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_parse_known() {
        assert_eq!(EventKind::parse("log"), EventKind::Log);
        assert_eq!(EventKind::parse("restart overlimit"), EventKind::RestartOverlimit);
        assert_eq!(EventKind::parse("restart_overlimit"), EventKind::RestartOverlimit);
        assert_eq!(EventKind::parse("STOP"), EventKind::Stop);
    }

    #[test]
    fn test_event_kind_parse_other_passthrough() {
        let kind = EventKind::parse("reload");
        assert_eq!(kind, EventKind::Other("reload".to_string()));
        assert_eq!(kind.as_str(), "reload");
    }

    #[test]
    fn test_event_kind_serde_as_string() {
        let json = serde_json::to_string(&EventKind::RestartOverlimit).unwrap();
        assert_eq!(json, "\"restart overlimit\"");
        let kind: EventKind = serde_json::from_str("\"exception\"").unwrap();
        assert_eq!(kind, EventKind::Exception);
    }

    #[test]
    fn test_title() {
        let n = Notification::new("web[2]", EventKind::Restart);
        assert_eq!(n.title(), "web[2] restart");
    }

    #[test]
    fn test_suppressed_text() {
        let one = Notification::suppressed(1);
        assert_eq!(one.description.as_deref(), Some("Next 1 message has been suppressed."));
        assert_eq!(one.title(), SUPPRESSED_TITLE);
        assert!(one.timestamp.is_some());

        let many = Notification::suppressed(3);
        assert_eq!(many.description.as_deref(), Some("Next 3 messages have been suppressed."));
    }

    #[test]
    fn test_same_origin() {
        let a = Notification::new("web", EventKind::Error);
        let b = Notification::new("web", EventKind::Error).with_description("x");
        let c = Notification::new("api", EventKind::Error);
        assert!(a.same_origin(&b));
        assert!(!a.same_origin(&c));
    }
}
