//! 事件总线模块 - 读取进程管理器事件并转换为通知
//!
//! 事件以 JSON Lines 形式到达（stdin 或文件），每行一个事件：
//! ```json
//! {"type": "log:out", "process": {"name": "web", "exec_mode": "cluster_mode", "instances": 4, "pm_id": 2}, "data": "..."}
//! {"type": "process:event", "process": {"name": "web"}, "event": "restart"}
//! {"type": "process:exception", "process": {"name": "web"}, "data": {"code": "E1", "message": "boom"}}
//! {"type": "pm2:kill", "msg": "pm2 has been killed"}
//! ```

use anyhow::Result;
use chrono::{FixedOffset, NaiveDate, TimeZone};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::config::{ModuleConfig, MODULE_NAME};
use crate::notification::channel::Transport;
use crate::notification::dispatcher::NotificationDispatcher;
use crate::notification::event::{EventKind, Notification};

/// 重启次数超限时的说明
pub const RESTART_OVERLIMIT_TEXT: &str = "Process has been stopped. Check and fix the issue.";

/// 进程信息
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessInfo {
    pub name: String,
    #[serde(default)]
    pub exec_mode: Option<String>,
    /// 实例数；`-1`、`"max"` 等非正整数按未知处理
    #[serde(default, deserialize_with = "lenient_u32")]
    pub instances: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub pm_id: Option<u32>,
}

/// 数字或数字字符串转为 u32，其余值视为缺失
fn lenient_u32<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// 事件总线上的事件
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum BusEvent {
    /// 标准输出
    #[serde(rename = "log:out")]
    LogOut {
        process: ProcessInfo,
        #[serde(default)]
        data: Option<String>,
    },
    /// 标准错误
    #[serde(rename = "log:err")]
    LogErr {
        process: ProcessInfo,
        #[serde(default)]
        data: Option<String>,
    },
    /// 生命周期事件（start/stop/restart/restart overlimit/...）
    #[serde(rename = "process:event")]
    ProcessEvent { process: ProcessInfo, event: String },
    /// 未捕获异常
    #[serde(rename = "process:exception")]
    ProcessException {
        process: ProcessInfo,
        #[serde(default)]
        data: Value,
    },
    /// 进程管理器被终止
    #[serde(rename = "pm2:kill")]
    Kill {
        #[serde(default)]
        msg: Option<String>,
    },
}

/// 日志行解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLog {
    pub description: String,
    pub timestamp: Option<i64>,
}

fn log_timestamp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(\d{4})-(\d{2})-(\d{2}) (\d{1,2}):(\d{2}):(\d{2})(?:\.(\d{3}))? ([+-]?)(\d{1,2}):(\d{2})(?:\.\d{3})?[:\-\s]+",
        )
        .expect("log timestamp regex is valid")
    })
}

/// 解析日志行开头的时间戳 `YYYY-MM-DD H:MM:SS[.mmm] [+-]H:MM[.mmm]`
///
/// 有时间戳时去掉时间戳和分隔符，返回剩余文本和 Unix 时间戳；
/// 没有（或日期无效）时原样返回文本。
pub fn parse_log_line(text: &str) -> ParsedLog {
    let unchanged = || ParsedLog {
        description: text.to_string(),
        timestamp: None,
    };

    let Some(caps) = log_timestamp_regex().captures(text) else {
        return unchanged();
    };

    let num = |i: usize| -> Option<u32> { caps.get(i)?.as_str().parse().ok() };
    let timestamp = (|| {
        let year: i32 = caps.get(1)?.as_str().parse().ok()?;
        let millis = num(7).unwrap_or(0);
        let naive = NaiveDate::from_ymd_opt(year, num(2)?, num(3)?)?
            .and_hms_milli_opt(num(4)?, num(5)?, num(6)?, millis)?;

        let sign = if caps.get(8).map(|m| m.as_str()) == Some("-") { -1 } else { 1 };
        let offset_secs = sign * (num(9)? as i32 * 3600 + num(10)? as i32 * 60);
        let offset = FixedOffset::east_opt(offset_secs)?;
        Some(offset.from_local_datetime(&naive).single()?.timestamp())
    })();

    match (timestamp, caps.get(0)) {
        (Some(ts), Some(whole)) => ParsedLog {
            description: text[whole.end()..].to_string(),
            timestamp: Some(ts),
        },
        _ => unchanged(),
    }
}

/// 进程显示名；集群模式且多实例时追加 `[pm_id]`
pub fn parse_process_name(process: &ProcessInfo) -> String {
    let clustered = process.exec_mode.as_deref() == Some("cluster_mode")
        && process.instances.unwrap_or(0) > 1;
    match (clustered, process.pm_id) {
        (true, Some(id)) => format!("{}[{}]", process.name, id),
        _ => process.name.clone(),
    }
}

/// 异常描述：有 message 时为 code + message，否则为整个 data 的 JSON
fn describe_exception(data: &Value) -> String {
    match data.get("message").and_then(Value::as_str).filter(|m| !m.is_empty()) {
        Some(message) => {
            let code = match data.get("code") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => String::new(),
            };
            format!("{}{}", code, message)
        }
        None => data.to_string(),
    }
}

/// 把事件转换为通知；被配置关闭或来自自身的事件返回 None
pub fn to_notification(event: BusEvent, config: &ModuleConfig) -> Option<Notification> {
    let notification = match event {
        BusEvent::Kill { msg } => {
            let mut n = Notification::new("PM2", EventKind::Kill).stamped_now();
            n.description = msg;
            n
        }
        BusEvent::LogOut { process, .. }
        | BusEvent::LogErr { process, .. }
        | BusEvent::ProcessEvent { process, .. }
        | BusEvent::ProcessException { process, .. }
            if process.name == MODULE_NAME =>
        {
            return None;
        }
        BusEvent::LogOut { process, data } => {
            log_notification(parse_process_name(&process), EventKind::Log, data)
        }
        BusEvent::LogErr { process, data } => {
            log_notification(parse_process_name(&process), EventKind::Error, data)
        }
        BusEvent::ProcessException { process, data } => {
            Notification::new(parse_process_name(&process), EventKind::Exception)
                .with_description(describe_exception(&data))
                .stamped_now()
        }
        BusEvent::ProcessEvent { process, event } => {
            let mut n = Notification::new(parse_process_name(&process), EventKind::parse(&event))
                .stamped_now();
            if n.event_kind == EventKind::RestartOverlimit {
                n.description = Some(RESTART_OVERLIMIT_TEXT.to_string());
            }
            n
        }
    };

    if !config.event_enabled(&notification.event_kind, &notification.source_name) {
        debug!(
            source = %notification.source_name,
            kind = %notification.event_kind,
            "Event type disabled by configuration"
        );
        return None;
    }

    Some(notification)
}

fn log_notification(name: String, kind: EventKind, data: Option<String>) -> Notification {
    let parsed = parse_log_line(data.as_deref().unwrap_or(""));
    let mut n = Notification::new(name, kind).with_description(parsed.description);
    n.timestamp = parsed.timestamp;
    n
}

/// 读取统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// 读取的非空行数
    pub lines: usize,
    /// 转发给分发器的通知数
    pub routed: usize,
    /// 被过滤的事件数
    pub filtered: usize,
    /// 无法解析的行数
    pub malformed: usize,
}

/// 持续读取事件直到输入结束
pub async fn ingest<R, T>(reader: R, dispatcher: &mut NotificationDispatcher<T>) -> Result<IngestStats>
where
    R: AsyncBufRead + Unpin,
    T: Transport,
{
    let mut stats = IngestStats::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        stats.lines += 1;

        let event: BusEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                stats.malformed += 1;
                warn!(error = %e, "Skipping malformed bus event");
                continue;
            }
        };

        match to_notification(event, dispatcher.config()) {
            Some(notification) => {
                stats.routed += 1;
                dispatcher.route(notification);
            }
            None => stats.filtered += 1,
        }
    }

    info!(
        lines = stats.lines,
        routed = stats.routed,
        filtered = stats.filtered,
        malformed = stats.malformed,
        "Event stream ended"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn all_enabled() -> ModuleConfig {
        let mut config = ModuleConfig::new();
        for key in ["log", "error", "exception", "kill", "start", "stop", "restart"] {
            config.set(key, true);
        }
        config
    }

    fn event(value: Value) -> BusEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_log_line_with_timestamp() {
        let parsed = parse_log_line("2023-04-01 10:00:00 +02:00: boot ok");
        assert_eq!(parsed.description, "boot ok");
        // 2023-04-01T10:00:00+02:00
        assert_eq!(parsed.timestamp, Some(1_680_336_000));
    }

    #[test]
    fn test_parse_log_line_without_timestamp() {
        let parsed = parse_log_line("boot ok");
        assert_eq!(parsed.description, "boot ok");
        assert_eq!(parsed.timestamp, None);
    }

    #[test]
    fn test_parse_log_line_millis_and_negative_offset() {
        let parsed = parse_log_line("2023-04-01 8:00:00.250 -1:30 - listening");
        assert_eq!(parsed.description, "listening");
        // 08:00 at -01:30 is 09:30 UTC
        assert_eq!(parsed.timestamp, Some(1_680_341_400));
    }

    #[test]
    fn test_parse_log_line_requires_separator() {
        let parsed = parse_log_line("2023-04-01 10:00:00 +02:00boot");
        assert_eq!(parsed.description, "2023-04-01 10:00:00 +02:00boot");
        assert_eq!(parsed.timestamp, None);
    }

    #[test]
    fn test_parse_log_line_timestamp_not_leading() {
        let text = "started at 2023-04-01 10:00:00 +02:00: ok";
        assert_eq!(parse_log_line(text).description, text);
    }

    #[test]
    fn test_parse_log_line_invalid_date_kept() {
        let text = "2023-13-40 10:00:00 +02:00: weird";
        let parsed = parse_log_line(text);
        assert_eq!(parsed.description, text);
        assert_eq!(parsed.timestamp, None);
    }

    #[test]
    fn test_parse_process_name() {
        let mut process = ProcessInfo {
            name: "web".to_string(),
            exec_mode: Some("cluster_mode".to_string()),
            instances: Some(4),
            pm_id: Some(2),
        };
        assert_eq!(parse_process_name(&process), "web[2]");

        process.instances = Some(1);
        assert_eq!(parse_process_name(&process), "web");

        process.instances = Some(4);
        process.exec_mode = Some("fork_mode".to_string());
        assert_eq!(parse_process_name(&process), "web");
    }

    #[test]
    fn test_process_info_tolerates_odd_numbers() {
        let e = event(json!({
            "type": "log:out",
            "process": {"name": "web", "exec_mode": "cluster_mode", "instances": -1, "pm_id": "3"},
            "data": "x"
        }));
        let BusEvent::LogOut { process, .. } = e else {
            panic!("expected log:out");
        };
        assert_eq!(process.instances, None);
        assert_eq!(process.pm_id, Some(3));
        assert_eq!(parse_process_name(&process), "web");

        let e = event(json!({
            "type": "process:event",
            "process": {"name": "api", "exec_mode": "cluster_mode", "instances": "max", "pm_id": 0},
            "event": "start"
        }));
        let n = to_notification(e, &all_enabled()).unwrap();
        assert_eq!(n.source_name, "api");
    }

    #[tokio::test]
    async fn test_ingest_keeps_lines_with_odd_instances() {
        let mut config = all_enabled();
        config.set("slack_url", "https://hooks.example/x");
        config.set("buffer", false);
        let transport = std::sync::Arc::new(crate::notification::DryRunTransport);
        let mut dispatcher = NotificationDispatcher::new(config, transport);

        let input = r#"{"type": "log:out", "process": {"name": "web", "instances": "max"}, "data": "hi"}"#;
        let stats = ingest(input.as_bytes(), &mut dispatcher).await.unwrap();
        assert_eq!(stats.malformed, 0);
        assert_eq!(stats.routed, 1);
        dispatcher.shutdown().await;
    }

    #[test]
    fn test_log_out_event() {
        let e = event(json!({
            "type": "log:out",
            "process": {"name": "web"},
            "data": "2023-04-01 10:00:00 +02:00: boot ok"
        }));
        let n = to_notification(e, &all_enabled()).unwrap();
        assert_eq!(n.source_name, "web");
        assert_eq!(n.event_kind, EventKind::Log);
        assert_eq!(n.description.as_deref(), Some("boot ok"));
        assert_eq!(n.timestamp, Some(1_680_336_000));
    }

    #[test]
    fn test_log_err_maps_to_error_kind() {
        let e = event(json!({"type": "log:err", "process": {"name": "web"}, "data": "oops"}));
        let n = to_notification(e, &all_enabled()).unwrap();
        assert_eq!(n.event_kind, EventKind::Error);
        assert_eq!(n.timestamp, None);
    }

    #[test]
    fn test_log_disabled_by_default() {
        let e = event(json!({"type": "log:out", "process": {"name": "web"}, "data": "x"}));
        assert!(to_notification(e, &ModuleConfig::new()).is_none());
    }

    #[test]
    fn test_own_module_ignored() {
        let e = event(json!({"type": "log:err", "process": {"name": "pm2-slack"}, "data": "x"}));
        assert!(to_notification(e, &all_enabled()).is_none());
    }

    #[test]
    fn test_exception_with_message() {
        let e = event(json!({
            "type": "process:exception",
            "process": {"name": "web"},
            "data": {"code": "E_FAIL: ", "message": "boom"}
        }));
        let n = to_notification(e, &all_enabled()).unwrap();
        assert_eq!(n.description.as_deref(), Some("E_FAIL: boom"));
        assert!(n.timestamp.is_some());
    }

    #[test]
    fn test_exception_without_message_is_json() {
        let e = event(json!({
            "type": "process:exception",
            "process": {"name": "web"},
            "data": {"reason": "unknown"}
        }));
        let n = to_notification(e, &all_enabled()).unwrap();
        assert_eq!(n.description.as_deref(), Some(r#"{"reason":"unknown"}"#));
    }

    #[test]
    fn test_kill_event() {
        let e = event(json!({"type": "pm2:kill", "msg": "pm2 has been killed"}));
        let n = to_notification(e, &all_enabled()).unwrap();
        assert_eq!(n.source_name, "PM2");
        assert_eq!(n.event_kind, EventKind::Kill);
        assert_eq!(n.description.as_deref(), Some("pm2 has been killed"));
    }

    #[test]
    fn test_restart_overlimit_description() {
        let e = event(json!({
            "type": "process:event",
            "process": {"name": "web"},
            "event": "restart overlimit"
        }));
        let n = to_notification(e, &ModuleConfig::new()).unwrap();
        assert_eq!(n.event_kind, EventKind::RestartOverlimit);
        assert_eq!(n.description.as_deref(), Some(RESTART_OVERLIMIT_TEXT));
    }

    #[test]
    fn test_lifecycle_event_disabled_per_source() {
        let mut config = ModuleConfig::new();
        config.set("restart-flaky", false);

        let flaky = event(json!({"type": "process:event", "process": {"name": "flaky"}, "event": "restart"}));
        let web = event(json!({"type": "process:event", "process": {"name": "web"}, "event": "restart"}));
        assert!(to_notification(flaky, &config).is_none());
        let n = to_notification(web, &config).unwrap();
        assert_eq!(n.description, None);
    }

    #[test]
    fn test_unknown_lifecycle_event_needs_flag() {
        let mut config = ModuleConfig::new();
        let e = || event(json!({"type": "process:event", "process": {"name": "web"}, "event": "reload"}));
        assert!(to_notification(e(), &config).is_none());

        config.set("reload", true);
        let n = to_notification(e(), &config).unwrap();
        assert_eq!(n.event_kind, EventKind::Other("reload".to_string()));
    }
}
