//! 配置模块 - 启动时读取一次的键值配置
//!
//! 配置文件是一个扁平的 JSON 对象，例如：
//! ```json
//! {
//!   "slack_url": "https://hooks.slack.com/services/...",
//!   "slack_url-api": "https://hooks.slack.com/services/...",
//!   "buffer_seconds": 2,
//!   "queue_max": 100,
//!   "error": true
//! }
//! ```
//!
//! 除 `slack_url` 的目标选择外，每个键都支持 `<key>-<进程名>` 形式的单进程覆盖，
//! 未覆盖时回退到全局值。文件中未设置的键可由 `PM2_SLACK_<KEY>` 环境变量补充。

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::notification::event::EventKind;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "PM2_SLACK_";

/// 自身进程名，来自它的事件会被忽略
pub const MODULE_NAME: &str = "pm2-slack";

pub const DEFAULT_BUFFER_SECONDS: u64 = 2;
pub const DEFAULT_BUFFER_MAX_SECONDS: u64 = 20;
pub const DEFAULT_QUEUE_MAX: usize = 100;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
/// `buffer_seconds` / `buffer_max_seconds` 的上限（一天）
pub const MAX_BUFFER_SECONDS: u64 = 86_400;

/// 每个 Slack URL 的解析后配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationConfig {
    /// Incoming Webhook URL
    pub slack_url: Option<String>,
    /// 发送者显示名
    pub username: Option<String>,
    /// 服务器名（username 未设置时使用）
    pub servername: Option<String>,
    /// 是否启用缓冲
    pub buffer: bool,
    /// 防抖窗口（秒）
    pub buffer_seconds: u64,
    /// 累计延迟上限（秒），0 表示不限制
    pub buffer_max_seconds: u64,
    /// 单次发送的最大消息数，0 表示不限制
    pub queue_max: usize,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            slack_url: None,
            username: None,
            servername: None,
            buffer: true,
            buffer_seconds: DEFAULT_BUFFER_SECONDS,
            buffer_max_seconds: DEFAULT_BUFFER_MAX_SECONDS,
            queue_max: DEFAULT_QUEUE_MAX,
        }
    }
}

impl DestinationConfig {
    /// 不缓冲、立即发送的配置
    pub fn unbuffered(slack_url: impl Into<String>) -> Self {
        Self {
            slack_url: Some(slack_url.into()),
            buffer: false,
            ..Default::default()
        }
    }

    /// 缓冲是否生效（开关打开且窗口大于 0）
    pub fn buffering_enabled(&self) -> bool {
        self.buffer && self.buffer_seconds > 0
    }
}

/// 模块配置（键值存储）
#[derive(Debug, Clone, Default)]
pub struct ModuleConfig {
    values: HashMap<String, Value>,
}

impl ModuleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 默认配置文件路径: `<config_dir>/pm2-slack/config.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(MODULE_NAME)
            .join("config.json")
    }

    /// 加载配置文件并叠加环境变量
    ///
    /// 文件不存在时视为空配置；文件格式错误返回错误。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, std::env::vars())
    }

    /// 加载配置文件并叠加给定的环境变量
    pub fn load_with_env<I>(path: Option<&Path>, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        let mut config = if path.exists() {
            Self::load_file(&path)?
        } else {
            Self::new()
        };
        config.apply_env(vars);
        Ok(config)
    }

    /// 从 JSON 文件读取
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let values: HashMap<String, Value> = serde_json::from_str(&content)
            .with_context(|| format!("Config file {} is not a JSON object", path.display()))?;
        Ok(Self { values })
    }

    /// 用环境变量补充未设置的键
    ///
    /// 同时接受 `PM2_SLACK_<KEY>` 和旧的小写 `pm2_slack_<key>`。
    pub fn apply_env<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let lower_prefix = ENV_PREFIX.to_lowercase();
        for (name, value) in vars {
            let key = if let Some(rest) = name.strip_prefix(ENV_PREFIX) {
                rest.to_lowercase()
            } else if let Some(rest) = name.strip_prefix(&lower_prefix) {
                rest.to_string()
            } else {
                continue;
            };
            if key.is_empty() || self.get(&key).is_some() {
                continue;
            }
            self.values.insert(key, Value::String(value));
        }
    }

    /// 设置一个键
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// 读取一个键，`null` 和空字符串视为未设置
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self.values.get(key)? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            value => Some(value),
        }
    }

    /// 先查 `<key>-<source>`，再查 `<key>`
    pub fn resolve(&self, key: &str, source_name: &str) -> Option<&Value> {
        self.get(&format!("{}-{}", key, source_name))
            .or_else(|| self.get(key))
    }

    pub fn resolve_str(&self, key: &str, source_name: &str) -> Option<String> {
        self.resolve(key, source_name).and_then(value_as_string)
    }

    pub fn resolve_bool(&self, key: &str, source_name: &str) -> Option<bool> {
        self.resolve(key, source_name).and_then(value_as_bool)
    }

    pub fn resolve_u64(&self, key: &str, source_name: &str) -> Option<u64> {
        self.resolve(key, source_name).and_then(value_as_u64)
    }

    /// 该来源对应的 Slack URL（单进程覆盖优先）
    pub fn endpoint_for(&self, source_name: &str) -> Option<String> {
        self.resolve_str("slack_url", source_name)
    }

    /// 逐项解析目标配置（单进程覆盖优先，回退到全局值，再回退到默认值）
    pub fn destination_config(&self, source_name: &str) -> DestinationConfig {
        let defaults = DestinationConfig::default();
        DestinationConfig {
            slack_url: self.resolve_str("slack_url", source_name),
            username: self.resolve_str("username", source_name),
            servername: self.resolve_str("servername", source_name),
            buffer: self.resolve_bool("buffer", source_name).unwrap_or(defaults.buffer),
            buffer_seconds: self
                .resolve_u64("buffer_seconds", source_name)
                .unwrap_or(defaults.buffer_seconds)
                .min(MAX_BUFFER_SECONDS),
            buffer_max_seconds: self
                .resolve_u64("buffer_max_seconds", source_name)
                .unwrap_or(defaults.buffer_max_seconds)
                .min(MAX_BUFFER_SECONDS),
            queue_max: self
                .resolve_u64("queue_max", source_name)
                .map(|n| n as usize)
                .unwrap_or(defaults.queue_max),
        }
    }

    /// 该事件类型是否启用
    pub fn event_enabled(&self, kind: &EventKind, source_name: &str) -> bool {
        self.resolve_bool(kind.as_str(), source_name)
            .unwrap_or_else(|| default_event_enabled(kind))
    }

    /// HTTP 超时（秒）
    pub fn timeout_seconds(&self) -> u64 {
        self.get("timeout_seconds")
            .and_then(value_as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS)
    }
}

/// 未配置时各事件类型的默认开关
fn default_event_enabled(kind: &EventKind) -> bool {
    match kind {
        EventKind::Log | EventKind::Error => false,
        EventKind::Exception | EventKind::Kill => true,
        EventKind::Start
        | EventKind::Stop
        | EventKind::Restart
        | EventKind::RestartOverlimit
        | EventKind::Exit
        | EventKind::Delete => true,
        EventKind::Suppressed | EventKind::Other(_) => false,
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_resolve_prefers_source_override() {
        let mut config = ModuleConfig::new();
        config.set("username", "global");
        config.set("username-api", "api-bot");

        assert_eq!(config.resolve_str("username", "api"), Some("api-bot".to_string()));
        assert_eq!(config.resolve_str("username", "web"), Some("global".to_string()));
    }

    #[test]
    fn test_empty_string_is_unset() {
        let mut config = ModuleConfig::new();
        config.set("slack_url", "https://hooks.example/global");
        config.set("slack_url-web", "");

        assert_eq!(
            config.endpoint_for("web"),
            Some("https://hooks.example/global".to_string())
        );
    }

    #[test]
    fn test_endpoint_absent() {
        let config = ModuleConfig::new();
        assert_eq!(config.endpoint_for("web"), None);
    }

    #[test]
    fn test_destination_config_defaults() {
        let mut config = ModuleConfig::new();
        config.set("slack_url", "https://hooks.example/a");

        let dest = config.destination_config("web");
        assert_eq!(dest.slack_url.as_deref(), Some("https://hooks.example/a"));
        assert!(dest.buffer);
        assert_eq!(dest.buffer_seconds, DEFAULT_BUFFER_SECONDS);
        assert_eq!(dest.buffer_max_seconds, DEFAULT_BUFFER_MAX_SECONDS);
        assert_eq!(dest.queue_max, DEFAULT_QUEUE_MAX);
        assert!(dest.buffering_enabled());
    }

    #[test]
    fn test_destination_config_stringly_values() {
        let mut config = ModuleConfig::new();
        config.set("buffer", "false");
        config.set("buffer_seconds", "5");
        config.set("buffer_max_seconds", json!(30));
        config.set("queue_max-web", "7");

        let dest = config.destination_config("web");
        assert!(!dest.buffer);
        assert_eq!(dest.buffer_seconds, 5);
        assert_eq!(dest.buffer_max_seconds, 30);
        assert_eq!(dest.queue_max, 7);
        assert!(!dest.buffering_enabled());
    }

    #[test]
    fn test_zero_window_disables_buffering() {
        let dest = DestinationConfig {
            buffer_seconds: 0,
            ..Default::default()
        };
        assert!(!dest.buffering_enabled());
    }

    #[test]
    fn test_event_enabled_defaults_and_overrides() {
        let mut config = ModuleConfig::new();
        assert!(!config.event_enabled(&EventKind::Log, "web"));
        assert!(config.event_enabled(&EventKind::Exception, "web"));
        assert!(config.event_enabled(&EventKind::RestartOverlimit, "web"));

        config.set("log", true);
        config.set("log-noisy", false);
        assert!(config.event_enabled(&EventKind::Log, "web"));
        assert!(!config.event_enabled(&EventKind::Log, "noisy"));
    }

    #[test]
    fn test_apply_env_does_not_override_file() {
        let mut config = ModuleConfig::new();
        config.set("username", "from-file");
        config.apply_env(vec![
            ("PM2_SLACK_USERNAME".to_string(), "from-env".to_string()),
            ("PM2_SLACK_SLACK_URL".to_string(), "https://hooks.example/env".to_string()),
            ("pm2_slack_servername".to_string(), "box-1".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ]);

        assert_eq!(config.resolve_str("username", "x"), Some("from-file".to_string()));
        assert_eq!(config.endpoint_for("x"), Some("https://hooks.example/env".to_string()));
        assert_eq!(config.resolve_str("servername", "x"), Some("box-1".to_string()));
        assert!(config.get("home").is_none());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"slack_url": "https://hooks.example/f", "queue_max": 3}}"#).unwrap();

        let config = ModuleConfig::load_file(file.path()).unwrap();
        assert_eq!(config.destination_config("any").queue_max, 3);
    }

    #[test]
    fn test_load_file_rejects_non_object() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[1, 2, 3]").unwrap();

        let err = ModuleConfig::load_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("not a JSON object"));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            ModuleConfig::load_with_env(Some(&dir.path().join("missing.json")), Vec::new()).unwrap();
        assert!(config.get("queue_max").is_none());
        assert!(config.get("slack_url").is_none());
    }

    #[test]
    fn test_load_with_env_overlays_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"queue_max": 3}}"#).unwrap();

        let config = ModuleConfig::load_with_env(
            Some(file.path()),
            vec![
                ("PM2_SLACK_QUEUE_MAX".to_string(), "9".to_string()),
                ("PM2_SLACK_USERNAME".to_string(), "env-bot".to_string()),
            ],
        )
        .unwrap();
        let dest = config.destination_config("web");
        assert_eq!(dest.queue_max, 3);
        assert_eq!(dest.username.as_deref(), Some("env-bot"));
    }

    #[test]
    fn test_huge_buffer_values_are_capped() {
        let mut config = ModuleConfig::new();
        config.set("buffer_seconds", json!(1e30));
        config.set("buffer_max_seconds", "1e30");

        let dest = config.destination_config("web");
        assert_eq!(dest.buffer_seconds, MAX_BUFFER_SECONDS);
        assert_eq!(dest.buffer_max_seconds, MAX_BUFFER_SECONDS);
    }
}
