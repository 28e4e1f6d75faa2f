//! 通知投递管道 - 从事件到 Slack 消息
//!
//! # 数据流
//! 1. `NotificationDispatcher` 根据来源选择 Slack URL，首次使用时创建 `DestinationQueue`
//! 2. `DestinationQueue` 直接发送（未启用缓冲）或加入缓冲，由 `Scheduler` 决定何时发送
//! 3. 发送时 `compose` 截断并合并相邻消息，追加抑制提示
//! 4. `PayloadBuilder` 渲染为 Slack payload，经 `Transport` 发送
//!
//! # 使用示例
//! ```ignore
//! use std::sync::Arc;
//! use pm2_slack::config::ModuleConfig;
//! use pm2_slack::notification::{NotificationDispatcher, SlackWebhookClient, WebhookConfig};
//!
//! let transport = Arc::new(SlackWebhookClient::new(WebhookConfig::default())?);
//! let mut dispatcher = NotificationDispatcher::new(ModuleConfig::load(None)?, transport);
//! dispatcher.route(Notification::new("web", EventKind::Start));
//! ```

pub mod channel;
pub mod compositor;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod payload;
pub mod queue;
pub mod scheduler;
pub mod severity;
pub mod webhook;

pub use channel::{SendResult, Transport, TransportResponse, ACK_TOKEN};
pub use compositor::{compose, merge_adjacent, ComposedBatch};
pub use dispatcher::NotificationDispatcher;
pub use error::DeliveryError;
pub use event::{EventKind, Notification};
pub use payload::{escape_slack_text, PayloadBuilder, SlackAttachment, SlackPayload};
pub use queue::{deliver, deliver_batch, DestinationQueue};
pub use scheduler::{ScheduleOutcome, Scheduler, SchedulerState};
pub use severity::{get_severity, Severity};
pub use webhook::{redact_url, DryRunTransport, SlackWebhookClient, WebhookConfig};
