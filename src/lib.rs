//! pm2-slack - 把进程管理器事件转发到 Slack Incoming Webhook

pub mod bus;
pub mod config;
pub mod notification;

pub use bus::{ingest, parse_log_line, parse_process_name, to_notification, BusEvent, IngestStats, ParsedLog, ProcessInfo};
pub use config::{DestinationConfig, ModuleConfig};
pub use notification::{
    compose, DeliveryError, DestinationQueue, DryRunTransport, EventKind, Notification,
    NotificationDispatcher, PayloadBuilder, Scheduler, SendResult, SlackPayload,
    SlackWebhookClient, Transport, WebhookConfig,
};
