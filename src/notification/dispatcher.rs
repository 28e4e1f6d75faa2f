//! 通知分发器 - 按 Slack URL 把通知路由到各自的目标队列

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::channel::Transport;
use super::event::Notification;
use super::payload::PayloadBuilder;
use super::queue::DestinationQueue;
use super::webhook::redact_url;
use crate::config::ModuleConfig;

/// 通知分发器 - 持有 URL -> 队列映射，队列在第一次使用时创建
pub struct NotificationDispatcher<T: Transport> {
    /// 启动时读取的配置
    config: ModuleConfig,
    /// 出站传输（所有队列共享）
    transport: Arc<T>,
    /// 所有已创建的队列，键为 Slack URL
    queues: HashMap<String, DestinationQueue>,
    /// 覆盖主机名（用于测试）
    host_name: Option<String>,
}

impl<T: Transport> NotificationDispatcher<T> {
    /// 创建新的分发器
    pub fn new(config: ModuleConfig, transport: Arc<T>) -> Self {
        Self {
            config,
            transport,
            queues: HashMap::new(),
            host_name: None,
        }
    }

    /// 指定发送者主机名
    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = Some(host_name.into());
        self
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// 把通知交给对应的目标队列
    ///
    /// 没有配置 Slack URL 时静默丢弃（视为功能未启用）。
    pub fn route(&mut self, notification: Notification) {
        let source_name = notification.source_name.clone();
        let Some(url) = self.config.endpoint_for(&source_name) else {
            return;
        };

        if !self.queues.contains_key(&url) {
            let destination = self.config.destination_config(&source_name);
            info!(
                url = %redact_url(&url),
                source = %source_name,
                buffer = destination.buffering_enabled(),
                buffer_seconds = destination.buffer_seconds,
                buffer_max_seconds = destination.buffer_max_seconds,
                queue_max = destination.queue_max,
                "Creating destination queue"
            );
            let builder = match &self.host_name {
                Some(host) => PayloadBuilder::new().with_host_name(host.clone()),
                None => PayloadBuilder::new(),
            };
            let queue =
                DestinationQueue::spawn_with_builder(destination, Arc::clone(&self.transport), builder);
            self.queues.insert(url.clone(), queue);
        }

        if let Some(queue) = self.queues.get(&url) {
            queue.enqueue(notification);
        }
    }

    /// 已创建的队列数量
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// 是否已有该 URL 的队列
    pub fn has_queue(&self, url: &str) -> bool {
        self.queues.contains_key(url)
    }

    /// 关闭所有队列，等待已计时的批次发送完毕
    pub async fn shutdown(self) {
        for (_, queue) in self.queues {
            queue.close().await;
        }
    }
}
