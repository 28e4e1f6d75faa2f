//! 目标队列 - 每个 Slack URL 一个独立的缓冲队列
//!
//! # 结构
//! - 缓冲任务：持有待发送列表和 [`Scheduler`]，定时到期时整体取出一批
//! - 发送任务：按顺序逐批合成、格式化、发送，同一目标内严格保持到达顺序
//!
//! `enqueue` 只往 channel 里写入，立即返回，不等待发送结果。
//! 未启用缓冲时，消息作为单条批次直接交给发送任务，不经过缓冲状态。

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, warn};

use super::channel::{SendResult, Transport};
use super::compositor::compose;
use super::error::DeliveryError;
use super::event::Notification;
use super::payload::{PayloadBuilder, SlackPayload};
use super::scheduler::{ScheduleOutcome, Scheduler};
use super::webhook::redact_url;
use crate::config::DestinationConfig;

/// 目标队列句柄
pub struct DestinationQueue {
    config: Arc<DestinationConfig>,
    /// 缓冲任务入口（未启用缓冲时为 None）
    inbox: Option<mpsc::UnboundedSender<Notification>>,
    /// 发送任务入口
    outbox: mpsc::UnboundedSender<Vec<Notification>>,
    buffer_task: Option<JoinHandle<()>>,
    delivery_task: JoinHandle<()>,
}

impl DestinationQueue {
    /// 创建队列并启动后台任务（需要在 tokio runtime 中调用）
    pub fn spawn<T: Transport>(config: DestinationConfig, transport: Arc<T>) -> Self {
        Self::spawn_with_builder(config, transport, PayloadBuilder::new())
    }

    /// 指定 PayloadBuilder 创建队列（用于测试）
    pub fn spawn_with_builder<T: Transport>(
        config: DestinationConfig,
        transport: Arc<T>,
        builder: PayloadBuilder,
    ) -> Self {
        let config = Arc::new(config);

        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let delivery_task = tokio::spawn(run_delivery(
            outbox_rx,
            Arc::clone(&config),
            transport,
            builder,
        ));

        let (inbox, buffer_task) = if config.buffering_enabled() {
            let (tx, rx) = mpsc::unbounded_channel();
            let task = tokio::spawn(run_buffer(
                rx,
                Scheduler::from_config(&config),
                outbox.clone(),
            ));
            (Some(tx), Some(task))
        } else {
            (None, None)
        };

        Self {
            config,
            inbox,
            outbox,
            buffer_task,
            delivery_task,
        }
    }

    pub fn config(&self) -> &DestinationConfig {
        &self.config
    }

    /// 加入队列；未启用缓冲时立即作为单条批次发送
    pub fn enqueue(&self, notification: Notification) {
        let sent = match &self.inbox {
            Some(inbox) => inbox.send(notification).is_ok(),
            None => self.outbox.send(vec![notification]).is_ok(),
        };
        if !sent {
            warn!("Destination queue is closed, notification dropped");
        }
    }

    /// 关闭队列：不再接收新消息，等已计时的批次按原定时间发送完毕
    pub async fn close(self) {
        let Self {
            inbox,
            outbox,
            buffer_task,
            delivery_task,
            ..
        } = self;

        drop(inbox);
        if let Some(task) = buffer_task {
            if let Err(e) = task.await {
                error!(error = %e, "Buffer task terminated abnormally");
            }
        }

        drop(outbox);
        if let Err(e) = delivery_task.await {
            error!(error = %e, "Delivery task terminated abnormally");
        }
    }
}

/// 缓冲任务：收集消息，定时到期时把整批交给发送任务
async fn run_buffer(
    mut inbox: mpsc::UnboundedReceiver<Notification>,
    mut scheduler: Scheduler,
    outbox: mpsc::UnboundedSender<Vec<Notification>>,
) {
    let mut pending: Vec<Notification> = Vec::new();

    loop {
        let deadline = scheduler.deadline();
        tokio::select! {
            received = inbox.recv() => match received {
                Some(notification) => {
                    pending.push(notification);
                    match scheduler.schedule() {
                        ScheduleOutcome::Ignored => {}
                        outcome => debug!(?outcome, pending = pending.len(), "Flush scheduled"),
                    }
                }
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if scheduler.poll_expired(Instant::now()) {
                    flush(&mut pending, &outbox);
                }
            }
        }
    }

    // 输入已关闭：已计时的批次仍按原定时间发送
    if let Some(deadline) = scheduler.deadline() {
        sleep_until(deadline).await;
        scheduler.poll_expired(deadline);
    }
    flush(&mut pending, &outbox);
}

/// 取出当前所有待发送消息
fn flush(pending: &mut Vec<Notification>, outbox: &mpsc::UnboundedSender<Vec<Notification>>) {
    if pending.is_empty() {
        return;
    }
    let batch = std::mem::take(pending);
    if outbox.send(batch).is_err() {
        warn!("Delivery task is gone, batch dropped");
    }
}

/// 发送任务：按顺序逐批发送
async fn run_delivery<T: Transport>(
    mut outbox: mpsc::UnboundedReceiver<Vec<Notification>>,
    config: Arc<DestinationConfig>,
    transport: Arc<T>,
    builder: PayloadBuilder,
) {
    while let Some(batch) = outbox.recv().await {
        deliver_batch(batch, &config, transport.as_ref(), &builder).await;
    }
}

/// 合成、格式化并发送一批消息
///
/// 所有失败都只记录日志，不重试。
pub async fn deliver_batch<T: Transport>(
    batch: Vec<Notification>,
    config: &DestinationConfig,
    transport: &T,
    builder: &PayloadBuilder,
) -> SendResult {
    let Some(url) = config.slack_url.as_deref() else {
        let err = DeliveryError::MissingUrl;
        error!(error = %err, "Cannot deliver notifications");
        return SendResult::Skipped(err.to_string());
    };

    if batch.is_empty() {
        return SendResult::Skipped("empty batch".to_string());
    }

    let count = batch.len();
    let composed = compose(batch, config.queue_max);
    let payload = builder.build(&composed.kept, config);

    match deliver(&payload, url, transport).await {
        Ok(()) => {
            debug!(
                url = %redact_url(url),
                count,
                suppressed = composed.suppressed_count,
                transport = transport.name(),
                "Notifications delivered"
            );
            SendResult::Sent
        }
        Err(e @ DeliveryError::Rejected { .. }) => {
            error!(
                url = %redact_url(url),
                error = %e,
                lost = count,
                "Error sending notification to Slack, verify that the Slack URL for incoming webhooks is correct"
            );
            SendResult::Failed(e.to_string())
        }
        Err(e) => {
            error!(url = %redact_url(url), error = %e, lost = count, "Failed to send notification to Slack");
            SendResult::Failed(e.to_string())
        }
    }
}

/// 发送已渲染的 payload，响应体必须正好是确认响应
pub async fn deliver<T: Transport>(
    payload: &SlackPayload,
    url: &str,
    transport: &T,
) -> Result<(), DeliveryError> {
    let body = serde_json::to_value(payload)?;
    let response = transport.post_json(url, &body).await?;

    if response.is_ack() {
        Ok(())
    } else {
        Err(DeliveryError::Rejected {
            status: response.status,
            body: response.body,
        })
    }
}
