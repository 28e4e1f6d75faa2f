//! 发送通道 trait 定义

use serde_json::Value;
use std::future::Future;

use super::error::DeliveryError;

/// Slack Incoming Webhook 的确认响应
pub const ACK_TOKEN: &str = "ok";

/// HTTP 响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 响应体是否正好是确认响应
    pub fn is_ack(&self) -> bool {
        self.body == ACK_TOKEN
    }
}

/// 发送结果
#[derive(Debug, Clone, PartialEq)]
pub enum SendResult {
    /// 发送成功
    Sent,
    /// 跳过（没有可发送的内容或配置缺失）
    Skipped(String),
    /// 发送失败
    Failed(String),
}

/// 出站传输 trait：POST 一个 JSON 文档，返回状态码和响应体
pub trait Transport: Send + Sync + 'static {
    /// 传输名称（用于日志）
    fn name(&self) -> &str;

    /// 发送 JSON
    fn post_json(
        &self,
        url: &str,
        body: &Value,
    ) -> impl Future<Output = Result<TransportResponse, DeliveryError>> + Send;
}
