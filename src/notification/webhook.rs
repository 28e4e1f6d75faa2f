//! Slack Incoming Webhook 客户端模块
//!
//! 通过 HTTP POST 把 JSON payload 发送到 Webhook URL

use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

use super::channel::{Transport, TransportResponse, ACK_TOKEN};
use super::error::DeliveryError;
use crate::config::DEFAULT_TIMEOUT_SECONDS;

/// Webhook 客户端配置
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// 超时时间 (秒)
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

/// Slack Webhook 客户端
#[derive(Debug, Clone)]
pub struct SlackWebhookClient {
    client: Client,
}

impl SlackWebhookClient {
    /// 创建新的 Webhook 客户端
    pub fn new(config: WebhookConfig) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client })
    }
}

impl Transport for SlackWebhookClient {
    fn name(&self) -> &str {
        "slack-webhook"
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<TransportResponse, DeliveryError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(TransportResponse { status, body })
    }
}

/// Dry-run 传输：只打印 payload，不发送
#[derive(Debug, Clone, Default)]
pub struct DryRunTransport;

impl Transport for DryRunTransport {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<TransportResponse, DeliveryError> {
        info!(url = %redact_url(url), payload = %body, "[DRY-RUN] Would post to Slack");
        Ok(TransportResponse::new(200, ACK_TOKEN))
    }
}

/// 隐藏 URL 路径（Webhook 路径本身就是密钥）
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return "<invalid url>".to_string();
    };
    let host = rest.split('/').next().unwrap_or(rest);
    if host.len() == rest.len() {
        format!("{}://{}", scheme, host)
    } else {
        format!("{}://{}/…", scheme, host)
    }
}
