//! pm2-slack CLI
//!
//! 读取进程管理器事件流，按配置转发到 Slack

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pm2_slack::notification::deliver_batch;
use pm2_slack::{
    ingest, parse_log_line, DryRunTransport, EventKind, ModuleConfig, Notification,
    NotificationDispatcher, PayloadBuilder, SendResult, SlackWebhookClient, Transport,
    WebhookConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "pm2-slack")]
#[command(about = "把 pm2 进程事件转发到 Slack Incoming Webhook")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 读取 JSON Lines 事件流并转发（默认从 stdin 读取）
    Run {
        /// 配置文件路径
        #[arg(long, short)]
        config: Option<PathBuf>,
        /// 事件输入文件
        #[arg(long, short)]
        input: Option<PathBuf>,
        /// 只打印 payload，不真正发送
        #[arg(long)]
        dry_run: bool,
    },
    /// 立即发送一条测试消息
    Test {
        /// 配置文件路径
        #[arg(long, short)]
        config: Option<PathBuf>,
        /// 只打印 payload，不真正发送
        #[arg(long)]
        dry_run: bool,
        /// 来源进程名（决定使用哪个 Slack URL）
        #[arg(long, short, default_value = "pm2-slack-test")]
        name: String,
        /// 消息内容
        #[arg(long, short, default_value = "Test message from pm2-slack")]
        message: String,
    },
    /// 解析一行日志的时间戳前缀
    ParseLog {
        /// 日志行
        line: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 通过 RUST_LOG 环境变量控制日志级别，默认为 info
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pm2_slack=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, input, dry_run } => {
            let config = ModuleConfig::load(config.as_deref())?;
            if config.get("slack_url").is_none() {
                warn!("No global slack_url configured, only per-process URLs will be used");
            }

            if dry_run {
                run(config, Arc::new(DryRunTransport), input.as_deref()).await?;
            } else {
                let transport = webhook_transport(&config)?;
                run(config, Arc::new(transport), input.as_deref()).await?;
            }
        }
        Commands::Test { config, dry_run, name, message } => {
            let config = ModuleConfig::load(config.as_deref())?;
            let result = if dry_run {
                send_test(&config, &DryRunTransport, &name, &message).await
            } else {
                let transport = webhook_transport(&config)?;
                send_test(&config, &transport, &name, &message).await
            };

            match result {
                SendResult::Sent => println!("✅ 测试消息已发送"),
                SendResult::Skipped(reason) => {
                    println!("⏭️  未发送: {}", reason);
                    std::process::exit(1);
                }
                SendResult::Failed(reason) => {
                    eprintln!("❌ 发送失败: {}", reason);
                    std::process::exit(1);
                }
            }
        }
        Commands::ParseLog { line } => {
            let parsed = parse_log_line(&line);
            let output = serde_json::json!({
                "description": parsed.description,
                "timestamp": parsed.timestamp,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn webhook_transport(config: &ModuleConfig) -> Result<SlackWebhookClient> {
    let webhook_config = WebhookConfig {
        timeout_secs: config.timeout_seconds(),
    };
    SlackWebhookClient::new(webhook_config).context("Failed to build Slack webhook client")
}

async fn run<T: Transport>(config: ModuleConfig, transport: Arc<T>, input: Option<&Path>) -> Result<()> {
    let mut dispatcher = NotificationDispatcher::new(config, transport);

    let stats = match input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            info!(input = %path.display(), "Reading bus events");
            ingest(BufReader::new(file), &mut dispatcher).await?
        }
        None => {
            info!("Reading bus events from stdin");
            ingest(BufReader::new(tokio::io::stdin()), &mut dispatcher).await?
        }
    };

    info!(queues = dispatcher.queue_count(), routed = stats.routed, "Draining destination queues");
    dispatcher.shutdown().await;
    Ok(())
}

async fn send_test<T: Transport>(config: &ModuleConfig, transport: &T, name: &str, message: &str) -> SendResult {
    let mut destination = config.destination_config(name);
    destination.buffer = false;

    let notification = Notification::new(name, EventKind::Log)
        .with_description(message)
        .stamped_now();

    deliver_batch(vec![notification], &destination, transport, &PayloadBuilder::new()).await
}
