//! 延迟发送调度器 - 带上限的防抖
//!
//! 每条新消息到达都会重新开始等待窗口（把突发消息合并为一次发送），
//! 但累计延迟不会超过 `max_total`，持续到达的消息也无法无限推迟发送。
//!
//! 调度器本身不持有定时任务，只维护 Idle / Armed 状态和截止时间，
//! 由队列任务负责在截止时间到达时调用 [`Scheduler::poll_expired`]。
//! 所有方法都接受外部传入的 `now`，测试无需真实等待。

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{DestinationConfig, MAX_BUFFER_SECONDS};

/// 单次窗口和累计上限的最大值
pub const MAX_POSTPONEMENT: Duration = Duration::from_secs(MAX_BUFFER_SECONDS);

/// 调度请求的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// 从 Idle 进入 Armed
    Armed(Instant),
    /// 取消旧的定时并重新计时
    Rearmed(Instant),
    /// 达到累计延迟上限，保持原有定时不变
    Ignored,
}

/// 调度器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Armed { deadline: Instant },
}

/// 带累计上限的防抖调度器
#[derive(Debug)]
pub struct Scheduler {
    /// 防抖窗口
    window: Duration,
    /// 累计延迟上限（None 表示不限制）
    max_total: Option<Duration>,
    /// 当前状态
    state: SchedulerState,
    /// 自上次发送以来累计的延迟
    accumulated: Duration,
}

impl Scheduler {
    /// 创建调度器；`max_total` 为零视为不限制
    ///
    /// 窗口和上限都不超过 [`MAX_POSTPONEMENT`]；窗口大于上限时按上限计，
    /// 保证空闲状态下的第一次请求总能开始计时。
    pub fn new(window: Duration, max_total: Option<Duration>) -> Self {
        let max_total = max_total
            .filter(|max| !max.is_zero())
            .map(|max| max.min(MAX_POSTPONEMENT));
        let window = match max_total {
            Some(max) => window.min(max),
            None => window.min(MAX_POSTPONEMENT),
        };

        Self {
            window,
            max_total,
            state: SchedulerState::Idle,
            accumulated: Duration::ZERO,
        }
    }

    /// 实际使用的防抖窗口
    pub fn window(&self) -> Duration {
        self.window
    }

    /// 从目标配置创建
    pub fn from_config(config: &DestinationConfig) -> Self {
        Self::new(
            Duration::from_secs(config.buffer_seconds),
            Some(Duration::from_secs(config.buffer_max_seconds)),
        )
    }

    /// 请求延迟发送（使用当前时间）
    pub fn schedule(&mut self) -> ScheduleOutcome {
        self.schedule_at(Instant::now())
    }

    /// 请求延迟发送（带时间，用于测试）
    pub fn schedule_at(&mut self, now: Instant) -> ScheduleOutcome {
        if let Some(max_total) = self.max_total {
            if self.accumulated.saturating_add(self.window) > max_total {
                debug!(
                    accumulated_secs = self.accumulated.as_secs_f64(),
                    max_secs = max_total.as_secs_f64(),
                    "Postponement ceiling reached, keeping current timer"
                );
                return ScheduleOutcome::Ignored;
            }
        }

        let deadline = now + self.window;
        let was_armed = self.is_armed();
        self.state = SchedulerState::Armed { deadline };
        self.accumulated = self.accumulated.saturating_add(self.window);

        if was_armed {
            ScheduleOutcome::Rearmed(deadline)
        } else {
            ScheduleOutcome::Armed(deadline)
        }
    }

    /// 检查定时是否到期；到期则回到 Idle、清零累计延迟并返回 `true`
    ///
    /// 每个定时只会返回一次 `true`，调用方据此执行一次发送。
    pub fn poll_expired(&mut self, now: Instant) -> bool {
        match self.state {
            SchedulerState::Armed { deadline } if deadline <= now => {
                self.state = SchedulerState::Idle;
                self.accumulated = Duration::ZERO;
                true
            }
            _ => false,
        }
    }

    /// 当前截止时间
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            SchedulerState::Armed { deadline } => Some(deadline),
            SchedulerState::Idle => None,
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, SchedulerState::Armed { .. })
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// 自上次发送以来累计的延迟
    pub fn accumulated(&self) -> Duration {
        self.accumulated
    }
}
