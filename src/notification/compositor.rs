//! 批量合成器 - 截断、合并相邻重复消息、追加抑制提示
//!
//! ## 合成规则
//! 1. `max_batch_size > 0` 时只保留前 N 条，其余计入抑制数量
//! 2. 与前一条保留消息来源和事件类型都相同的消息，正文追加到前一条（换行分隔）
//! 3. 只合并相邻消息，不跨越其他来源
//! 4. 抑制数量大于 0 时追加一条 `suppressed` 提示

use tracing::debug;

use super::event::Notification;

/// 合成结果
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedBatch {
    /// 合并后的消息（包含抑制提示）
    pub kept: Vec<Notification>,
    /// 被丢弃的消息数量
    pub suppressed_count: usize,
}

/// 合成一批待发送消息
pub fn compose(raw_batch: Vec<Notification>, max_batch_size: usize) -> ComposedBatch {
    let mut kept_raw = raw_batch;
    let overflow = if max_batch_size > 0 && kept_raw.len() > max_batch_size {
        kept_raw.split_off(max_batch_size)
    } else {
        Vec::new()
    };
    let suppressed_count = overflow.len();

    let mut kept = merge_adjacent(kept_raw);

    if suppressed_count > 0 {
        debug!(suppressed = suppressed_count, "Batch exceeds queue_max, suppressing overflow");
        kept.push(Notification::suppressed(suppressed_count));
    }

    ComposedBatch {
        kept,
        suppressed_count,
    }
}

/// 合并相邻的同来源、同事件类型消息
///
/// 合并后的消息保留第一条的时间戳。
pub fn merge_adjacent(notifications: Vec<Notification>) -> Vec<Notification> {
    let mut merged: Vec<Notification> = Vec::with_capacity(notifications.len());

    for current in notifications {
        match merged.last_mut() {
            Some(previous) if previous.same_origin(&current) => {
                previous.description = join_descriptions(
                    previous.description.take(),
                    current.description,
                );
            }
            _ => merged.push(current),
        }
    }

    merged
}

/// 缺失的正文按空字符串处理；两边都缺失时结果仍为缺失
fn join_descriptions(previous: Option<String>, current: Option<String>) -> Option<String> {
    match (previous, current) {
        (None, None) => None,
        (previous, current) => Some(format!(
            "{}\n{}",
            previous.unwrap_or_default(),
            current.unwrap_or_default()
        )),
    }
}
