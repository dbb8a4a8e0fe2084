//! 单堆计时调度器（§9 "Timers"）。
//!
//! 每条呼叫腿最多一个未完成响应，用 `(expected-message, deadline)` 对表示；
//! 所有此类截止时刻放进同一个按 deadline 排序的堆里，调度器本身不起独立
//! 线程——事件循环轮询到期项。
//!
//! 一条腿的计时器可能被反复撤销/重建（`stop_cmd_timer`/`start_cmd_timer`），
//! 而堆不支持任意项删除，因此这里采用惰性失效：每个呼叫腿位置维护一个
//! 单调递增的 generation，入堆时记下当前 generation；轮询到期项时只有
//! generation 仍然匹配才算真正到期，否则说明该项早已被撤销或被更新的计时器
//! 取代，直接丢弃。

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

use crate::call::LegPosition;

type LegKey = (u64, LegPosition);

#[derive(Debug, Clone, Copy)]
struct ScheduledEntry {
    deadline: Instant,
    key: LegKey,
    generation: u64,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline)
    }
}

/// 惰性失效的单堆计时调度器。
#[derive(Debug, Default)]
pub struct TimerScheduler {
    heap: BinaryHeap<Reverse<ScheduledEntry>>,
    generations: HashMap<LegKey, u64>,
}

impl TimerScheduler {
    /// 构造一个空调度器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 为 `(call_id, position)` 装配一个新的截止时刻，使该位置此前任何
    /// 已入堆但尚未触发的条目失效。
    pub fn arm(&mut self, call_id: u64, position: LegPosition, deadline: Instant) {
        let key = (call_id, position);
        let generation = self.generations.entry(key).or_insert(0);
        *generation += 1;
        let generation = *generation;
        self.heap.push(Reverse(ScheduledEntry {
            deadline,
            key,
            generation,
        }));
    }

    /// 撤销 `(call_id, position)` 的计时器：使堆中残留条目（如果有）失效。
    pub fn disarm(&mut self, call_id: u64, position: LegPosition) {
        if let Some(generation) = self.generations.get_mut(&(call_id, position)) {
            *generation += 1;
        }
    }

    /// 弹出截至 `now` 为止所有仍然当前（未被撤销/取代）的到期项。
    pub fn poll_expired(&mut self, now: Instant) -> Vec<(u64, LegPosition)> {
        let mut fired = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let Reverse(entry) = self.heap.pop().expect("peek just confirmed an item");
            if self.generations.get(&entry.key).copied() == Some(entry.generation) {
                fired.push(entry.key);
            }
        }
        fired
    }

    /// 清理已销毁呼叫腿的 generation 记录，避免 `HashMap` 无限增长。
    pub fn forget(&mut self, call_id: u64, position: LegPosition) {
        self.generations.remove(&(call_id, position));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn stale_entry_does_not_fire_after_disarm() {
        let mut scheduler = TimerScheduler::new();
        let now = Instant::now();
        scheduler.arm(1, LegPosition::Initial, now + Duration::from_secs(5));
        scheduler.disarm(1, LegPosition::Initial);
        let fired = scheduler.poll_expired(now + Duration::from_secs(6));
        assert!(fired.is_empty());
    }

    #[test]
    fn rearming_invalidates_the_previous_entry() {
        let mut scheduler = TimerScheduler::new();
        let now = Instant::now();
        scheduler.arm(1, LegPosition::Initial, now + Duration::from_secs(1));
        scheduler.arm(1, LegPosition::Initial, now + Duration::from_secs(5));
        let fired_early = scheduler.poll_expired(now + Duration::from_secs(2));
        assert!(fired_early.is_empty(), "first arm must be invalidated by rearm");
        let fired_late = scheduler.poll_expired(now + Duration::from_secs(6));
        assert_eq!(fired_late, vec![(1, LegPosition::Initial)]);
    }

    #[test]
    fn independent_legs_fire_independently() {
        let mut scheduler = TimerScheduler::new();
        let now = Instant::now();
        scheduler.arm(1, LegPosition::Initial, now + Duration::from_secs(1));
        scheduler.arm(2, LegPosition::Remote, now + Duration::from_secs(1));
        scheduler.disarm(1, LegPosition::Initial);
        let fired = scheduler.poll_expired(now + Duration::from_secs(2));
        assert_eq!(fired, vec![(2, LegPosition::Remote)]);
    }
}
