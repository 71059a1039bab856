//! Usage history behind a trait, plus the background recorder tasks that
//! feed it. The in-repo store is a bounded in-memory ring; deployments that
//! want durable history swap in a database-backed implementation.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::inspector;
use crate::state::AppState;
use crate::types::{NetworkCounters, UsagePoint};

/// How many points a topic snapshot carries.
pub const HISTORY_WINDOW: usize = 50;

const HISTORY_CAP: usize = 1024;

pub trait HistoryStore: Send + Sync {
    fn record_cpu(&self, usage: f32);
    fn record_memory(&self, usage: f32);
    fn record_network(&self, counters: &[NetworkCounters]);

    /// Most recent samples, newest first.
    fn recent_cpu(&self, limit: usize) -> Vec<UsagePoint>;
    fn recent_memory(&self, limit: usize) -> Vec<UsagePoint>;
    fn recent_network(&self, limit: usize) -> Vec<NetworkCounters>;
}

#[derive(Default)]
pub struct MemoryHistory {
    cpu: Mutex<VecDeque<UsagePoint>>,
    memory: Mutex<VecDeque<UsagePoint>>,
    network: Mutex<VecDeque<NetworkCounters>>,
}

fn push_bounded<T>(ring: &Mutex<VecDeque<T>>, item: T) {
    let mut ring = ring.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    ring.push_back(item);
    while ring.len() > HISTORY_CAP {
        ring.pop_front();
    }
}

fn recent<T: Clone>(ring: &Mutex<VecDeque<T>>, limit: usize) -> Vec<T> {
    let ring = ring.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    ring.iter().rev().take(limit).cloned().collect()
}

impl HistoryStore for MemoryHistory {
    fn record_cpu(&self, usage: f32) {
        push_bounded(
            &self.cpu,
            UsagePoint {
                recorded_at: Utc::now(),
                usage,
            },
        );
    }

    fn record_memory(&self, usage: f32) {
        push_bounded(
            &self.memory,
            UsagePoint {
                recorded_at: Utc::now(),
                usage,
            },
        );
    }

    fn record_network(&self, counters: &[NetworkCounters]) {
        for c in counters {
            push_bounded(&self.network, c.clone());
        }
    }

    fn recent_cpu(&self, limit: usize) -> Vec<UsagePoint> {
        recent(&self.cpu, limit)
    }

    fn recent_memory(&self, limit: usize) -> Vec<UsagePoint> {
        recent(&self.memory, limit)
    }

    fn recent_network(&self, limit: usize) -> Vec<NetworkCounters> {
        recent(&self.network, limit)
    }
}

// ---------- Recorder tasks ----------

/// Spawns the process-lifetime sampling jobs that keep the history store
/// populated for the cpu/memory/network topics.
pub fn spawn_recorders(state: AppState) -> Vec<JoinHandle<()>> {
    vec![
        spawn_cpu_recorder(state.clone(), Duration::from_secs(1)),
        spawn_memory_recorder(state.clone(), Duration::from_secs(1)),
        spawn_network_recorder(state, Duration::from_secs(5)),
    ]
}

fn spawn_cpu_recorder(state: AppState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(period);
        loop {
            ticker.tick().await;
            let usage = inspector::cpu_usage_percent(&state).await;
            state.history.record_cpu(usage);
        }
    })
}

fn spawn_memory_recorder(state: AppState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(period);
        loop {
            ticker.tick().await;
            let usage = inspector::memory_usage_percent(&state).await;
            state.history.record_memory(usage);
        }
    })
}

fn spawn_network_recorder(state: AppState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(period);
        loop {
            ticker.tick().await;
            let counters = inspector::network_counters(&state).await;
            state.history.record_network(&counters);
        }
    })
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut t = tokio::time::interval(period);
    t.set_missed_tick_behavior(MissedTickBehavior::Delay);
    t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_returns_newest_first() {
        let store = MemoryHistory::default();
        store.record_cpu(1.0);
        store.record_cpu(2.0);
        store.record_cpu(3.0);
        let points = store.recent_cpu(2);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].usage, 3.0);
        assert_eq!(points[1].usage, 2.0);
    }

    #[test]
    fn ring_is_bounded() {
        let store = MemoryHistory::default();
        for i in 0..(HISTORY_CAP + 10) {
            store.record_memory(i as f32);
        }
        let all = store.recent_memory(usize::MAX);
        assert_eq!(all.len(), HISTORY_CAP);
        // oldest entries were evicted
        assert_eq!(all[0].usage, (HISTORY_CAP + 9) as f32);
    }
}
