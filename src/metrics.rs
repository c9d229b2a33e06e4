use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::info;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimerStats {
    pub total: Duration,
    pub calls: u64,
}

/// Wall-clock timers and counters owned by one process object.
#[derive(Debug, Default)]
pub struct ProcessTimers {
    role: String,
    timers: BTreeMap<&'static str, TimerStats>,
    counters: BTreeMap<&'static str, u64>,
    running: BTreeMap<&'static str, Instant>,
}

impl ProcessTimers {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            ..Self::default()
        }
    }

    pub fn start(&mut self, name: &'static str) {
        self.running.insert(name, Instant::now());
    }

    /// Stop a timer started with [`start`](Self::start). Unknown names are ignored.
    pub fn stop(&mut self, name: &'static str) {
        if let Some(started) = self.running.remove(name) {
            self.record(name, started.elapsed());
        }
    }

    fn record(&mut self, name: &'static str, elapsed: Duration) {
        let entry = self.timers.entry(name).or_default();
        entry.total += elapsed;
        entry.calls += 1;
    }

    pub fn add(&mut self, name: &'static str, amount: u64) {
        *self.counters.entry(name).or_insert(0) += amount;
    }

    pub fn counters(&self) -> BTreeMap<String, u64> {
        self.counters.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    pub fn log_summary(&self) {
        for (name, stats) in &self.timers {
            info!(
                role = %self.role,
                timer = name,
                calls = stats.calls,
                seconds = stats.total.as_secs_f64(),
                "timer"
            );
        }
        for (name, value) in &self.counters {
            info!(role = %self.role, counter = name, value, "counter");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_timer_counts_calls() {
        let mut timers = ProcessTimers::new("worker-1");
        for _ in 0..2 {
            timers.start("spread");
            timers.stop("spread");
        }
        assert_eq!(timers.timers["spread"].calls, 2);
        assert!(!timers.timers.contains_key("heartbeat"));
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let mut timers = ProcessTimers::new("aggregator");
        timers.stop("run");
        assert!(!timers.timers.contains_key("run"));
        timers.start("run");
        timers.stop("run");
        assert_eq!(timers.timers["run"].calls, 1);
    }

    #[test]
    fn test_counters_accumulate() {
        let mut timers = ProcessTimers::new("worker-2");
        timers.add("heartbeat_edges", 4);
        timers.add("heartbeat_edges", 6);
        assert_eq!(timers.counters().get("heartbeat_edges"), Some(&10));
        assert!(!timers.counters().contains_key("missing"));
    }
}
