//! Per-backend liveness (bounded, time-windowed failure log) and statistics.
//!
//! `alive` and `failures` are guarded by two independent locks so that a
//! reader of `alive` never waits behind a writer appending to the failure
//! log, and vice versa.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

const MAX_FAILURES: usize = 100;

#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub timestamp: u64,
    pub error: String,
}

/// Liveness flag plus a bounded, ordered-by-timestamp failure log.
#[derive(Debug, Default)]
pub struct BackendState {
    alive: RwLock<bool>,
    failures: RwLock<VecDeque<FailureRecord>>,
}

impl BackendState {
    pub fn new() -> Self {
        Self {
            alive: RwLock::new(true),
            failures: RwLock::new(VecDeque::new()),
        }
    }

    pub fn set_alive(&self, alive: bool) {
        *self.alive.write().unwrap() = alive;
    }

    pub fn alive(&self) -> bool {
        *self.alive.read().unwrap()
    }

    /// Append a failure, evicting the single oldest entry first if the log
    /// is already at capacity.
    pub fn add_fail(&self, error: impl Into<String>) {
        let mut failures = self.failures.write().unwrap();
        if failures.len() >= MAX_FAILURES {
            failures.pop_front();
        }
        failures.push_back(FailureRecord {
            timestamp: now_unix(),
            error: error.into(),
        });
    }

    /// Drop the prefix of records older than `window_secs`. Records are
    /// appended in time order, so a single left-to-right scan that stops at
    /// the first still-fresh record suffices.
    pub fn clean_fail(&self, window_secs: u64) {
        let mut failures = self.failures.write().unwrap();
        let now = now_unix();
        while let Some(front) = failures.front() {
            if now.saturating_sub(front.timestamp) >= window_secs {
                failures.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len_fail(&self) -> usize {
        self.failures.read().unwrap().len()
    }

    /// Clean the window, then demote to dead if the failure budget is
    /// exceeded. Returns `true` iff the backend is still considered alive.
    pub fn health_check(&self, window_secs: u64, max: usize) -> bool {
        self.clean_fail(window_secs);
        if self.len_fail() >= max {
            self.set_alive(false);
            return false;
        }
        true
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Monotonically non-decreasing success/failure counters. Reads never block;
/// overflow wraps silently (documented, never expected in a process lifetime).
#[derive(Debug, Default)]
pub struct Statistics {
    success: AtomicU64,
    failure: AtomicU64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    pub fn inc_success(&self) -> u64 {
        self.success.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn failure(&self) -> u64 {
        self.failure.load(Ordering::Relaxed)
    }

    pub fn inc_failure(&self) -> u64 {
        self.failure.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn fresh_state_is_alive_with_no_failures() {
        let s = BackendState::new();
        assert!(s.alive());
        assert_eq!(s.len_fail(), 0);
    }

    #[test]
    fn add_fail_evicts_oldest_on_overflow() {
        let s = BackendState::new();
        for i in 0..MAX_FAILURES + 5 {
            s.add_fail(format!("err-{i}"));
        }
        assert_eq!(s.len_fail(), MAX_FAILURES);
    }

    #[test]
    fn clean_fail_is_idempotent() {
        let s = BackendState::new();
        s.add_fail("a");
        s.add_fail("b");
        s.clean_fail(600);
        let first = s.len_fail();
        s.clean_fail(600);
        assert_eq!(s.len_fail(), first);
    }

    #[test]
    fn clean_fail_drops_expired_prefix_only() {
        let s = BackendState::new();
        s.add_fail("old");
        sleep(Duration::from_millis(1100));
        s.add_fail("new");
        s.clean_fail(1);
        assert_eq!(s.len_fail(), 1);
    }

    #[test]
    fn health_check_demotes_past_budget() {
        let s = BackendState::new();
        for _ in 0..100 {
            s.add_fail("x");
        }
        assert!(!s.health_check(600, 100));
        assert!(!s.alive());
    }

    #[test]
    fn health_check_keeps_alive_under_budget() {
        let s = BackendState::new();
        for _ in 0..99 {
            s.add_fail("x");
        }
        assert!(s.health_check(600, 100));
        assert!(s.alive());
    }

    #[test]
    fn statistics_increment_and_read() {
        let stats = Statistics::new();
        stats.inc_success();
        stats.inc_success();
        stats.inc_failure();
        assert_eq!(stats.success(), 2);
        assert_eq!(stats.failure(), 1);
    }
}
