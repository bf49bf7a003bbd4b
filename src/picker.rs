//! Picker abstraction: select one alive backend per call. Ships a single
//! reference implementation, round-robin.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::BalancerError;
use crate::pool::Backend;
use crate::pool::Pool;

/// Selects the next backend to send a request to. Implementations are
/// constructed with a reference to the pool they pick from.
pub trait Picker: Send + Sync {
    fn pick(&self) -> Result<Arc<Backend>, BalancerError>;
}

/// Builds a `Picker` bound to a given pool.
pub trait PickerBuilder: Send + Sync {
    fn build(&self, pool: Arc<Pool>) -> Arc<dyn Picker>;
}

/// Reference round-robin picker. On each call, scans
/// `current+1, current+2, ..., current+len` (mod the current length),
/// returns the first alive backend, and advances the cursor to that index.
/// The cursor is picker-private; there is no guarantee of continuity across
/// picker rebuilds.
pub struct RoundRobinPicker {
    pool: Arc<Pool>,
    current: AtomicUsize,
}

impl RoundRobinPicker {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self {
            pool,
            current: AtomicUsize::new(0),
        }
    }
}

impl Picker for RoundRobinPicker {
    fn pick(&self) -> Result<Arc<Backend>, BalancerError> {
        let len = self.pool.len();
        if len == 0 {
            return Err(BalancerError::NoBackendAvailable);
        }

        let start = self.current.load(Ordering::SeqCst);
        let next = start.wrapping_add(1);

        for i in next..next + len {
            let idx = i % len;
            if let Some(backend) = self.pool.get(idx) {
                if backend.state.alive() {
                    self.current.store(idx, Ordering::SeqCst);
                    return Ok(backend);
                }
            }
        }

        Err(BalancerError::NoBackendAvailable)
    }
}

pub struct RoundRobinPickerBuilder;

impl PickerBuilder for RoundRobinPickerBuilder {
    fn build(&self, pool: Arc<Pool>) -> Arc<dyn Picker> {
        Arc::new(RoundRobinPicker::new(pool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Backend;

    fn pool_of(urls: &[&str]) -> Arc<Pool> {
        let pool = Arc::new(Pool::new());
        for u in urls {
            pool.add(Backend::new(*u, 0));
        }
        pool
    }

    #[test]
    fn round_robin_cycles_in_strict_order_when_all_alive() {
        let pool = pool_of(&["http://u1", "http://u2", "http://u3"]);
        let picker = RoundRobinPicker::new(pool);

        let picks: Vec<String> = (0..6).map(|_| picker.pick().unwrap().url.clone()).collect();
        assert_eq!(
            picks,
            vec!["u2", "u3", "u1", "u2", "u3", "u1"]
                .into_iter()
                .map(|s| format!("http://{s}"))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn round_robin_fails_on_empty_pool() {
        let pool = Arc::new(Pool::new());
        let picker = RoundRobinPicker::new(pool);
        assert!(matches!(
            picker.pick(),
            Err(BalancerError::NoBackendAvailable)
        ));
    }

    #[test]
    fn round_robin_skips_dead_backends() {
        let pool = pool_of(&["http://u1", "http://u2", "http://u3"]);
        pool.get(1).unwrap().state.set_alive(false);
        let picker = RoundRobinPicker::new(pool);

        for _ in 0..6 {
            let picked = picker.pick().unwrap();
            assert_ne!(picked.url, "http://u2");
        }
    }

    #[test]
    fn round_robin_fails_when_none_alive() {
        let pool = pool_of(&["http://u1", "http://u2"]);
        for i in 0..2 {
            pool.get(i).unwrap().state.set_alive(false);
        }
        let picker = RoundRobinPicker::new(pool);
        assert!(matches!(
            picker.pick(),
            Err(BalancerError::NoBackendAvailable)
        ));
    }

    #[test]
    fn fairness_over_many_picks() {
        let pool = pool_of(&["http://u1", "http://u2", "http://u3", "http://u4"]);
        let picker = RoundRobinPicker::new(pool);

        let mut counts = std::collections::HashMap::new();
        let n = 1000;
        for _ in 0..n {
            let url = picker.pick().unwrap().url.clone();
            *counts.entry(url).or_insert(0) += 1;
        }

        for count in counts.values() {
            assert!(*count == n / 4);
        }
    }
}
