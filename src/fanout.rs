//! Deterministic key-hashed fan-out: maps one request to three backends and
//! dispatches concurrently, returning the first result once every dispatch
//! has completed, short-circuiting on the first error encountered.
//!
//! Per spec.md §4.10 step 1, an empty routing key does not hash to anything —
//! it falls back to three independent picker picks, the same as the original
//! `vapor/client.go` `SubmitTx`'s `len(guid) == 0` branch. Only a non-empty
//! key takes the deterministic `hash(key + "1"/"2"/"3") mod len` path.

use futures_util::future::join_all;

use crate::error::BalancerError;
use crate::picker::Picker;
use crate::pool::Pool;
use crate::util::hash_code;

/// `key` is combined with "1", "2", "3" suffixes and hashed to three
/// (possibly repeating) indices into `pool`'s current URL snapshot. Callers
/// with a possibly-empty key should go through `route` instead.
pub fn route_urls(pool: &Pool, key: &str) -> Result<Vec<String>, BalancerError> {
    let snapshot = pool.snapshot();
    if snapshot.is_empty() {
        return Err(BalancerError::NoBackendAvailable);
    }
    let len = snapshot.len();

    let mut urls = Vec::with_capacity(3);
    for suffix in ["1", "2", "3"] {
        let code = hash_code(&format!("{key}{suffix}"));
        let idx = (code as i64).rem_euclid(len as i64) as usize;
        urls.push(snapshot[idx].1.clone());
    }
    Ok(urls)
}

/// Resolves the three backend URLs a fan-out request targets: three
/// independent picker picks when `key` is empty, otherwise the deterministic
/// key-hashed indices from `route_urls`.
pub fn route(pool: &Pool, picker: &dyn Picker, key: &str) -> Result<Vec<String>, BalancerError> {
    if key.is_empty() {
        let mut urls = Vec::with_capacity(3);
        for _ in 0..3 {
            urls.push(picker.pick()?.url.clone());
        }
        Ok(urls)
    } else {
        route_urls(pool, key)
    }
}

/// Dispatches `send` against the three URLs `key` (or the picker, if `key`
/// is empty) resolves to, concurrently, and returns the first response once
/// all three have completed. Any individual failure fails the whole fan-out.
pub async fn dispatch<F, Fut, T>(
    pool: &Pool,
    picker: &dyn Picker,
    key: &str,
    send: F,
) -> Result<T, BalancerError>
where
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = Result<T, BalancerError>>,
    T: Clone,
{
    let urls = route(pool, picker, key)?;

    let futures = urls.into_iter().map(&send);
    let results = join_all(futures).await;

    let mut first = None;
    for result in results {
        let value = result?;
        if first.is_none() {
            first = Some(value);
        }
    }

    first.ok_or_else(|| BalancerError::Internal("fan-out produced no results".to_string()))
}
