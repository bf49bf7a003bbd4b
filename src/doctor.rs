//! Periodic health checker: probes dead backends and promotes them back to
//! alive after a run of clean probes. Biases toward avoiding premature
//! promotion of flapping nodes at the cost of a ~100-second recovery floor.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::FutureExt;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::BalancerError;
use crate::pool::{Backend, Pool};

const PROBE_ROUNDS: u32 = 10;
const PROBE_INTERVAL: Duration = Duration::from_secs(10);

pub type PingFuture = Pin<Box<dyn Future<Output = Result<(), BalancerError>> + Send>>;

/// Injected probe function: `ping(backend) -> Result<(), BalancerError>`.
pub trait PingHandler: Send + Sync {
    fn ping(&self, backend: Arc<Backend>) -> PingFuture;
}

impl<F> PingHandler for F
where
    F: Fn(Arc<Backend>) -> PingFuture + Send + Sync,
{
    fn ping(&self, backend: Arc<Backend>) -> PingFuture {
        (self)(backend)
    }
}

/// Contract: `health_check()` probes every currently-dead backend; `ping`
/// performs one probe and never leaves a fault unconverted to an error.
#[async_trait::async_trait]
pub trait Doctor: Send + Sync {
    async fn health_check(&self);
    async fn ping(&self, backend: Arc<Backend>) -> Result<(), BalancerError>;
}

pub trait DoctorBuilder: Send + Sync {
    fn build(&self, pool: Arc<Pool>, ping: Arc<dyn PingHandler>) -> Arc<dyn Doctor>;
    fn name(&self) -> &str;
}

pub struct DefaultDoctor {
    pool: Arc<Pool>,
    ping: Arc<dyn PingHandler>,
}

impl DefaultDoctor {
    pub fn new(pool: Arc<Pool>, ping: Arc<dyn PingHandler>) -> Self {
        Self { pool, ping }
    }
}

#[async_trait::async_trait]
impl Doctor for DefaultDoctor {
    async fn health_check(&self) {
        let dead: Vec<Arc<Backend>> = {
            let mut out = Vec::new();
            self.pool.range(|_, backend| {
                if !backend.state.alive() {
                    out.push(Arc::clone(backend));
                }
                true
            });
            out
        };

        let probes = dead.into_iter().map(|backend| {
            let doctor_ping = Arc::clone(&self.ping);
            async move {
                let mut failures = 0u32;
                for _ in 0..PROBE_ROUNDS {
                    if let Err(err) = run_ping(&*doctor_ping, Arc::clone(&backend)).await {
                        warn!(backend = %backend.url, error = %err, "probe failed");
                        failures += 1;
                    }
                    sleep(PROBE_INTERVAL).await;
                }

                if failures == 0 {
                    backend.state.set_alive(true);
                    info!(backend = %backend.url, "backend promoted to alive");
                }
            }
        });

        join_all(probes).await;
    }

    async fn ping(&self, backend: Arc<Backend>) -> Result<(), BalancerError> {
        run_ping(&*self.ping, backend).await
    }
}

/// Runs one probe, converting a panic inside the injected handler's future
/// into a `PingFailure` instead of tearing down the doctor or scheduler.
async fn run_ping(
    handler: &dyn PingHandler,
    backend: Arc<Backend>,
) -> Result<(), BalancerError> {
    let fut = handler.ping(backend);
    match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let msg = panic_message(payload);
            Err(BalancerError::PingFailure(msg))
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct DefaultDoctorBuilder;

impl DoctorBuilder for DefaultDoctorBuilder {
    fn build(&self, pool: Arc<Pool>, ping: Arc<dyn PingHandler>) -> Arc<dyn Doctor> {
        Arc::new(DefaultDoctor::new(pool, ping))
    }

    fn name(&self) -> &str {
        "Default"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use crate::pool::Backend;

    struct CountingPing {
        calls: Arc<AtomicU32>,
        should_fail: bool,
    }

    impl PingHandler for CountingPing {
        fn ping(&self, _backend: Arc<Backend>) -> PingFuture {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let fail = self.should_fail;
            Box::pin(async move {
                if fail {
                    Err(BalancerError::PingFailure("boom".into()))
                } else {
                    Ok(())
                }
            })
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn health_check_promotes_after_all_clean_probes() {
        let pool = Arc::new(Pool::new());
        pool.add(Backend::new("http://dead", 0));
        pool.get(0).unwrap().state.set_alive(false);

        let calls = Arc::new(AtomicU32::new(0));
        let ping = Arc::new(CountingPing {
            calls: Arc::clone(&calls),
            should_fail: false,
        });
        let doctor = DefaultDoctor::new(Arc::clone(&pool), ping);

        doctor.health_check().await;

        assert!(pool.get(0).unwrap().state.alive());
        assert_eq!(calls.load(Ordering::SeqCst), PROBE_ROUNDS);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn health_check_keeps_dead_after_any_failed_probe() {
        let pool = Arc::new(Pool::new());
        pool.add(Backend::new("http://dead", 0));
        pool.get(0).unwrap().state.set_alive(false);

        let calls = Arc::new(AtomicU32::new(0));
        let ping = Arc::new(CountingPing {
            calls: Arc::clone(&calls),
            should_fail: true,
        });
        let doctor = DefaultDoctor::new(Arc::clone(&pool), ping);

        doctor.health_check().await;

        assert!(!pool.get(0).unwrap().state.alive());
    }

    #[tokio::test]
    async fn health_check_skips_alive_backends() {
        let pool = Arc::new(Pool::new());
        pool.add(Backend::new("http://alive", 0));

        let calls = Arc::new(AtomicU32::new(0));
        let ping = Arc::new(CountingPing {
            calls: Arc::clone(&calls),
            should_fail: false,
        });
        let doctor = DefaultDoctor::new(pool, ping);

        doctor.health_check().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
