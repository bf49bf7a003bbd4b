//! Builder + dispatch pipeline: assembles a `BalancerInstance` from `Options`
//! and routes individual requests across a backend pool.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use http_body_util::{BodyExt, Empty};
use hyper::{Request, Response};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::config::Options;
use crate::doctor::{Doctor, DoctorBuilder, PingFuture, PingHandler};
use crate::error::BalancerError;
use crate::picker::{Picker, PickerBuilder};
use crate::pool::{Backend, Pool};
use crate::registry::DoctorRegistry;
use crate::scheduler::{Job, Scheduler, DEFAULT_CRON_SPEC};
use crate::util::{url_join, with_scheme};

/// Demotion budget applied by the completion hook: a backend dies once it
/// accumulates 100 failures within a 600 second window.
const FAILURE_WINDOW_SECS: u64 = 600;
const FAILURE_BUDGET: usize = 100;

pub type BalancerBody = http_body_util::combinators::BoxBody<Bytes, BalancerError>;

fn empty_body() -> BalancerBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// Injected transport: sends one already-routed, absolute-URL request and
/// returns the raw response. Implemented by `crate::httpclient::HttpClient`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        req: Request<BalancerBody>,
    ) -> Result<Response<BalancerBody>, BalancerError>;
}

/// Everything the completion hook needs to know about one dispatched request.
pub struct DoneInfo {
    pub backend: Arc<Backend>,
    pub status: Option<u16>,
    pub error: Option<BalancerError>,
}

pub type DoneHandler = Arc<dyn Fn(DoneInfo) + Send + Sync>;

/// Takes a request, routes it to a backend (or passes it straight through
/// when the URL is already absolute), and returns the response.
#[async_trait::async_trait]
pub trait Balancer: Send + Sync {
    async fn do_request(
        &self,
        req: Request<BalancerBody>,
    ) -> Result<Response<BalancerBody>, BalancerError>;
    fn pick(&self) -> Result<Arc<Backend>, BalancerError>;
    fn backends(&self) -> Arc<Pool>;
    async fn close(&self);
}

#[async_trait::async_trait]
pub trait BalancerBuilder: Send + Sync {
    async fn build(&self, transport: Arc<dyn Transport>, opts: Options) -> Arc<dyn Balancer>;
    fn name(&self) -> &str;
}

/// Reference builder: wires a picker, an optional doctor on a scheduled job,
/// and statistics tracking around a fresh `Pool` built from `opts.urls`.
pub struct BaseBuilder {
    name: String,
    picker_builder: Arc<dyn PickerBuilder>,
    doctor_registry: Arc<DoctorRegistry>,
}

impl BaseBuilder {
    pub fn new(name: impl Into<String>, picker_builder: Arc<dyn PickerBuilder>) -> Self {
        let doctor_registry = Arc::new(DoctorRegistry::new());
        doctor_registry.register(Arc::new(crate::doctor::DefaultDoctorBuilder));
        Self {
            name: name.into(),
            picker_builder,
            doctor_registry,
        }
    }

    /// Overrides the default doctor registry, e.g. to make custom doctor
    /// types addressable by `opts.doctor.type`.
    pub fn with_doctor_registry(mut self, registry: Arc<DoctorRegistry>) -> Self {
        self.doctor_registry = registry;
        self
    }
}

#[async_trait::async_trait]
impl BalancerBuilder for BaseBuilder {
    async fn build(&self, transport: Arc<dyn Transport>, opts: Options) -> Arc<dyn Balancer> {
        let pool = Arc::new(Pool::new());
        for url in &opts.urls {
            pool.add(Backend::new(url.clone(), opts.cache_size));
        }

        let picker = self.picker_builder.build(Arc::clone(&pool));

        let mut scheduler = None;
        if opts.doctor.enable {
            let doctor_type = if opts.doctor.r#type.is_empty() {
                "Default"
            } else {
                opts.doctor.r#type.as_str()
            };

            if let Some(doctor_builder) = self.doctor_registry.get(doctor_type) {
                let ping_handler: Arc<dyn PingHandler> = opts
                    .ping_handler
                    .clone()
                    .unwrap_or_else(|| Arc::new(TransportPing::new(Arc::clone(&transport))));

                let doctor = doctor_builder.build(Arc::clone(&pool), ping_handler);
                let spec = if opts.doctor.spec.is_empty() {
                    DEFAULT_CRON_SPEC.to_string()
                } else {
                    opts.doctor.spec.clone()
                };

                let job_doctor = Arc::clone(&doctor);
                let job = Job::new(spec, move || {
                    let doctor = Arc::clone(&job_doctor);
                    async move { doctor.health_check().await }
                });

                match Scheduler::start(vec![job]).await {
                    Ok(started) => scheduler = Some(AsyncMutex::new(started)),
                    Err(err) => warn!(balancer = %opts.name, error = %err, "doctor scheduler failed to start"),
                }
            } else {
                warn!(balancer = %opts.name, doctor_type, "unknown doctor type, health checking disabled");
            }
        }

        info!(balancer = %opts.name, backends = opts.urls.len(), "balancer instance built");

        Arc::new(BaseBalancer {
            transport,
            picker,
            pool,
            done: opts.done_handler.clone(),
            statistic_enabled: opts.statistic.enable,
            scheduler,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct BaseBalancer {
    transport: Arc<dyn Transport>,
    picker: Arc<dyn Picker>,
    pool: Arc<Pool>,
    done: Option<DoneHandler>,
    statistic_enabled: bool,
    scheduler: Option<AsyncMutex<Scheduler>>,
}

#[async_trait::async_trait]
impl Balancer for BaseBalancer {
    async fn do_request(
        &self,
        req: Request<BalancerBody>,
    ) -> Result<Response<BalancerBody>, BalancerError> {
        let fut = self.dispatch(req);
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let msg = crate::doctor::panic_message(payload);
                Err(BalancerError::Internal(format!("Balancer.Do: {msg}")))
            }
        }
    }

    fn pick(&self) -> Result<Arc<Backend>, BalancerError> {
        self.picker.pick()
    }

    fn backends(&self) -> Arc<Pool> {
        Arc::clone(&self.pool)
    }

    async fn close(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.lock().await.stop().await;
        }
    }
}

impl BaseBalancer {
    async fn dispatch(
        &self,
        req: Request<BalancerBody>,
    ) -> Result<Response<BalancerBody>, BalancerError> {
        let url = req.uri().to_string();
        if url.starts_with("http://") || url.starts_with("https://") {
            return self.transport.send(req).await;
        }

        let backend = self.picker.pick()?;
        let backend_url = with_scheme(&backend.url);
        let joined = url_join(&[&backend_url, &url]);

        let (parts, body) = req.into_parts();
        let mut builder = Request::builder().method(parts.method).uri(&joined);
        *builder.headers_mut().unwrap() = parts.headers;
        let new_req = builder
            .body(body)
            .map_err(|e| BalancerError::Transport(e.to_string()))?;

        let result = self.transport.send(new_req).await;

        let status = result.as_ref().ok().map(|r| r.status().as_u16());
        let success = result.is_ok() && status.map(|s| s < 400).unwrap_or(false);

        if self.statistic_enabled {
            if success {
                backend.stats.inc_success();
            } else {
                backend.stats.inc_failure();
            }
        }

        match &result {
            Ok(_) if success => {}
            Ok(resp) => {
                let status = resp.status().as_u16();
                backend
                    .state
                    .add_fail(format!("upstream returned status {status}"));
                if backend.state.alive() {
                    backend.state.health_check(FAILURE_WINDOW_SECS, FAILURE_BUDGET);
                }
            }
            Err(err) => {
                backend.state.add_fail(err.to_string());
                if backend.state.alive() {
                    backend.state.health_check(FAILURE_WINDOW_SECS, FAILURE_BUDGET);
                }
            }
        }

        if let Some(done) = &self.done {
            done(DoneInfo {
                backend: Arc::clone(&backend),
                status,
                error: result.as_ref().err().cloned(),
            });
        }

        result
    }
}

/// Default ping handler when `opts.ping_handler` is not set: a plain GET
/// against the backend's own URL, alive iff the response status is < 400.
struct TransportPing {
    transport: Arc<dyn Transport>,
}

impl TransportPing {
    fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl PingHandler for TransportPing {
    fn ping(&self, backend: Arc<Backend>) -> PingFuture {
        let transport = Arc::clone(&self.transport);
        Box::pin(async move {
            let req = Request::builder()
                .method("GET")
                .uri(with_scheme(&backend.url))
                .body(empty_body())
                .map_err(|e| BalancerError::Transport(e.to_string()))?;
            let resp = transport.send(req).await?;
            if resp.status().as_u16() < 400 {
                Ok(())
            } else {
                Err(BalancerError::PingFailure(format!(
                    "status {}",
                    resp.status()
                )))
            }
        })
    }
}
