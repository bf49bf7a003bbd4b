//! Process-wide registry of named balancer instances, with live
//! reconfiguration: `update_options` adds newly-listed backends and removes
//! ones no longer listed, without tearing down the balancer instance itself.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::base::{Balancer, BalancerBuilder, Transport};
use crate::config::Options;
use crate::error::BalancerError;
use crate::pool::Backend;
use crate::registry::BalancerRegistry;

pub type TransportFactory = Arc<dyn Fn(i64) -> Arc<dyn Transport> + Send + Sync>;

/// Owns live `Balancer` instances, keyed case-insensitively by name, and the
/// builder registry used to construct new ones on first request. A fresh HTTP
/// client is built per first-time registration, sized to that balancer's
/// configured timeout (spec.md's `manager.balancer` operation), rather than
/// one client shared across every timeout setting.
pub struct Manager {
    builders: Arc<BalancerRegistry>,
    balancers: RwLock<HashMap<String, Arc<dyn Balancer>>>,
    transport_factory: TransportFactory,
    self_ref: OnceLock<Weak<Manager>>,
}

impl Manager {
    /// Returns an `Arc<Manager>` rather than a bare `Manager`: the manager
    /// needs a handle to itself so `balancer()` can hand the observability
    /// endpoint (spec.md §4.8 step 3) an `Arc<Manager>` to query by name.
    pub fn new(builders: Arc<BalancerRegistry>, transport_factory: TransportFactory) -> Arc<Self> {
        let manager = Arc::new(Self {
            builders,
            balancers: RwLock::new(HashMap::new()),
            transport_factory,
            self_ref: OnceLock::new(),
        });
        let _ = manager.self_ref.set(Arc::downgrade(&manager));
        manager
    }

    /// Convenience constructor for callers with a single fixed `Transport`
    /// that ignores `opts.timeout` (e.g. a shared mock in tests).
    pub fn with_fixed_transport(builders: Arc<BalancerRegistry>, transport: Arc<dyn Transport>) -> Arc<Self> {
        Self::new(builders, Arc::new(move |_timeout| Arc::clone(&transport)))
    }

    pub async fn register(&self, name: &str, balancer: Arc<dyn Balancer>) {
        self.balancers.write().await.insert(name.to_lowercase(), balancer);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Balancer>> {
        self.balancers.read().await.get(&name.to_lowercase()).cloned()
    }

    /// Returns the existing instance for `opts.name`, or builds and
    /// registers a new one via the builder named `opts.type`. When
    /// `opts.statistic.enable` is set on a first-time build, also starts the
    /// observability endpoint on `opts.statistic.port` in a background task
    /// (spec.md §4.8 step 3).
    pub async fn balancer(&self, opts: Options) -> Result<Arc<dyn Balancer>, BalancerError> {
        let key = opts.name.to_lowercase();
        if let Some(existing) = self.balancers.read().await.get(&key).cloned() {
            return Ok(existing);
        }

        let builder = self
            .builders
            .get(&opts.r#type)
            .ok_or_else(|| BalancerError::Configuration(format!("unknown load balance type: {}", opts.r#type)))?;

        let name = opts.name.clone();
        let transport = (self.transport_factory)(opts.effective_timeout());
        let statistic = opts.statistic.clone();
        let instance = builder.build(transport, opts).await;
        self.balancers.write().await.insert(key, Arc::clone(&instance));
        info!(balancer = %name, "registered new balancer instance");

        if statistic.enable {
            match self.self_ref.get().and_then(Weak::upgrade) {
                Some(manager) => {
                    let port = statistic.port;
                    tokio::spawn(async move {
                        if let Err(err) = crate::statistic::serve(manager, port).await {
                            warn!(port, error = %err, "statistics server exited");
                        }
                    });
                }
                None => warn!(
                    balancer = %name,
                    "statistics enabled but manager has no self-reference, not starting endpoint"
                ),
            }
        }

        Ok(instance)
    }

    /// Reconciles each named balancer's pool against the listed URLs: adds
    /// backends present in `opts.urls` but missing from the pool, removes
    /// pool entries no longer listed. Unknown balancer names are skipped.
    pub async fn update_options(&self, opts_list: Vec<Options>) {
        let balancers = self.balancers.read().await;
        for opts in opts_list {
            let Some(balancer) = balancers.get(&opts.name.to_lowercase()) else {
                continue;
            };

            let pool = balancer.backends();
            let wanted: std::collections::HashSet<String> =
                opts.urls.iter().filter(|u| !u.is_empty()).cloned().collect();

            for url in &wanted {
                if pool.get(url.as_str()).is_none() {
                    pool.add(Backend::new(url.clone(), opts.cache_size));
                }
            }

            for existing_url in pool.urls() {
                if !wanted.contains(&existing_url) {
                    pool.delete(&existing_url);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{BalancerBody, BaseBuilder, DoneInfo};
    use crate::picker::RoundRobinPickerBuilder;
    use http_body_util::{BodyExt, Empty};
    use hyper::{Request, Response};

    struct NoopTransport;

    #[async_trait::async_trait]
    impl Transport for NoopTransport {
        async fn send(
            &self,
            _req: Request<BalancerBody>,
        ) -> Result<Response<BalancerBody>, BalancerError> {
            Response::builder()
                .status(200)
                .body(
                    Empty::<bytes::Bytes>::new()
                        .map_err(|never| match never {})
                        .boxed(),
                )
                .map_err(|e| BalancerError::Transport(e.to_string()))
        }
    }

    fn registry() -> Arc<BalancerRegistry> {
        let registry = BalancerRegistry::new();
        registry.register(Arc::new(BaseBuilder::new(
            "RoundRobin",
            Arc::new(RoundRobinPickerBuilder),
        )));
        Arc::new(registry)
    }

    fn opts(name: &str, urls: &[&str]) -> Options {
        Options {
            name: name.to_string(),
            r#type: "RoundRobin".to_string(),
            timeout: 0,
            cache_size: 0,
            net_param: String::new(),
            urls: urls.iter().map(|s| s.to_string()).collect(),
            doctor: Default::default(),
            statistic: Default::default(),
            done_handler: None,
            ping_handler: None,
        }
    }

    #[allow(dead_code)]
    fn _use(_: Option<DoneInfo>) {}

    #[tokio::test]
    async fn balancer_builds_once_and_is_cached_by_name() {
        let manager = Manager::with_fixed_transport(registry(), Arc::new(NoopTransport));
        let a = manager.balancer(opts("rpc", &["http://a"])).await.unwrap();
        let b = manager.balancer(opts("rpc", &["http://z"])).await.unwrap();
        assert_eq!(a.backends().len(), b.backends().len());
        assert_eq!(a.backends().urls(), vec!["http://a".to_string()]);
    }

    #[tokio::test]
    async fn balancer_rejects_unknown_type() {
        let manager = Manager::with_fixed_transport(registry(), Arc::new(NoopTransport));
        let mut opts = opts("rpc2", &["http://a"]);
        opts.r#type = "DoesNotExist".to_string();
        assert!(manager.balancer(opts).await.is_err());
    }

    #[tokio::test]
    async fn enabling_statistics_starts_the_observability_endpoint() {
        let manager = Manager::with_fixed_transport(registry(), Arc::new(NoopTransport));
        let mut built = opts("rpc-stats", &["http://a"]);
        built.statistic = crate::config::StatisticOptions {
            enable: true,
            port: 18453,
        };
        manager.balancer(built).await.unwrap();

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            if tokio::net::TcpStream::connect("127.0.0.1:18453").await.is_ok() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("statistics endpoint never started listening on the configured port");
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn update_options_adds_and_removes_backends() {
        let manager = Manager::with_fixed_transport(registry(), Arc::new(NoopTransport));
        manager
            .balancer(opts("rpc3", &["http://a", "http://b"]))
            .await
            .unwrap();

        manager
            .update_options(vec![opts("rpc3", &["http://b", "http://c"])])
            .await;

        let balancer = manager.get("rpc3").await.unwrap();
        let mut urls = balancer.backends().urls();
        urls.sort();
        assert_eq!(urls, vec!["http://b".to_string(), "http://c".to_string()]);
    }
}
