//! Client-side HTTP load-balancer core, plus a JSON-RPC reverse-proxy demo
//! built on top of it.
//!
//! The core (`pool`, `state`, `picker`, `doctor`, `scheduler`, `registry`,
//! `base`, `manager`, `fanout`, `statistic`, `httpclient`) is a standalone
//! library: pick a backend, dispatch a request through it, record the
//! outcome, keep it honest with a periodic health check. The demo layer
//! (`app_state`, `demo_health`, `handlers`, `keystore`, `mock`) is a
//! JSON-RPC proxy that wires the core up behind API-key auth, per-method
//! routing, and WebSocket passthrough.

pub mod app_state;
pub mod base;
pub mod config;
pub mod demo_health;
pub mod doctor;
pub mod error;
pub mod fanout;
pub mod handlers;
pub mod httpclient;
pub mod keystore;
pub mod manager;
pub mod mock;
pub mod picker;
pub mod pool;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod statistic;
pub mod util;

pub use base::{Balancer, BalancerBuilder, BalancerBody, BaseBuilder, DoneHandler, DoneInfo, Transport};
pub use config::Options;
pub use error::BalancerError;
pub use manager::Manager;
pub use pool::{Backend, Key, Pool};
