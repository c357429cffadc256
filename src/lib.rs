//! Routing core for an HTTP reverse proxy.
//!
//! Two subsystems carry the load: a concurrent [`registry`] mapping
//! host+path URIs to pools of backend endpoints with TTL-based eviction,
//! and a [`proxy`] round tripper that selects an endpoint, forwards the
//! request, retries retryable network failures, and surfaces uniform
//! gateway-error semantics. The listener, control-plane ingest, and
//! process wiring live in the embedding router.

pub mod access_log;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod registry;
pub mod route;

pub use config::RouterConfig;
pub use error::{Result, RouterError};
pub use proxy::ProxyRoundTripper;
pub use registry::RouteRegistry;
