use std::time::Duration;

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::route::Endpoint;

/// Sink for registry-side events. Implementations must be cheap and must
/// never call back into the registry: the registry invokes them outside
/// its lock, but a re-entrant reporter would still deadlock the caller.
pub trait RouteRegistryReporter: Send + Sync {
    fn capture_registry_message(&self, endpoint: &Endpoint);
    fn capture_unregistry_message(&self, endpoint: &Endpoint);
    fn capture_lookup_time(&self, duration: Duration);
    fn capture_route_stats(&self, uri_count: usize, ms_since_last_update: u64);
}

/// Sink for proxy-side events.
pub trait ProxyReporter: Send + Sync {
    fn capture_routing_request(&self, endpoint: &Endpoint);
    fn capture_bad_gateway(&self);
}

/// Convenience bound for sinks that cover both sides.
pub trait CombinedReporter: RouteRegistryReporter + ProxyReporter {}

impl<T: RouteRegistryReporter + ProxyReporter> CombinedReporter for T {}

/// Reporter backed by the `metrics` facade, exported via Prometheus.
#[derive(Debug, Default)]
pub struct PrometheusReporter;

impl PrometheusReporter {
    /// Builds a reporter against an already-installed recorder.
    pub fn new() -> Self {
        Self::describe_metrics();
        Self
    }

    /// Installs the Prometheus recorder and returns the reporter together
    /// with the render handle for the embedding process to serve.
    pub fn install() -> Result<(Self, PrometheusHandle)> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;
        Ok((Self::new(), handle))
    }

    fn describe_metrics() {
        describe_counter!(
            "registry_messages_total",
            "Route register/unregister messages processed"
        );
        describe_histogram!(
            "route_lookup_duration_seconds",
            "Time spent resolving a request URI to a pool"
        );
        describe_gauge!("registry_routes", "Distinct URIs with a non-empty pool");
        describe_gauge!(
            "registry_ms_since_last_update",
            "Milliseconds since the registry last processed an update"
        );
        describe_counter!(
            "backend_routing_requests_total",
            "Requests dispatched to a backend endpoint"
        );
        describe_counter!(
            "bad_gateway_responses_total",
            "502 responses produced by the proxy"
        );
    }
}

impl RouteRegistryReporter for PrometheusReporter {
    fn capture_registry_message(&self, _endpoint: &Endpoint) {
        counter!("registry_messages_total", "action" => "register").increment(1);
    }

    fn capture_unregistry_message(&self, _endpoint: &Endpoint) {
        counter!("registry_messages_total", "action" => "unregister").increment(1);
    }

    fn capture_lookup_time(&self, duration: Duration) {
        histogram!("route_lookup_duration_seconds").record(duration.as_secs_f64());
    }

    fn capture_route_stats(&self, uri_count: usize, ms_since_last_update: u64) {
        gauge!("registry_routes").set(uri_count as f64);
        gauge!("registry_ms_since_last_update").set(ms_since_last_update as f64);
    }
}

impl ProxyReporter for PrometheusReporter {
    fn capture_routing_request(&self, endpoint: &Endpoint) {
        counter!(
            "backend_routing_requests_total",
            "application_id" => endpoint.application_id().to_string()
        )
        .increment(1);
    }

    fn capture_bad_gateway(&self) {
        counter!("bad_gateway_responses_total").increment(1);
    }
}

/// Discards everything. Stands in where no metrics sink is wired up.
#[derive(Debug, Default)]
pub struct NullReporter;

impl RouteRegistryReporter for NullReporter {
    fn capture_registry_message(&self, _endpoint: &Endpoint) {}
    fn capture_unregistry_message(&self, _endpoint: &Endpoint) {}
    fn capture_lookup_time(&self, _duration: Duration) {}
    fn capture_route_stats(&self, _uri_count: usize, _ms_since_last_update: u64) {}
}

impl ProxyReporter for NullReporter {
    fn capture_routing_request(&self, _endpoint: &Endpoint) {}
    fn capture_bad_gateway(&self) {}
}
