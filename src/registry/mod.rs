//! Concurrent route table: a path-segment trie of endpoint pools with
//! TTL-based background eviction.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::RouterConfig;
use crate::metrics::RouteRegistryReporter;
use crate::route::{Endpoint, Pool, Uri};

mod trie;

use trie::Trie;

/// Whether the last prune tick believed the control plane was reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PruneStatus {
    Connected,
    Disconnected,
}

/// One endpoint as it appears in a marshaled registry snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSnapshot {
    pub address: String,
    pub application_id: String,
    pub tags: BTreeMap<String, String>,
}

/// The route registry. Shared by request handlers, the control-plane
/// adapter, and the background pruner; all public operations are safe
/// under the internal reader-writer lock.
pub struct RouteRegistry {
    prune_interval: Duration,
    stale_threshold: Duration,
    router_group_guid: String,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn RouteRegistryReporter>,
    inner: RwLock<RegistryInner>,
    prune_task: Mutex<Option<JoinHandle<()>>>,
}

struct RegistryInner {
    trie: Trie,
    suspend_pruning: Box<dyn Fn() -> bool + Send + Sync>,
    pruning_status: PruneStatus,
    time_of_last_update: Option<Instant>,
}

impl RouteRegistry {
    pub fn new(
        config: &RouterConfig,
        reporter: Arc<dyn RouteRegistryReporter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            prune_interval: config.registry.prune_interval,
            stale_threshold: config.registry.stale_threshold,
            router_group_guid: config.router_group_guid.clone(),
            clock,
            reporter,
            inner: RwLock::new(RegistryInner {
                trie: Trie::new(),
                suspend_pruning: Box::new(|| false),
                pruning_status: PruneStatus::Connected,
                time_of_last_update: None,
            }),
            prune_task: Mutex::new(None),
        }
    }

    /// Adds `endpoint` to the pool at `uri`, creating the pool on first
    /// sight of the route key.
    pub async fn register(&self, uri: &Uri, endpoint: Endpoint) {
        let now = self.clock.now();
        let route_key = uri.route_key();
        let backend = endpoint.canonical_addr().to_string();
        let modification_tag = endpoint.modification_tag().clone();
        let reported = endpoint.clone();

        let endpoint_added = {
            let mut inner = self.inner.write().await;
            let pool = match inner.trie.find(route_key.as_str()) {
                Some(pool) => pool,
                None => {
                    let pool = Arc::new(Pool::new(
                        self.stale_threshold / 4,
                        parse_context_path(uri),
                        Arc::clone(&self.clock),
                    ));
                    inner.trie.insert(route_key.as_str(), Arc::clone(&pool));
                    debug!(uri = %route_key, "uri-added");
                    pool
                }
            };
            let added = pool.put(endpoint);
            inner.time_of_last_update = Some(now);
            added
        };

        // The reporter runs outside the lock.
        self.reporter.capture_registry_message(&reported);

        if endpoint_added {
            debug!(
                uri = %uri,
                router_group_guid = self.group(),
                backend = %backend,
                modification_tag = ?modification_tag,
                "endpoint-registered"
            );
        } else {
            debug!(
                uri = %uri,
                router_group_guid = self.group(),
                backend = %backend,
                modification_tag = ?modification_tag,
                "endpoint-not-registered"
            );
        }
    }

    /// Removes `endpoint` from the pool at `uri`; a pool emptied by the
    /// removal is deleted from the trie along with any emptied ancestors.
    /// Unknown URIs and endpoints are silent no-ops.
    pub async fn unregister(&self, uri: &Uri, endpoint: &Endpoint) {
        let route_key = uri.route_key();

        {
            let mut inner = self.inner.write().await;
            if let Some(pool) = inner.trie.find(route_key.as_str()) {
                let removed = pool.remove(endpoint);
                if removed {
                    debug!(
                        uri = %uri,
                        router_group_guid = self.group(),
                        backend = endpoint.canonical_addr(),
                        modification_tag = ?endpoint.modification_tag(),
                        "endpoint-unregistered"
                    );
                } else {
                    debug!(
                        uri = %uri,
                        router_group_guid = self.group(),
                        backend = endpoint.canonical_addr(),
                        modification_tag = ?endpoint.modification_tag(),
                        "endpoint-not-unregistered"
                    );
                }
                if pool.is_empty() {
                    inner.trie.delete(route_key.as_str());
                }
            }
        }

        self.reporter.capture_unregistry_message(endpoint);
    }

    /// Resolves a request URI to a pool: exact key first, then successive
    /// wildcard fallbacks until a match or exhaustion. Path segments are
    /// stripped before host labels are wildcarded, so the longest context
    /// path wins.
    pub async fn lookup(&self, uri: &Uri) -> Option<Arc<Pool>> {
        let started = self.clock.now();

        let pool = {
            let inner = self.inner.read().await;
            let mut key = uri.route_key();
            let mut pool = inner.trie.match_uri(key.as_str());
            while pool.is_none() {
                match key.next_wildcard() {
                    Some(next) => {
                        key = next;
                        pool = inner.trie.match_uri(key.as_str());
                    }
                    None => break,
                }
            }
            pool
        };

        self.reporter
            .capture_lookup_time(self.clock.now().duration_since(started));
        pool
    }

    /// Resolves `uri` and narrows to the single endpoint matching the
    /// given application id and instance index. Returns a fresh,
    /// ephemeral pool holding a copy of that endpoint, or `None` unless
    /// exactly one endpoint matches.
    pub async fn lookup_with_instance(
        &self,
        uri: &Uri,
        app_id: &str,
        app_index: &str,
    ) -> Option<Arc<Pool>> {
        let pool = self.lookup(uri).await?;

        let mut matches = Vec::new();
        pool.each(|e| {
            if e.application_id() == app_id && e.instance_index() == app_index {
                matches.push(Arc::clone(e));
            }
        });
        if matches.len() != 1 {
            return None;
        }

        let surgical = Arc::new(Pool::new(Duration::ZERO, "", Arc::clone(&self.clock)));
        surgical.put((*matches[0]).clone());
        Some(surgical)
    }

    pub async fn num_uris(&self) -> usize {
        self.inner.read().await.trie.pool_count()
    }

    pub async fn num_endpoints(&self) -> usize {
        self.inner.read().await.trie.endpoint_count()
    }

    pub async fn time_of_last_update(&self) -> Option<Instant> {
        self.inner.read().await.time_of_last_update
    }

    /// The current route table as URI -> endpoint list, in a stable order.
    pub async fn snapshot(&self) -> BTreeMap<String, Vec<EndpointSnapshot>> {
        let inner = self.inner.read().await;
        let mut table = BTreeMap::new();
        inner.trie.each_pool_with_path("", &mut |path, pool| {
            let mut endpoints = Vec::new();
            pool.each(|e| {
                endpoints.push(EndpointSnapshot {
                    address: e.canonical_addr().to_string(),
                    application_id: e.application_id().to_string(),
                    tags: e
                        .tags()
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                });
            });
            table.insert(path.to_string(), endpoints);
        });
        table
    }

    pub async fn marshal_snapshot(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.snapshot().await)
    }

    /// Spawns the background pruning loop. A zero prune interval disables
    /// pruning entirely.
    pub fn start_pruning_cycle(self: Arc<Self>) {
        if self.prune_interval.is_zero() {
            return;
        }
        let registry = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.prune_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval yields immediately; the first real tick is one
            // full period out.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!("start-pruning-routes");
                registry.prune_stale_routes().await;
                info!("finished-pruning-routes");
                let uri_count = registry.num_uris().await;
                let ms_since_last_update = registry.ms_since_last_update().await;
                registry
                    .reporter
                    .capture_route_stats(uri_count, ms_since_last_update);
            }
        });
        if let Some(previous) = self.prune_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stops the pruning loop; an in-progress tick runs to completion.
    pub fn stop_pruning_cycle(&self) {
        if let Some(handle) = self.prune_task.lock().take() {
            handle.abort();
        }
    }

    /// Installs the predicate consulted at each prune tick; when it
    /// returns true the tick is skipped and the registry is treated as
    /// disconnected from its control plane.
    pub async fn suspend_pruning(&self, predicate: impl Fn() -> bool + Send + Sync + 'static) {
        let mut inner = self.inner.write().await;
        inner.suspend_pruning = Box::new(predicate);
    }

    async fn prune_stale_routes(&self) {
        let mut inner = self.inner.write().await;

        if (inner.suspend_pruning)() {
            info!("prune-suspended");
            inner.pruning_status = PruneStatus::Disconnected;
            return;
        }
        if inner.pruning_status == PruneStatus::Disconnected {
            // Coming back from a disconnect: the control-plane refresh is
            // still in flight, so renew everything instead of pruning a
            // route table that is merely late.
            debug!("prune-unsuspended-refresh-routes-start");
            let now = self.clock.now();
            inner
                .trie
                .each_pool_with_path("", &mut |_, pool| pool.mark_updated(now));
            debug!("prune-unsuspended-refresh-routes-complete");
        }
        inner.pruning_status = PruneStatus::Connected;

        let stale_threshold = self.stale_threshold;
        let router_group_guid = self.group().to_string();
        inner.trie.retain_pools("", &mut |path, pool| {
            let pruned = pool.prune_endpoints(stale_threshold);
            if !pruned.is_empty() {
                let endpoints: Vec<&str> =
                    pruned.iter().map(|e| e.canonical_addr()).collect();
                info!(
                    uri = path,
                    endpoints = ?endpoints,
                    router_group_guid = %router_group_guid,
                    "pruned-route"
                );
            }
            pool.is_empty()
        });
    }

    async fn ms_since_last_update(&self) -> u64 {
        let inner = self.inner.read().await;
        inner
            .time_of_last_update
            .map(|t| self.clock.now().duration_since(t).as_millis() as u64)
            .unwrap_or(0)
    }

    fn group(&self) -> &str {
        if self.router_group_guid.is_empty() {
            "-"
        } else {
            &self.router_group_guid
        }
    }
}

/// The context path stamped on a pool at creation: `/` plus everything
/// after the first path separator of the URI, query stripped.
fn parse_context_path(uri: &Uri) -> String {
    let trimmed = uri.as_str().trim_start_matches('/');
    let mut context_path = String::from("/");
    if let Some((_, rest)) = trimmed.split_once('/') {
        context_path.push_str(rest);
    }
    if let Some(idx) = context_path.find('?') {
        context_path.truncate(idx);
    }
    context_path
}
