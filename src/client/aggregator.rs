//! Request batching for per-application lookups
//!
//! During a discovery run every application needs its routes and its
//! `web` process looked up. Issuing one upstream call per application
//! would dwarf the rest of the traffic, so lookups are enqueued and a
//! background task periodically drains the queue, deduplicates the
//! keys, issues one bulk call and fans the answers back out.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::{CloudController, ListResponse, ProcessResource, RouteResource, PROCESS_TYPE_WEB};
use crate::error::{ApiError, ApiResult};

/// A lookup that can be answered for many keys with one upstream call.
#[async_trait]
pub trait BulkLookup: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;
    type Response: Send + 'static;

    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Issue the bulk upstream call for the given set of keys.
    async fn send_request(&self, keys: &[Self::Key]) -> ApiResult<Self::Response>;

    /// Fan the bulk response back out per key. Keys absent from the
    /// returned map simply had no matching resources upstream.
    fn map_responses(&self, response: Self::Response) -> HashMap<Self::Key, Self::Value>;
}

type Waiter<L> = oneshot::Sender<
    Result<Option<<L as BulkLookup>::Value>, ApiError>,
>;

/// Batches individual lookups into periodic bulk calls.
///
/// Lookups enqueued between ticks are drained together (up to
/// `max_block_size` per tick), deduplicated, and answered from a single
/// bulk request. A key with no upstream resources resolves to
/// `Ok(None)`; a failed bulk call fails every waiter of that batch.
pub struct RequestAggregator<L: BulkLookup> {
    queue: Arc<Mutex<VecDeque<(L::Key, Waiter<L>)>>>,
    stopped: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl<L: BulkLookup> RequestAggregator<L> {
    pub fn new(lookup: Arc<L>, interval: Duration, max_block_size: usize) -> Self {
        let queue: Arc<Mutex<VecDeque<(L::Key, Waiter<L>)>>> =
            Arc::new(Mutex::new(VecDeque::new()));
        let stopped = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(Self::run(
            lookup,
            Arc::clone(&queue),
            Arc::clone(&stopped),
            interval,
            max_block_size,
        ));

        Self {
            queue,
            stopped,
            task,
        }
    }

    /// Enqueue one lookup and wait for the batch it lands in.
    ///
    /// Returns `Ok(None)` when the upstream knows nothing about the
    /// key. After [`stop`](Self::stop) the returned future never
    /// resolves, mirroring a drained-and-parked worker.
    pub async fn lookup(&self, key: L::Key) -> Result<Option<L::Value>, ApiError> {
        let (tx, rx) = oneshot::channel();
        self.queue
            .lock()
            .expect("aggregator queue lock poisoned")
            .push_back((key, tx));

        match rx.await {
            Ok(result) => result,
            // The batch task dropped our sender without answering; only
            // happens on shutdown races.
            Err(_) => Err(ApiError::Upstream(
                "request aggregator shut down before answering".to_string(),
            )),
        }
    }

    /// Stop draining the queue. Already-enqueued lookups are left
    /// unanswered.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    async fn run(
        lookup: Arc<L>,
        queue: Arc<Mutex<VecDeque<(L::Key, Waiter<L>)>>>,
        stopped: Arc<AtomicBool>,
        interval: Duration,
        max_block_size: usize,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so enqueued lookups
        // always get a full interval to accumulate.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if stopped.load(Ordering::SeqCst) {
                debug!("{} aggregator stopped", lookup.name());
                return;
            }

            let batch = Self::drain(&queue, max_block_size);
            if batch.is_empty() {
                continue;
            }

            let keys: Vec<L::Key> = batch.keys().cloned().collect();
            debug!(
                "{} aggregator sending bulk request for {} keys",
                lookup.name(),
                keys.len()
            );

            match lookup.send_request(&keys).await {
                Ok(response) => {
                    let mut values = lookup.map_responses(response);
                    for (key, waiters) in batch {
                        let value = values.remove(&key);
                        for waiter in waiters {
                            // Receiver may have gone away; that is fine.
                            let _ = waiter.send(Ok(value.clone()));
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        "{} aggregator bulk request for {} keys failed: {}",
                        lookup.name(),
                        keys.len(),
                        err
                    );
                    for (_, waiters) in batch {
                        for waiter in waiters {
                            let _ = waiter.send(Err(err.clone()));
                        }
                    }
                }
            }
        }
    }

    /// Drain up to `max_block_size` queue entries, deduplicating keys.
    /// Every waiter of a deduplicated key receives the same answer.
    fn drain(
        queue: &Mutex<VecDeque<(L::Key, Waiter<L>)>>,
        max_block_size: usize,
    ) -> HashMap<L::Key, Vec<Waiter<L>>> {
        let mut queue = queue.lock().expect("aggregator queue lock poisoned");
        let mut batch: HashMap<L::Key, Vec<Waiter<L>>> = HashMap::new();

        let mut taken = 0;
        while taken < max_block_size {
            let Some((key, waiter)) = queue.pop_front() else {
                break;
            };
            batch.entry(key).or_default().push(waiter);
            taken += 1;
        }

        batch
    }
}

impl<L: BulkLookup> Drop for RequestAggregator<L> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Bulk lookup of the routes mapped to a set of applications.
pub struct RoutesForAppsLookup {
    client: Arc<dyn CloudController>,
}

impl RoutesForAppsLookup {
    pub fn new(client: Arc<dyn CloudController>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BulkLookup for RoutesForAppsLookup {
    type Key = String;
    type Value = Vec<RouteResource>;
    type Response = ListResponse<RouteResource>;

    fn name(&self) -> &'static str {
        "routes"
    }

    async fn send_request(&self, keys: &[String]) -> ApiResult<Self::Response> {
        self.client.retrieve_routes_for_app_ids(keys).await
    }

    fn map_responses(&self, response: Self::Response) -> HashMap<String, Vec<RouteResource>> {
        let mut by_app: HashMap<String, Vec<RouteResource>> = HashMap::new();
        for route in response.resources {
            for app_id in &route.destinations {
                by_app
                    .entry(app_id.clone())
                    .or_default()
                    .push(route.clone());
            }
        }
        by_app
    }
}

/// Bulk lookup of the `web` processes of a set of applications.
pub struct WebProcessesLookup {
    client: Arc<dyn CloudController>,
}

impl WebProcessesLookup {
    pub fn new(client: Arc<dyn CloudController>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BulkLookup for WebProcessesLookup {
    type Key = String;
    type Value = Vec<ProcessResource>;
    type Response = ListResponse<ProcessResource>;

    fn name(&self) -> &'static str {
        "webProcesses"
    }

    async fn send_request(&self, keys: &[String]) -> ApiResult<Self::Response> {
        self.client.retrieve_web_processes_for_app_ids(keys).await
    }

    fn map_responses(&self, response: Self::Response) -> HashMap<String, Vec<ProcessResource>> {
        let mut by_app: HashMap<String, Vec<ProcessResource>> = HashMap::new();
        for process in response.resources {
            if process.process_type != PROCESS_TYPE_WEB {
                continue;
            }
            by_app
                .entry(process.app_id.clone())
                .or_default()
                .push(process);
        }
        by_app
    }
}
