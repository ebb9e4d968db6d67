//! Rate-limited, retried request execution against the control plane
//!
//! Every upstream call funnels through [`RequestFetcher::single_request`]:
//! token acquisition, a per-request-type duration timer, a timeout scoped
//! to the call itself, and bounded retry with exponential backoff.
//! Paginated listings fetch page 1 to learn the page count, then fetch
//! the remaining pages concurrently and merge them, failing the whole
//! retrieval if any page fails.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, warn};

use super::{ListResponse, RequestType, UpstreamRateLimiter};
use crate::error::{ApiError, ApiResult, EXIT_CODE_ACCESSOR_OUT_OF_MEMORY};

/// Number of retries after the initial attempt.
const MAX_RETRIES: u32 = 2;

/// Accumulated duration observations per request type.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimingStats {
    pub count: u64,
    pub total_ms: u64,
}

/// Executes upstream calls with rate limiting, timeout, retry and
/// per-key mutual exclusion.
///
/// The per-key lock table replaces lock-by-interned-string schemes: two
/// concurrent requests with the same `(request_type, key)` serialize on
/// an explicit mutex, so the second one typically lands on a warm cache
/// entry installed by the first.
pub struct RequestFetcher {
    rate_limiter: Arc<UpstreamRateLimiter>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    timings: Mutex<HashMap<RequestType, TimingStats>>,
    request_timeout: Duration,
    backoff_base: Duration,
}

impl RequestFetcher {
    pub fn new(
        rate_limiter: Arc<UpstreamRateLimiter>,
        request_timeout: Duration,
        backoff_base: Duration,
    ) -> Self {
        Self {
            rate_limiter,
            locks: Mutex::new(HashMap::new()),
            timings: Mutex::new(HashMap::new()),
            request_timeout,
            backoff_base,
        }
    }

    /// Execute one upstream call.
    ///
    /// The timeout applies only to the call itself, not to time spent
    /// waiting for the per-key lock or a rate-limit token; otherwise a
    /// queued request would burn its retry budget before it ever
    /// reached the network.
    pub async fn single_request<T, F, Fut>(
        &self,
        request_type: RequestType,
        key: &str,
        call: F,
    ) -> ApiResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let lock = self.lock_for(request_type, key);
        let _guard = lock.lock().await;

        let started = Instant::now();
        let result = self.execute_with_retry(request_type, key, &call).await;
        self.record_timing(request_type, started.elapsed());

        drop(_guard);
        self.release_lock(request_type, key, lock);

        result
    }

    async fn execute_with_retry<T, F, Fut>(
        &self,
        request_type: RequestType,
        key: &str,
        call: &F,
    ) -> ApiResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let timeout_ms = self.request_timeout.as_millis() as u64;
        let mut attempt: u32 = 0;

        loop {
            self.rate_limiter.acquire(request_type).await;

            let outcome = match tokio::time::timeout(self.request_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ApiError::Timeout {
                    request_type,
                    key: key.to_string(),
                    timeout_ms,
                }),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_fatal() => {
                    // Retrying after resource exhaustion risks corrupted
                    // state; terminate with a distinct exit code.
                    error!(
                        "fatal error during {} request for key '{}': {}; terminating",
                        request_type, key, err
                    );
                    std::process::exit(EXIT_CODE_ACCESSOR_OUT_OF_MEMORY);
                }
                Err(err) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    let delay = self.backoff_base * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        "{} request for key '{}' failed (attempt {}/{}): {}; retrying in {}ms",
                        request_type,
                        key,
                        attempt,
                        MAX_RETRIES + 1,
                        err,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if err.is_timeout() {
                        error!(
                            "{} request for key '{}' timed out after {}ms even though we tried {} times",
                            request_type,
                            key,
                            timeout_ms,
                            MAX_RETRIES + 1
                        );
                    } else {
                        error!(
                            "{} request for key '{}' failed after {} attempts: {}",
                            request_type,
                            key,
                            MAX_RETRIES + 1,
                            err
                        );
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Retrieve all pages of a listing.
    ///
    /// Page 1 is fetched first to learn the total page count, the
    /// remaining pages are fetched concurrently. If any page fails the
    /// whole retrieval fails; downstream consumers cannot safely reason
    /// about incomplete listings.
    pub async fn paginated_request<T, F, Fut>(
        &self,
        request_type: RequestType,
        key: &str,
        fetch_page: F,
    ) -> ApiResult<ListResponse<T>>
    where
        T: Send,
        F: Fn(u32) -> Fut + Sync,
        Fut: Future<Output = ApiResult<ListResponse<T>>>,
    {
        let first = self
            .single_request(request_type, &page_key(key, 1), || fetch_page(1))
            .await?;

        let total_pages = first.total_pages;
        if total_pages <= 1 {
            return Ok(first);
        }

        let mut pending = FuturesUnordered::new();
        for page in 2..=total_pages {
            let fetch_page = &fetch_page;
            pending.push(async move {
                let result = self
                    .single_request(request_type, &page_key(key, page), || fetch_page(page))
                    .await;
                (page, result)
            });
        }

        // BTreeMap keeps the merged output in page order even though
        // the pages arrive out of order.
        let mut pages: BTreeMap<u32, Vec<T>> = BTreeMap::new();
        while let Some((page, result)) = pending.next().await {
            let response = result?;
            pages.insert(page, response.resources);
        }
        drop(pending);

        let mut resources = first.resources;
        for (_, mut page_resources) in pages {
            resources.append(&mut page_resources);
        }

        debug!(
            "merged {} pages ({} resources) for {} key '{}'",
            total_pages,
            resources.len(),
            request_type,
            key
        );

        Ok(ListResponse::new(total_pages, resources))
    }

    /// Snapshot of per-request-type timing observations.
    pub fn timings(&self) -> HashMap<RequestType, TimingStats> {
        self.timings.lock().expect("timings lock poisoned").clone()
    }

    fn record_timing(&self, request_type: RequestType, elapsed: Duration) {
        let mut timings = self.timings.lock().expect("timings lock poisoned");
        let stats = timings.entry(request_type).or_default();
        stats.count += 1;
        stats.total_ms += elapsed.as_millis() as u64;
    }

    fn lock_for(&self, request_type: RequestType, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        locks
            .entry(lock_key(request_type, key))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the lock table entry once no other caller holds it, so the
    /// table does not grow with the lifetime key space.
    fn release_lock(&self, request_type: RequestType, key: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        // 2 = the table's reference plus ours.
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(&lock_key(request_type, key));
        }
    }
}

fn lock_key(request_type: RequestType, key: &str) -> String {
    format!("{}|{}", request_type, key)
}

fn page_key(key: &str, page: u32) -> String {
    format!("{}|page={}", key, page)
}
