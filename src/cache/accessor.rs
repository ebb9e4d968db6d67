//! Caching decorator over the control-plane accessor
//!
//! `CachedCloudController` wraps any [`CloudController`] with one
//! [`TtlCache`] per request category, each keyed by the lookup's
//! natural key. The wrapped accessor only sees cache misses and
//! background refreshes. Bulk operations pass through uncached; they
//! are batched by the request aggregator instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use log::info;
use tokio::task::JoinHandle;

use super::TtlCache;
use crate::client::{
    AppResource, CloudController, DomainResource, ListResponse, OrgResource, ProcessResource,
    RouteResource, SpaceResource, SpaceSummary,
};
use crate::config::CacheConfig;
use crate::error::ApiResult;

/// Key of the space-by-name cache; a space name is only unique within
/// its organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpaceCacheKey {
    pub org_id: String,
    pub space_name: String,
}

/// Key of the applications-in-space cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppsInSpaceCacheKey {
    pub org_id: String,
    pub space_id: String,
}

/// Key of the process cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessCacheKey {
    pub org_id: String,
    pub space_id: String,
    pub app_id: String,
}

/// A [`CloudController`] decorated with per-category TTL caches.
pub struct CachedCloudController {
    backend: Arc<dyn CloudController>,
    org: Arc<TtlCache<String, ListResponse<OrgResource>>>,
    all_orgs: Arc<TtlCache<(), ListResponse<OrgResource>>>,
    space: Arc<TtlCache<SpaceCacheKey, ListResponse<SpaceResource>>>,
    spaces_in_org: Arc<TtlCache<String, ListResponse<SpaceResource>>>,
    apps_in_space: Arc<TtlCache<AppsInSpaceCacheKey, ListResponse<AppResource>>>,
    space_summary: Arc<TtlCache<String, SpaceSummary>>,
    domains: Arc<TtlCache<String, ListResponse<DomainResource>>>,
    domain: Arc<TtlCache<String, DomainResource>>,
    route_mappings: Arc<TtlCache<String, ListResponse<RouteResource>>>,
    route: Arc<TtlCache<String, RouteResource>>,
    processes: Arc<TtlCache<ProcessCacheKey, ListResponse<ProcessResource>>>,
}

impl CachedCloudController {
    pub fn new(backend: Arc<dyn CloudController>, config: &CacheConfig) -> Self {
        let org = {
            let b = Arc::clone(&backend);
            Arc::new(TtlCache::new(
                "org",
                config.org.expire_after_access(),
                config.org.refresh_after_write(),
                Arc::new(move |name: &String| {
                    let b = Arc::clone(&b);
                    let name = name.clone();
                    async move { b.retrieve_org_id(&name).await }.boxed()
                }),
            ))
        };

        let all_orgs = {
            let b = Arc::clone(&backend);
            Arc::new(TtlCache::new(
                "allOrgs",
                config.org.expire_after_access(),
                config.org.refresh_after_write(),
                Arc::new(move |_: &()| {
                    let b = Arc::clone(&b);
                    async move { b.retrieve_all_org_ids().await }.boxed()
                }),
            ))
        };

        let space = {
            let b = Arc::clone(&backend);
            Arc::new(TtlCache::new(
                "space",
                config.space.expire_after_access(),
                config.space.refresh_after_write(),
                Arc::new(move |key: &SpaceCacheKey| {
                    let b = Arc::clone(&b);
                    let key = key.clone();
                    async move { b.retrieve_space_id(&key.org_id, &key.space_name).await }.boxed()
                }),
            ))
        };

        let spaces_in_org = {
            let b = Arc::clone(&backend);
            Arc::new(TtlCache::new(
                "spacesInOrg",
                config.space.expire_after_access(),
                config.space.refresh_after_write(),
                Arc::new(move |org_id: &String| {
                    let b = Arc::clone(&b);
                    let org_id = org_id.clone();
                    async move { b.retrieve_space_ids_in_org(&org_id).await }.boxed()
                }),
            ))
        };

        let apps_in_space = {
            let b = Arc::clone(&backend);
            Arc::new(TtlCache::new(
                "appsInSpace",
                config.application.expire_after_access(),
                config.application.refresh_after_write(),
                Arc::new(move |key: &AppsInSpaceCacheKey| {
                    let b = Arc::clone(&b);
                    let key = key.clone();
                    async move {
                        b.retrieve_all_application_ids_in_space(&key.org_id, &key.space_id)
                            .await
                    }
                    .boxed()
                }),
            ))
        };

        let space_summary = {
            let b = Arc::clone(&backend);
            Arc::new(TtlCache::new(
                "spaceSummary",
                config.application.expire_after_access(),
                config.application.refresh_after_write(),
                Arc::new(move |space_id: &String| {
                    let b = Arc::clone(&b);
                    let space_id = space_id.clone();
                    async move { b.retrieve_space_summary(&space_id).await }.boxed()
                }),
            ))
        };

        let domains = {
            let b = Arc::clone(&backend);
            Arc::new(TtlCache::new(
                "domains",
                config.domain.expire_after_access(),
                config.domain.refresh_after_write(),
                Arc::new(move |org_id: &String| {
                    let b = Arc::clone(&b);
                    let org_id = org_id.clone();
                    async move { b.retrieve_all_domains(&org_id).await }.boxed()
                }),
            ))
        };

        let domain = {
            let b = Arc::clone(&backend);
            Arc::new(TtlCache::new(
                "domain",
                config.domain.expire_after_access(),
                config.domain.refresh_after_write(),
                Arc::new(move |domain_id: &String| {
                    let b = Arc::clone(&b);
                    let domain_id = domain_id.clone();
                    async move { b.retrieve_shared_domain(&domain_id).await }.boxed()
                }),
            ))
        };

        let route_mappings = {
            let b = Arc::clone(&backend);
            Arc::new(TtlCache::new(
                "routeMappings",
                config.domain.expire_after_access(),
                config.domain.refresh_after_write(),
                Arc::new(move |app_id: &String| {
                    let b = Arc::clone(&b);
                    let app_id = app_id.clone();
                    async move { b.retrieve_route_mapping(&app_id).await }.boxed()
                }),
            ))
        };

        let route = {
            let b = Arc::clone(&backend);
            Arc::new(TtlCache::new(
                "route",
                config.domain.expire_after_access(),
                config.domain.refresh_after_write(),
                Arc::new(move |route_id: &String| {
                    let b = Arc::clone(&b);
                    let route_id = route_id.clone();
                    async move { b.retrieve_route(&route_id).await }.boxed()
                }),
            ))
        };

        let processes = {
            let b = Arc::clone(&backend);
            Arc::new(TtlCache::new(
                "processes",
                config.application.expire_after_access(),
                config.application.refresh_after_write(),
                Arc::new(move |key: &ProcessCacheKey| {
                    let b = Arc::clone(&b);
                    let key = key.clone();
                    async move {
                        b.retrieve_processes(&key.org_id, &key.space_id, &key.app_id)
                            .await
                    }
                    .boxed()
                }),
            ))
        };

        Self {
            backend,
            org,
            all_orgs,
            space,
            spaces_in_org,
            apps_in_space,
            space_summary,
            domains,
            domain,
            route_mappings,
            route,
            processes,
        }
    }

    /// Spawn the periodic maintenance task sweeping and refreshing all
    /// caches. The caller owns the handle.
    pub fn start_maintenance(&self, interval: Duration) -> JoinHandle<()> {
        let caches: [Arc<dyn Maintainable>; 11] = [
            Arc::clone(&self.org) as Arc<dyn Maintainable>,
            Arc::clone(&self.all_orgs) as Arc<dyn Maintainable>,
            Arc::clone(&self.space) as Arc<dyn Maintainable>,
            Arc::clone(&self.spaces_in_org) as Arc<dyn Maintainable>,
            Arc::clone(&self.apps_in_space) as Arc<dyn Maintainable>,
            Arc::clone(&self.space_summary) as Arc<dyn Maintainable>,
            Arc::clone(&self.domains) as Arc<dyn Maintainable>,
            Arc::clone(&self.domain) as Arc<dyn Maintainable>,
            Arc::clone(&self.route_mappings) as Arc<dyn Maintainable>,
            Arc::clone(&self.route) as Arc<dyn Maintainable>,
            Arc::clone(&self.processes) as Arc<dyn Maintainable>,
        ];

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                for cache in &caches {
                    cache.maintain();
                }
            }
        })
    }

    pub fn invalidate_cache_org(&self) {
        info!("invalidating organization caches");
        self.org.invalidate_all();
        self.all_orgs.invalidate_all();
    }

    pub fn invalidate_cache_space(&self) {
        info!("invalidating space caches");
        self.space.invalidate_all();
        self.spaces_in_org.invalidate_all();
        self.space_summary.invalidate_all();
    }

    pub fn invalidate_cache_application(&self) {
        info!("invalidating application caches");
        self.apps_in_space.invalidate_all();
        self.space_summary.invalidate_all();
    }

    pub fn invalidate_cache_domain(&self) {
        info!("invalidating domain caches");
        self.domains.invalidate_all();
        self.domain.invalidate_all();
    }

    pub fn invalidate_cache_route(&self) {
        info!("invalidating route caches");
        self.route_mappings.invalidate_all();
        self.route.invalidate_all();
    }

    pub fn invalidate_cache_process(&self) {
        info!("invalidating process caches");
        self.processes.invalidate_all();
    }
}

/// Erases the cache value type so the maintenance task can hold every
/// cache in one collection.
trait Maintainable: Send + Sync {
    fn maintain(&self);
}

impl<K, V> Maintainable for TtlCache<K, V>
where
    K: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn maintain(&self) {
        TtlCache::maintain(self);
    }
}

#[async_trait]
impl CloudController for CachedCloudController {
    async fn retrieve_org_id(&self, org_name: &str) -> ApiResult<ListResponse<OrgResource>> {
        self.org.get(&org_name.to_string()).await
    }

    async fn retrieve_all_org_ids(&self) -> ApiResult<ListResponse<OrgResource>> {
        self.all_orgs.get(&()).await
    }

    async fn retrieve_space_id(
        &self,
        org_id: &str,
        space_name: &str,
    ) -> ApiResult<ListResponse<SpaceResource>> {
        self.space
            .get(&SpaceCacheKey {
                org_id: org_id.to_string(),
                space_name: space_name.to_string(),
            })
            .await
    }

    async fn retrieve_space_ids_in_org(
        &self,
        org_id: &str,
    ) -> ApiResult<ListResponse<SpaceResource>> {
        self.spaces_in_org.get(&org_id.to_string()).await
    }

    async fn retrieve_all_application_ids_in_space(
        &self,
        org_id: &str,
        space_id: &str,
    ) -> ApiResult<ListResponse<AppResource>> {
        self.apps_in_space
            .get(&AppsInSpaceCacheKey {
                org_id: org_id.to_string(),
                space_id: space_id.to_string(),
            })
            .await
    }

    async fn retrieve_space_summary(&self, space_id: &str) -> ApiResult<SpaceSummary> {
        self.space_summary.get(&space_id.to_string()).await
    }

    async fn retrieve_all_domains(&self, org_id: &str) -> ApiResult<ListResponse<DomainResource>> {
        self.domains.get(&org_id.to_string()).await
    }

    async fn retrieve_route_mapping(
        &self,
        app_id: &str,
    ) -> ApiResult<ListResponse<RouteResource>> {
        self.route_mappings.get(&app_id.to_string()).await
    }

    async fn retrieve_route(&self, route_id: &str) -> ApiResult<RouteResource> {
        self.route.get(&route_id.to_string()).await
    }

    async fn retrieve_shared_domain(&self, domain_id: &str) -> ApiResult<DomainResource> {
        self.domain.get(&domain_id.to_string()).await
    }

    async fn retrieve_processes(
        &self,
        org_id: &str,
        space_id: &str,
        app_id: &str,
    ) -> ApiResult<ListResponse<ProcessResource>> {
        self.processes
            .get(&ProcessCacheKey {
                org_id: org_id.to_string(),
                space_id: space_id.to_string(),
                app_id: app_id.to_string(),
            })
            .await
    }

    async fn retrieve_routes_for_app_ids(
        &self,
        app_ids: &[String],
    ) -> ApiResult<ListResponse<RouteResource>> {
        self.backend.retrieve_routes_for_app_ids(app_ids).await
    }

    async fn retrieve_web_processes_for_app_ids(
        &self,
        app_ids: &[String],
    ) -> ApiResult<ListResponse<ProcessResource>> {
        self.backend
            .retrieve_web_processes_for_app_ids(app_ids)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockCloudController;

    fn cached_mock() -> (Arc<MockCloudController>, CachedCloudController) {
        let mock = Arc::new(MockCloudController::new());
        mock.add_org("org-1", "myorg");
        mock.add_space("org-1", "space-1", "dev");

        let cached = CachedCloudController::new(
            Arc::clone(&mock) as Arc<dyn CloudController>,
            &CacheConfig::default(),
        );
        (mock, cached)
    }

    #[tokio::test]
    async fn test_repeated_org_lookup_hits_backend_once() {
        let (mock, cached) = cached_mock();

        let first = cached.retrieve_org_id("myorg").await.unwrap();
        let second = cached.retrieve_org_id("myorg").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.resources[0].id, "org-1");
        assert_eq!(mock.call_count("retrieve_org_id"), 1);
    }

    #[tokio::test]
    async fn test_space_cache_keys_by_org_and_name() {
        let (mock, cached) = cached_mock();
        mock.add_space("org-2", "space-9", "dev");

        cached.retrieve_space_id("org-1", "dev").await.unwrap();
        cached.retrieve_space_id("org-2", "dev").await.unwrap();
        cached.retrieve_space_id("org-1", "dev").await.unwrap();

        // same space name under two orgs = two distinct cache entries
        assert_eq!(mock.call_count("retrieve_space_id"), 2);
    }

    #[tokio::test]
    async fn test_invalidation_forces_refetch() {
        let (mock, cached) = cached_mock();

        cached.retrieve_org_id("myorg").await.unwrap();
        cached.invalidate_cache_org();
        cached.retrieve_org_id("myorg").await.unwrap();

        assert_eq!(mock.call_count("retrieve_org_id"), 2);
    }

    #[tokio::test]
    async fn test_invalidating_one_category_leaves_others_cached() {
        let (mock, cached) = cached_mock();

        cached.retrieve_org_id("myorg").await.unwrap();
        cached.retrieve_space_id("org-1", "dev").await.unwrap();

        cached.invalidate_cache_space();
        cached.retrieve_org_id("myorg").await.unwrap();
        cached.retrieve_space_id("org-1", "dev").await.unwrap();

        assert_eq!(mock.call_count("retrieve_org_id"), 1);
        assert_eq!(mock.call_count("retrieve_space_id"), 2);
    }

    #[tokio::test]
    async fn test_space_summary_cache_and_application_invalidation() {
        let (mock, cached) = cached_mock();
        mock.add_summary_app("space-1", "app-1", "testapp", 2);

        let first = cached.retrieve_space_summary("space-1").await.unwrap();
        cached.retrieve_space_summary("space-1").await.unwrap();
        assert_eq!(first.applications[0].instances, 2);
        assert_eq!(mock.call_count("retrieve_space_summary"), 1);

        cached.invalidate_cache_application();
        cached.retrieve_space_summary("space-1").await.unwrap();
        assert_eq!(mock.call_count("retrieve_space_summary"), 2);
    }

    #[tokio::test]
    async fn test_route_caches_and_invalidation() {
        let (mock, cached) = cached_mock();
        mock.add_route(
            "app-1",
            crate::client::RouteResource {
                id: "route-1".to_string(),
                host: "hostapp1".to_string(),
                path: String::new(),
                port: None,
                domain_id: "dom-1".to_string(),
                destinations: Vec::new(),
            },
        );

        cached.retrieve_route_mapping("app-1").await.unwrap();
        cached.retrieve_route_mapping("app-1").await.unwrap();
        assert_eq!(mock.call_count("retrieve_route_mapping"), 1);

        let route = cached.retrieve_route("route-1").await.unwrap();
        cached.retrieve_route("route-1").await.unwrap();
        assert_eq!(route.host, "hostapp1");
        assert_eq!(mock.call_count("retrieve_route"), 1);

        cached.invalidate_cache_route();
        cached.retrieve_route_mapping("app-1").await.unwrap();
        cached.retrieve_route("route-1").await.unwrap();
        assert_eq!(mock.call_count("retrieve_route_mapping"), 2);
        assert_eq!(mock.call_count("retrieve_route"), 2);
    }

    #[tokio::test]
    async fn test_process_cache_and_invalidation() {
        let (mock, cached) = cached_mock();
        mock.set_web_instances("app-1", 3);

        let first = cached
            .retrieve_processes("org-1", "space-1", "app-1")
            .await
            .unwrap();
        cached
            .retrieve_processes("org-1", "space-1", "app-1")
            .await
            .unwrap();
        assert_eq!(first.resources[0].instances, 3);
        assert_eq!(mock.call_count("retrieve_processes"), 1);

        cached.invalidate_cache_process();
        cached
            .retrieve_processes("org-1", "space-1", "app-1")
            .await
            .unwrap();
        assert_eq!(mock.call_count("retrieve_processes"), 2);
    }

    #[tokio::test]
    async fn test_bulk_operations_pass_through() {
        let (mock, cached) = cached_mock();
        let ids = vec!["app-1".to_string()];

        cached.retrieve_routes_for_app_ids(&ids).await.unwrap();
        cached.retrieve_routes_for_app_ids(&ids).await.unwrap();

        assert_eq!(mock.call_count("retrieve_routes_for_app_ids"), 2);
    }
}
