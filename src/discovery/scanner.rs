//! Instance enumeration and access-URL synthesis
//!
//! For each resolved target the scanner resolves the application's id,
//! asks the process aggregator for the running `web` instance count,
//! asks the routes aggregator for the mapped routes, selects one route
//! (preferred-route regexes, then first-route fallback) and emits one
//! [`Instance`] per running index with a fully formed access URL.

use std::sync::Arc;

use futures::future::join_all;
use log::{debug, warn};
use regex::Regex;

use super::{Instance, ResolvedTarget};
use crate::client::{
    CloudController, DomainResource, RequestAggregator, RouteResource, RoutesForAppsLookup,
    WebProcessesLookup,
};
use crate::error::ApiResult;

pub type ApplicationIdFilter<'a> = &'a (dyn Fn(&str) -> bool + Sync);
pub type InstanceFilter<'a> = &'a (dyn Fn(&Instance) -> bool + Sync);

pub struct InstanceScanner {
    client: Arc<dyn CloudController>,
    routes: Arc<RequestAggregator<RoutesForAppsLookup>>,
    web_processes: Arc<RequestAggregator<WebProcessesLookup>>,
    default_internal_route_port: u16,
}

impl InstanceScanner {
    pub fn new(
        client: Arc<dyn CloudController>,
        routes: Arc<RequestAggregator<RoutesForAppsLookup>>,
        web_processes: Arc<RequestAggregator<WebProcessesLookup>>,
        default_internal_route_port: u16,
    ) -> Self {
        Self {
            client,
            routes,
            web_processes,
            default_internal_route_port,
        }
    }

    /// Determine every running instance of the given targets.
    ///
    /// Failures are isolated per target. The optional filters prune by
    /// application id (before any per-app lookups) and by fully built
    /// instance.
    pub async fn determine_instances_from_targets(
        &self,
        targets: &[ResolvedTarget],
        application_id_filter: Option<ApplicationIdFilter<'_>>,
        instance_filter: Option<InstanceFilter<'_>>,
    ) -> Vec<Instance> {
        let scans = join_all(
            targets
                .iter()
                .map(|t| self.scan_target(t, application_id_filter)),
        )
        .await;

        let mut instances = Vec::new();
        for (target, scan) in targets.iter().zip(scans) {
            match scan {
                Ok(found) => instances.extend(found),
                Err(err) => warn!(
                    "failed to scan {}/{}/{}: {err}; skipping it this cycle",
                    target.org_name, target.space_name, target.application_name
                ),
            }
        }

        if let Some(filter) = instance_filter {
            instances.retain(|i| filter(i));
        }
        instances
    }

    async fn scan_target(
        &self,
        target: &ResolvedTarget,
        application_id_filter: Option<ApplicationIdFilter<'_>>,
    ) -> ApiResult<Vec<Instance>> {
        let Some(org_id) = self.resolve_org_id(target).await? else {
            return Ok(Vec::new());
        };
        let Some(space_id) = self.resolve_space_id(target, &org_id).await? else {
            return Ok(Vec::new());
        };
        let Some(app_id) = self.resolve_application_id(target, &org_id, &space_id).await? else {
            return Ok(Vec::new());
        };

        if let Some(filter) = application_id_filter {
            if !filter(&app_id) {
                return Ok(Vec::new());
            }
        }

        let Some(instance_count) = self.web_instance_count(target, &app_id).await? else {
            return Ok(Vec::new());
        };

        let routes = match self.routes.lookup(app_id.clone()).await? {
            Some(routes) if !routes.is_empty() => routes,
            _ => {
                debug!(
                    "application '{}' has no routes; no instances emitted",
                    target.application_name
                );
                return Ok(Vec::new());
            }
        };

        let mut routes_with_domains = Vec::with_capacity(routes.len());
        for route in routes {
            let domain = self.client.retrieve_shared_domain(&route.domain_id).await?;
            routes_with_domains.push((route, domain));
        }

        let preferred = target.original_target.compiled_preferred_route_regexes();
        let (route, domain) = select_route(&routes_with_domains, &preferred);

        let mut instances = Vec::with_capacity(instance_count as usize);
        if domain.internal {
            let port = target
                .original_target
                .internal_route_port
                .unwrap_or(self.default_internal_route_port);
            for index in 0..instance_count {
                let url = internal_access_url(index, &route.host, &domain.name, port, &target.path);
                instances.push(Instance::new(target.clone(), &app_id, index, url, true));
            }
        } else {
            let url =
                external_access_url(&target.protocol, &route.host, &domain.name, &target.path);
            for index in 0..instance_count {
                instances.push(Instance::new(
                    target.clone(),
                    &app_id,
                    index,
                    url.clone(),
                    false,
                ));
            }
        }

        Ok(instances)
    }

    async fn resolve_org_id(&self, target: &ResolvedTarget) -> ApiResult<Option<String>> {
        let response = self.client.retrieve_org_id(&target.org_name).await?;
        let id = response.resources.into_iter().next().map(|o| o.id);
        if id.is_none() {
            debug!("organization '{}' not found while scanning", target.org_name);
        }
        Ok(id)
    }

    async fn resolve_space_id(
        &self,
        target: &ResolvedTarget,
        org_id: &str,
    ) -> ApiResult<Option<String>> {
        let response = self
            .client
            .retrieve_space_id(org_id, &target.space_name)
            .await?;
        let id = response.resources.into_iter().next().map(|s| s.id);
        if id.is_none() {
            debug!("space '{}' not found while scanning", target.space_name);
        }
        Ok(id)
    }

    async fn resolve_application_id(
        &self,
        target: &ResolvedTarget,
        org_id: &str,
        space_id: &str,
    ) -> ApiResult<Option<String>> {
        let apps = self
            .client
            .retrieve_all_application_ids_in_space(org_id, space_id)
            .await?
            .resources;
        let id = apps
            .into_iter()
            .find(|a| a.name.eq_ignore_ascii_case(&target.application_name))
            .map(|a| a.id);
        if id.is_none() {
            debug!(
                "application '{}' not found while scanning",
                target.application_name
            );
        }
        Ok(id)
    }

    /// Instance count of the application's `web` process. Anything but
    /// exactly one web process makes the count undeterminable.
    async fn web_instance_count(
        &self,
        target: &ResolvedTarget,
        app_id: &str,
    ) -> ApiResult<Option<u32>> {
        let processes = self
            .web_processes
            .lookup(app_id.to_string())
            .await?
            .unwrap_or_default();

        match processes.as_slice() {
            [process] => Ok(Some(process.instances)),
            [] => {
                warn!(
                    "application '{}' has no web process; cannot determine instance count",
                    target.application_name
                );
                Ok(None)
            }
            many => {
                warn!(
                    "application '{}' has {} web processes; cannot determine instance count",
                    target.application_name,
                    many.len()
                );
                Ok(None)
            }
        }
    }
}

/// Pick the route to scrape: the first preferred pattern with any
/// matching route wins; with no match (or no patterns) the first
/// listed route is used, for compatibility with existing setups.
fn select_route<'a>(
    routes: &'a [(RouteResource, DomainResource)],
    preferred: &[Regex],
) -> &'a (RouteResource, DomainResource) {
    for regex in preferred {
        if let Some(found) = routes
            .iter()
            .find(|(route, domain)| regex.is_match(&route_url(route, domain)))
        {
            return found;
        }
    }
    &routes[0]
}

/// The URL form preferred-route patterns are matched against:
/// `<host>.<domain><route path>`.
fn route_url(route: &RouteResource, domain: &DomainResource) -> String {
    format!("{}.{}{}", route.host, domain.name, route.path)
}

/// Normalize a scrape path to exactly one leading and no trailing
/// slash.
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn external_access_url(protocol: &str, host: &str, domain: &str, path: &str) -> String {
    format!("{protocol}://{host}.{domain}{}", normalize_path(path))
}

/// Internal domains are reached per instance index:
/// `http://<index>.<host>.<domain>:<port>/<path>`.
fn internal_access_url(index: u32, host: &str, domain: &str, port: u16, path: &str) -> String {
    format!(
        "http://{index}.{host}.{domain}:{port}{}",
        normalize_path(path)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockCloudController, RouteResource};
    use crate::config::Target;
    use std::time::Duration;

    fn route(id: &str, host: &str, domain_id: &str) -> RouteResource {
        RouteResource {
            id: id.to_string(),
            host: host.to_string(),
            path: String::new(),
            port: None,
            domain_id: domain_id.to_string(),
            destinations: Vec::new(),
        }
    }

    fn seeded_mock() -> Arc<MockCloudController> {
        let mock = Arc::new(MockCloudController::new());
        mock.add_org("org-1", "o");
        mock.add_space("org-1", "space-1", "s");
        mock.add_app("space-1", "app-1", "app1");
        mock.add_domain("org-1", "dom-1", "shared.domain.example.org", false);
        mock.add_route("app-1", route("route-1", "hostapp1", "dom-1"));
        mock.set_web_instances("app-1", 2);
        mock
    }

    fn scanner(mock: &Arc<MockCloudController>) -> InstanceScanner {
        scanner_with_port(mock, 8080)
    }

    fn scanner_with_port(mock: &Arc<MockCloudController>, port: u16) -> InstanceScanner {
        let client = Arc::clone(mock) as Arc<dyn CloudController>;
        let routes = Arc::new(RequestAggregator::new(
            Arc::new(RoutesForAppsLookup::new(Arc::clone(&client))),
            Duration::from_millis(10),
            100,
        ));
        let web_processes = Arc::new(RequestAggregator::new(
            Arc::new(WebProcessesLookup::new(Arc::clone(&client))),
            Duration::from_millis(10),
            100,
        ));
        InstanceScanner::new(client, routes, web_processes, port)
    }

    fn resolved(target: Target) -> ResolvedTarget {
        ResolvedTarget::from_target(&target, "o", "s", "app1")
    }

    #[tokio::test]
    async fn test_external_access_urls_per_instance() {
        let mock = seeded_mock();
        let targets = [resolved(Target::default())];

        let instances = scanner(&mock)
            .determine_instances_from_targets(&targets, None, None)
            .await;

        assert_eq!(instances.len(), 2);
        for instance in &instances {
            assert_eq!(
                instance.access_url,
                "https://hostapp1.shared.domain.example.org/metrics"
            );
            assert!(!instance.internal);
        }
        let mut ids: Vec<&str> = instances.iter().map(|i| i.instance_id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["app-1:0", "app-1:1"]);
    }

    #[tokio::test]
    async fn test_internal_domain_uses_default_port() {
        let mock = seeded_mock();
        mock.add_domain("org-1", "dom-int", "apps.internal", true);
        mock.add_route("app-2", route("route-2", "hostapp2", "dom-int"));
        mock.add_app("space-1", "app-2", "app2");
        mock.set_web_instances("app-2", 1);

        let targets = [ResolvedTarget::from_target(&Target::default(), "o", "s", "app2")];
        let instances = scanner(&mock)
            .determine_instances_from_targets(&targets, None, None)
            .await;

        assert_eq!(instances.len(), 1);
        assert_eq!(
            instances[0].access_url,
            "http://0.hostapp2.apps.internal:8080/metrics"
        );
        assert!(instances[0].internal);
    }

    #[tokio::test]
    async fn test_internal_port_override_from_target() {
        let mock = seeded_mock();
        mock.add_domain("org-1", "dom-int", "apps.internal", true);
        mock.add_route("app-2", route("route-2", "hostapp2", "dom-int"));
        mock.add_app("space-1", "app-2", "app2");
        mock.set_web_instances("app-2", 1);

        let target = Target {
            internal_route_port: Some(9090),
            ..Target::default()
        };
        let targets = [ResolvedTarget::from_target(&target, "o", "s", "app2")];
        let instances = scanner(&mock)
            .determine_instances_from_targets(&targets, None, None)
            .await;

        assert_eq!(
            instances[0].access_url,
            "http://0.hostapp2.apps.internal:9090/metrics"
        );
    }

    #[tokio::test]
    async fn test_preferred_route_regex_selects_matching_route() {
        let mock = seeded_mock();
        mock.add_route("app-1", route("route-2", "hostapp1-canary", "dom-1"));

        let target = Target {
            preferred_route_regex: vec![".*canary.*".to_string()],
            ..Target::default()
        };
        let targets = [resolved(target)];
        let instances = scanner(&mock)
            .determine_instances_from_targets(&targets, None, None)
            .await;

        assert_eq!(
            instances[0].access_url,
            "https://hostapp1-canary.shared.domain.example.org/metrics"
        );
    }

    #[tokio::test]
    async fn test_unmatched_preferred_regex_falls_back_to_first_route() {
        let mock = seeded_mock();
        mock.add_route("app-1", route("route-2", "secondhost", "dom-1"));

        let target = Target {
            preferred_route_regex: vec!["nothing-matches-this".to_string()],
            ..Target::default()
        };
        let targets = [resolved(target)];
        let instances = scanner(&mock)
            .determine_instances_from_targets(&targets, None, None)
            .await;

        assert_eq!(
            instances[0].access_url,
            "https://hostapp1.shared.domain.example.org/metrics"
        );
    }

    #[tokio::test]
    async fn test_missing_web_process_skips_application() {
        let mock = seeded_mock();
        mock.add_app("space-1", "app-2", "app2");
        mock.add_route("app-2", route("route-2", "hostapp2", "dom-1"));
        // no process seeded for app-2

        let targets = [ResolvedTarget::from_target(&Target::default(), "o", "s", "app2")];
        let instances = scanner(&mock)
            .determine_instances_from_targets(&targets, None, None)
            .await;
        assert!(instances.is_empty());
    }

    #[tokio::test]
    async fn test_multiple_web_processes_skip_application() {
        let mock = seeded_mock();
        mock.add_process(
            "app-1",
            crate::client::ProcessResource {
                id: "p2".to_string(),
                app_id: "app-1".to_string(),
                process_type: "web".to_string(),
                instances: 3,
            },
        );

        let targets = [resolved(Target::default())];
        let instances = scanner(&mock)
            .determine_instances_from_targets(&targets, None, None)
            .await;
        assert!(instances.is_empty());
    }

    #[tokio::test]
    async fn test_filters_prune_applications_and_instances() {
        let mock = seeded_mock();
        let targets = [resolved(Target::default())];
        let scanner = scanner(&mock);

        let none = scanner
            .determine_instances_from_targets(&targets, Some(&|id: &str| id != "app-1"), None)
            .await;
        assert!(none.is_empty());

        let only_zero = scanner
            .determine_instances_from_targets(
                &targets,
                None,
                Some(&|i: &Instance| i.instance_id.ends_with(":0")),
            )
            .await;
        assert_eq!(only_zero.len(), 1);
        assert_eq!(only_zero[0].instance_id, "app-1:0");
    }

    #[test]
    fn test_path_normalization() {
        assert_eq!(normalize_path("/metrics"), "/metrics");
        assert_eq!(normalize_path("metrics"), "/metrics");
        assert_eq!(normalize_path("metrics/"), "/metrics");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(
            external_access_url("https", "h", "d.example.org", "metrics/"),
            "https://h.d.example.org/metrics"
        );
    }
}
