//! Configurable in-memory control plane for tests

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    AppResource, CloudController, DomainResource, ListResponse, OrgResource, ProcessResource,
    RouteResource, SpaceResource, SpaceSummary, SpaceSummaryApp, APP_STATE_STARTED,
    PROCESS_TYPE_WEB,
};
use crate::error::{ApiError, ApiResult};

/// In-memory [`CloudController`] with seedable data, per-method call
/// counts and error injection.
#[derive(Default)]
pub struct MockCloudController {
    orgs: Mutex<Vec<OrgResource>>,
    spaces: Mutex<HashMap<String, Vec<SpaceResource>>>,
    apps: Mutex<HashMap<String, Vec<AppResource>>>,
    summaries: Mutex<HashMap<String, SpaceSummary>>,
    domains: Mutex<HashMap<String, Vec<DomainResource>>>,
    routes: Mutex<HashMap<String, Vec<RouteResource>>>,
    processes: Mutex<HashMap<String, Vec<ProcessResource>>>,
    fail_with: Mutex<Option<ApiError>>,
    calls: Mutex<HashMap<&'static str, u32>>,
}

impl MockCloudController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_org(&self, id: &str, name: &str) {
        self.orgs.lock().unwrap().push(OrgResource {
            id: id.to_string(),
            name: name.to_string(),
        });
    }

    pub fn add_space(&self, org_id: &str, id: &str, name: &str) {
        self.spaces
            .lock()
            .unwrap()
            .entry(org_id.to_string())
            .or_default()
            .push(SpaceResource {
                id: id.to_string(),
                name: name.to_string(),
            });
    }

    /// Seed a started application with no annotations.
    pub fn add_app(&self, space_id: &str, id: &str, name: &str) {
        self.add_app_with_state(space_id, id, name, APP_STATE_STARTED, HashMap::new());
    }

    pub fn add_app_with_state(
        &self,
        space_id: &str,
        id: &str,
        name: &str,
        state: &str,
        annotations: HashMap<String, String>,
    ) {
        self.apps
            .lock()
            .unwrap()
            .entry(space_id.to_string())
            .or_default()
            .push(AppResource {
                id: id.to_string(),
                name: name.to_string(),
                state: state.to_string(),
                annotations,
            });
    }

    pub fn add_summary_app(&self, space_id: &str, id: &str, name: &str, instances: u32) {
        self.summaries
            .lock()
            .unwrap()
            .entry(space_id.to_string())
            .or_insert_with(|| SpaceSummary {
                applications: Vec::new(),
            })
            .applications
            .push(SpaceSummaryApp {
                id: id.to_string(),
                name: name.to_string(),
                instances,
                urls: Vec::new(),
            });
    }

    pub fn add_domain(&self, org_id: &str, id: &str, name: &str, internal: bool) {
        self.domains
            .lock()
            .unwrap()
            .entry(org_id.to_string())
            .or_default()
            .push(DomainResource {
                id: id.to_string(),
                name: name.to_string(),
                internal,
            });
    }

    pub fn add_route(&self, app_id: &str, route: RouteResource) {
        self.routes
            .lock()
            .unwrap()
            .entry(app_id.to_string())
            .or_default()
            .push(route);
    }

    /// Seed one `web` process with the given instance count.
    pub fn set_web_instances(&self, app_id: &str, instances: u32) {
        self.processes.lock().unwrap().insert(
            app_id.to_string(),
            vec![ProcessResource {
                id: format!("{app_id}-web"),
                app_id: app_id.to_string(),
                process_type: PROCESS_TYPE_WEB.to_string(),
                instances,
            }],
        );
    }

    pub fn add_process(&self, app_id: &str, process: ProcessResource) {
        self.processes
            .lock()
            .unwrap()
            .entry(app_id.to_string())
            .or_default()
            .push(process);
    }

    /// Make every subsequent call fail with `err`.
    pub fn fail_with(&self, err: ApiError) {
        *self.fail_with.lock().unwrap() = Some(err);
    }

    pub fn clear_failure(&self) {
        *self.fail_with.lock().unwrap() = None;
    }

    pub fn call_count(&self, method: &'static str) -> u32 {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    fn record(&self, method: &'static str) -> ApiResult<()> {
        *self.calls.lock().unwrap().entry(method).or_insert(0) += 1;
        match &*self.fail_with.lock().unwrap() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CloudController for MockCloudController {
    async fn retrieve_org_id(&self, org_name: &str) -> ApiResult<ListResponse<OrgResource>> {
        self.record("retrieve_org_id")?;
        let orgs = self.orgs.lock().unwrap();
        Ok(ListResponse::single_page(
            orgs.iter().filter(|o| o.name == org_name).cloned().collect(),
        ))
    }

    async fn retrieve_all_org_ids(&self) -> ApiResult<ListResponse<OrgResource>> {
        self.record("retrieve_all_org_ids")?;
        Ok(ListResponse::single_page(self.orgs.lock().unwrap().clone()))
    }

    async fn retrieve_space_id(
        &self,
        org_id: &str,
        space_name: &str,
    ) -> ApiResult<ListResponse<SpaceResource>> {
        self.record("retrieve_space_id")?;
        let spaces = self.spaces.lock().unwrap();
        Ok(ListResponse::single_page(
            spaces
                .get(org_id)
                .map(|s| s.iter().filter(|s| s.name == space_name).cloned().collect())
                .unwrap_or_default(),
        ))
    }

    async fn retrieve_space_ids_in_org(
        &self,
        org_id: &str,
    ) -> ApiResult<ListResponse<SpaceResource>> {
        self.record("retrieve_space_ids_in_org")?;
        Ok(ListResponse::single_page(
            self.spaces
                .lock()
                .unwrap()
                .get(org_id)
                .cloned()
                .unwrap_or_default(),
        ))
    }

    async fn retrieve_all_application_ids_in_space(
        &self,
        _org_id: &str,
        space_id: &str,
    ) -> ApiResult<ListResponse<AppResource>> {
        self.record("retrieve_all_application_ids_in_space")?;
        Ok(ListResponse::single_page(
            self.apps
                .lock()
                .unwrap()
                .get(space_id)
                .cloned()
                .unwrap_or_default(),
        ))
    }

    async fn retrieve_space_summary(&self, space_id: &str) -> ApiResult<SpaceSummary> {
        self.record("retrieve_space_summary")?;
        Ok(self
            .summaries
            .lock()
            .unwrap()
            .get(space_id)
            .cloned()
            .unwrap_or(SpaceSummary {
                applications: Vec::new(),
            }))
    }

    async fn retrieve_all_domains(&self, org_id: &str) -> ApiResult<ListResponse<DomainResource>> {
        self.record("retrieve_all_domains")?;
        Ok(ListResponse::single_page(
            self.domains
                .lock()
                .unwrap()
                .get(org_id)
                .cloned()
                .unwrap_or_default(),
        ))
    }

    async fn retrieve_route_mapping(
        &self,
        app_id: &str,
    ) -> ApiResult<ListResponse<RouteResource>> {
        self.record("retrieve_route_mapping")?;
        Ok(ListResponse::single_page(
            self.routes
                .lock()
                .unwrap()
                .get(app_id)
                .cloned()
                .unwrap_or_default(),
        ))
    }

    async fn retrieve_route(&self, route_id: &str) -> ApiResult<RouteResource> {
        self.record("retrieve_route")?;
        self.routes
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|r| r.id == route_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("route {route_id}")))
    }

    async fn retrieve_shared_domain(&self, domain_id: &str) -> ApiResult<DomainResource> {
        self.record("retrieve_shared_domain")?;
        self.domains
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|d| d.id == domain_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("domain {domain_id}")))
    }

    async fn retrieve_processes(
        &self,
        _org_id: &str,
        _space_id: &str,
        app_id: &str,
    ) -> ApiResult<ListResponse<ProcessResource>> {
        self.record("retrieve_processes")?;
        Ok(ListResponse::single_page(
            self.processes
                .lock()
                .unwrap()
                .get(app_id)
                .cloned()
                .unwrap_or_default(),
        ))
    }

    async fn retrieve_routes_for_app_ids(
        &self,
        app_ids: &[String],
    ) -> ApiResult<ListResponse<RouteResource>> {
        self.record("retrieve_routes_for_app_ids")?;
        let routes = self.routes.lock().unwrap();
        let mut matched: Vec<RouteResource> = Vec::new();
        for app_id in app_ids {
            if let Some(app_routes) = routes.get(app_id) {
                for route in app_routes {
                    if let Some(existing) = matched.iter_mut().find(|r| r.id == route.id) {
                        if !existing.destinations.contains(app_id) {
                            existing.destinations.push(app_id.clone());
                        }
                        continue;
                    }
                    let mut route = route.clone();
                    if !route.destinations.contains(app_id) {
                        route.destinations.push(app_id.clone());
                    }
                    matched.push(route);
                }
            }
        }
        Ok(ListResponse::single_page(matched))
    }

    async fn retrieve_web_processes_for_app_ids(
        &self,
        app_ids: &[String],
    ) -> ApiResult<ListResponse<ProcessResource>> {
        self.record("retrieve_web_processes_for_app_ids")?;
        let processes = self.processes.lock().unwrap();
        let mut matched: Vec<ProcessResource> = Vec::new();
        for app_id in app_ids {
            if let Some(app_processes) = processes.get(app_id) {
                matched.extend(
                    app_processes
                        .iter()
                        .filter(|p| p.process_type == PROCESS_TYPE_WEB)
                        .cloned(),
                );
            }
        }
        Ok(ListResponse::single_page(matched))
    }
}
