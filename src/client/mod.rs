//! Control-plane API accessor
//!
//! The [`CloudController`] trait abstracts the upstream platform API that
//! enumerates organizations, spaces, applications, routes and processes.
//! Everything above this trait (caching, aggregation, discovery) is
//! implementation-agnostic; the concrete HTTP client lives in
//! [`http`], and tests use [`mock::MockCloudController`].

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;

pub mod aggregator;
pub mod fetcher;
pub mod http;
#[cfg(test)]
pub mod mock;
pub mod rate_limit;

pub use aggregator::{BulkLookup, RequestAggregator, RoutesForAppsLookup, WebProcessesLookup};
pub use fetcher::RequestFetcher;
pub use http::CloudControllerClient;
#[cfg(test)]
pub use mock::MockCloudController;
pub use rate_limit::UpstreamRateLimiter;

/// Logical categories of upstream calls.
///
/// Carries no behavior; used to label rate-limiter waits and request
/// duration observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// Resolve a single organization by name
    Org,
    /// List every organization
    AllOrgs,
    /// Resolve a single space by name within an organization
    Space,
    /// List every space within an organization
    SpaceInOrg,
    /// List every application within a space
    AppsInSpace,
    /// Application summary of a space
    SpaceSummary,
    /// Domain listings and single-domain lookups
    Domains,
    /// Route mappings and route lookups
    Routes,
    /// Process (instance count) lookups
    Processes,
}

impl RequestType {
    /// Label used for metrics and log lines.
    pub fn metric_name(&self) -> &'static str {
        match self {
            RequestType::Org => "org",
            RequestType::AllOrgs => "allOrgs",
            RequestType::Space => "space",
            RequestType::SpaceInOrg => "spaceInOrg",
            RequestType::AppsInSpace => "allApps",
            RequestType::SpaceSummary => "spaceSummary",
            RequestType::Domains => "domains",
            RequestType::Routes => "routes",
            RequestType::Processes => "processes",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.metric_name())
    }
}

/// A paginated list response from the control plane.
///
/// `total_pages` reflects the upstream pagination; after the fetcher has
/// merged all pages it still reports the page count the upstream
/// advertised, so consumers can sanity-check completeness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub total_pages: u32,
    pub resources: Vec<T>,
}

impl<T> ListResponse<T> {
    pub fn new(total_pages: u32, resources: Vec<T>) -> Self {
        Self {
            total_pages,
            resources,
        }
    }

    /// Single-page response, the common case in tests.
    pub fn single_page(resources: Vec<T>) -> Self {
        Self {
            total_pages: 1,
            resources,
        }
    }
}

/// Organization resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgResource {
    pub id: String,
    pub name: String,
}

/// Space resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceResource {
    pub id: String,
    pub name: String,
}

/// Application state reported by the control plane. Only `STARTED`
/// applications are considered scrapable.
pub const APP_STATE_STARTED: &str = "STARTED";

/// Application resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppResource {
    pub id: String,
    pub name: String,
    pub state: String,

    /// Platform metadata annotations, e.g. `prometheus.io/path`.
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl AppResource {
    pub fn is_scrapable(&self) -> bool {
        self.state == APP_STATE_STARTED
    }
}

/// One application entry of a space summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceSummaryApp {
    pub id: String,
    pub name: String,
    pub instances: u32,
    pub urls: Vec<String>,
}

/// Summary of all applications in a space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceSummary {
    pub applications: Vec<SpaceSummaryApp>,
}

/// Domain resource; `internal` marks container-to-container domains
/// that require the instance-index URL scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainResource {
    pub id: String,
    pub name: String,
    pub internal: bool,
}

/// Route resource. `destinations` lists the application ids the route
/// points at, which is how bulk route responses are fanned back out to
/// the requesting applications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteResource {
    pub id: String,
    pub host: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub domain_id: String,
    #[serde(default)]
    pub destinations: Vec<String>,
}

/// Process resource carrying the running instance count of one process
/// type of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResource {
    pub id: String,
    pub app_id: String,
    pub process_type: String,
    pub instances: u32,
}

/// The process type that serves HTTP traffic and is therefore the one
/// whose instance count matters for scraping.
pub const PROCESS_TYPE_WEB: &str = "web";

/// Asynchronous accessor for the upstream control-plane API.
///
/// Implementations must be safe to share across concurrent discovery
/// chains. All operations are read-only listings.
#[async_trait]
pub trait CloudController: Send + Sync {
    /// Resolve a single organization by name. The response carries zero
    /// or one resources.
    async fn retrieve_org_id(&self, org_name: &str) -> ApiResult<ListResponse<OrgResource>>;

    /// List every organization visible to the configured credentials.
    async fn retrieve_all_org_ids(&self) -> ApiResult<ListResponse<OrgResource>>;

    /// Resolve a single space by name within an organization.
    async fn retrieve_space_id(
        &self,
        org_id: &str,
        space_name: &str,
    ) -> ApiResult<ListResponse<SpaceResource>>;

    /// List every space within an organization.
    async fn retrieve_space_ids_in_org(
        &self,
        org_id: &str,
    ) -> ApiResult<ListResponse<SpaceResource>>;

    /// List every application within a space.
    async fn retrieve_all_application_ids_in_space(
        &self,
        org_id: &str,
        space_id: &str,
    ) -> ApiResult<ListResponse<AppResource>>;

    /// Retrieve the application summary of a space.
    async fn retrieve_space_summary(&self, space_id: &str) -> ApiResult<SpaceSummary>;

    /// List the domains available to an organization.
    async fn retrieve_all_domains(&self, org_id: &str) -> ApiResult<ListResponse<DomainResource>>;

    /// List the routes mapped to an application.
    async fn retrieve_route_mapping(
        &self,
        app_id: &str,
    ) -> ApiResult<ListResponse<RouteResource>>;

    /// Retrieve a single route.
    async fn retrieve_route(&self, route_id: &str) -> ApiResult<RouteResource>;

    /// Retrieve a single (possibly shared) domain.
    async fn retrieve_shared_domain(&self, domain_id: &str) -> ApiResult<DomainResource>;

    /// List the processes of an application.
    async fn retrieve_processes(
        &self,
        org_id: &str,
        space_id: &str,
        app_id: &str,
    ) -> ApiResult<ListResponse<ProcessResource>>;

    /// Bulk variant: routes for a whole set of applications in one call.
    /// Consumed by the request aggregator.
    async fn retrieve_routes_for_app_ids(
        &self,
        app_ids: &[String],
    ) -> ApiResult<ListResponse<RouteResource>>;

    /// Bulk variant: `web` processes for a whole set of applications in
    /// one call. Consumed by the request aggregator.
    async fn retrieve_web_processes_for_app_ids(
        &self,
        app_ids: &[String],
    ) -> ApiResult<ListResponse<ProcessResource>>;
}
