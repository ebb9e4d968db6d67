//! HTTP implementation of the control-plane accessor
//!
//! Talks to the v3-style REST API of the platform controller. All
//! listing endpoints are paginated; every call goes through the
//! [`RequestFetcher`] for rate limiting, timeout and retry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{
    AppResource, CloudController, DomainResource, ListResponse, OrgResource, ProcessResource,
    RequestFetcher, RequestType, RouteResource, SpaceResource, SpaceSummary, SpaceSummaryApp,
};
use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult, Error};

const RESULTS_PER_PAGE: u32 = 100;

/// Control-plane REST client.
pub struct CloudControllerClient {
    http: HttpClient,
    base_url: String,
    api_token: Option<String>,
    fetcher: Arc<RequestFetcher>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    pagination: Pagination,
    resources: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct NamedWire {
    guid: String,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct MetadataWire {
    #[serde(default)]
    annotations: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct AppWire {
    guid: String,
    name: String,
    state: String,
    #[serde(default)]
    metadata: Option<MetadataWire>,
}

#[derive(Debug, Deserialize)]
struct DomainWire {
    guid: String,
    name: String,
    #[serde(default)]
    internal: bool,
}

#[derive(Debug, Deserialize)]
struct RelationshipWire {
    data: RelationshipDataWire,
}

#[derive(Debug, Deserialize)]
struct RelationshipDataWire {
    guid: String,
}

#[derive(Debug, Deserialize)]
struct DestinationWire {
    app: RelationshipWire,
}

#[derive(Debug, Deserialize)]
struct RouteWire {
    guid: String,
    host: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    port: Option<u16>,
    relationships: RouteRelationshipsWire,
    #[serde(default)]
    destinations: Vec<DestinationWire>,
}

#[derive(Debug, Deserialize)]
struct RouteRelationshipsWire {
    domain: RelationshipWire,
}

#[derive(Debug, Deserialize)]
struct ProcessWire {
    guid: String,
    #[serde(rename = "type")]
    process_type: String,
    instances: u32,
    relationships: ProcessRelationshipsWire,
}

#[derive(Debug, Deserialize)]
struct ProcessRelationshipsWire {
    app: RelationshipWire,
}

#[derive(Debug, Deserialize)]
struct SpaceSummaryWire {
    apps: Vec<SpaceSummaryAppWire>,
}

#[derive(Debug, Deserialize)]
struct SpaceSummaryAppWire {
    guid: String,
    name: String,
    instances: u32,
    #[serde(default)]
    urls: Vec<String>,
}

impl From<NamedWire> for OrgResource {
    fn from(w: NamedWire) -> Self {
        OrgResource {
            id: w.guid,
            name: w.name,
        }
    }
}

impl From<NamedWire> for SpaceResource {
    fn from(w: NamedWire) -> Self {
        SpaceResource {
            id: w.guid,
            name: w.name,
        }
    }
}

impl From<AppWire> for AppResource {
    fn from(w: AppWire) -> Self {
        AppResource {
            id: w.guid,
            name: w.name,
            state: w.state,
            annotations: w.metadata.unwrap_or_default().annotations,
        }
    }
}

impl From<DomainWire> for DomainResource {
    fn from(w: DomainWire) -> Self {
        DomainResource {
            id: w.guid,
            name: w.name,
            internal: w.internal,
        }
    }
}

impl From<RouteWire> for RouteResource {
    fn from(w: RouteWire) -> Self {
        RouteResource {
            id: w.guid,
            host: w.host,
            path: w.path,
            port: w.port,
            domain_id: w.relationships.domain.data.guid,
            destinations: w.destinations.into_iter().map(|d| d.app.data.guid).collect(),
        }
    }
}

impl From<ProcessWire> for ProcessResource {
    fn from(w: ProcessWire) -> Self {
        ProcessResource {
            id: w.guid,
            app_id: w.relationships.app.data.guid,
            process_type: w.process_type,
            instances: w.instances,
        }
    }
}

impl CloudControllerClient {
    pub fn new(config: &ApiConfig, fetcher: Arc<RequestFetcher>) -> Result<Self, Error> {
        // No client-level timeout: the fetcher owns per-call deadlines.
        let http = HttpClient::builder()
            .build()
            .map_err(|e| Error::Api(ApiError::Network(e.to_string())))?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            fetcher,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> ApiResult<T> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let mut request = self.http.get(&url);
        if let Some(token) = &self.api_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request.send().await.map_err(ApiError::from)?;
        let status = response.status();
        match status {
            StatusCode::OK => response.json::<T>().await.map_err(|e| {
                ApiError::InvalidResponse(format!("failed to parse response: {e}"))
            }),
            StatusCode::NOT_FOUND => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "resource not found".to_string());
                Err(ApiError::NotFound(body))
            }
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "bad request".to_string());
                Err(ApiError::BadRequest(body))
            }
            status if status.is_server_error() => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("server error: {status}"));
                Err(ApiError::Upstream(body))
            }
            _ => Err(ApiError::InvalidResponse(format!(
                "unexpected status code: {status}"
            ))),
        }
    }

    /// Fetch all pages of `path` (which must already carry a `?`) and
    /// map the wire resources into their model type.
    async fn list<W, T>(
        &self,
        request_type: RequestType,
        key: &str,
        path: &str,
    ) -> ApiResult<ListResponse<T>>
    where
        W: DeserializeOwned + Into<T> + Send,
        T: Send,
    {
        self.fetcher
            .paginated_request(request_type, key, |page| async move {
                let page: Page<W> = self
                    .get_json(&format!(
                        "{path}&page={page}&per_page={RESULTS_PER_PAGE}"
                    ))
                    .await?;
                Ok(ListResponse::new(
                    page.pagination.total_pages,
                    page.resources.into_iter().map(Into::into).collect(),
                ))
            })
            .await
    }
}

#[async_trait]
impl CloudController for CloudControllerClient {
    async fn retrieve_org_id(&self, org_name: &str) -> ApiResult<ListResponse<OrgResource>> {
        self.list::<NamedWire, _>(
            RequestType::Org,
            org_name,
            &format!("/v3/organizations?names={org_name}"),
        )
        .await
    }

    async fn retrieve_all_org_ids(&self) -> ApiResult<ListResponse<OrgResource>> {
        self.list::<NamedWire, _>(RequestType::AllOrgs, "(all)", "/v3/organizations?")
            .await
    }

    async fn retrieve_space_id(
        &self,
        org_id: &str,
        space_name: &str,
    ) -> ApiResult<ListResponse<SpaceResource>> {
        self.list::<NamedWire, _>(
            RequestType::Space,
            &format!("{org_id}|{space_name}"),
            &format!("/v3/spaces?organization_guids={org_id}&names={space_name}"),
        )
        .await
    }

    async fn retrieve_space_ids_in_org(
        &self,
        org_id: &str,
    ) -> ApiResult<ListResponse<SpaceResource>> {
        self.list::<NamedWire, _>(
            RequestType::SpaceInOrg,
            org_id,
            &format!("/v3/spaces?organization_guids={org_id}"),
        )
        .await
    }

    async fn retrieve_all_application_ids_in_space(
        &self,
        org_id: &str,
        space_id: &str,
    ) -> ApiResult<ListResponse<AppResource>> {
        self.list::<AppWire, _>(
            RequestType::AppsInSpace,
            &format!("{org_id}|{space_id}"),
            &format!("/v3/apps?organization_guids={org_id}&space_guids={space_id}"),
        )
        .await
    }

    async fn retrieve_space_summary(&self, space_id: &str) -> ApiResult<SpaceSummary> {
        let space_id_owned = space_id.to_string();
        self.fetcher
            .single_request(RequestType::SpaceSummary, space_id, || async {
                let wire: SpaceSummaryWire = self
                    .get_json(&format!("/v2/spaces/{space_id_owned}/summary"))
                    .await?;
                Ok(SpaceSummary {
                    applications: wire
                        .apps
                        .into_iter()
                        .map(|a| SpaceSummaryApp {
                            id: a.guid,
                            name: a.name,
                            instances: a.instances,
                            urls: a.urls,
                        })
                        .collect(),
                })
            })
            .await
    }

    async fn retrieve_all_domains(&self, org_id: &str) -> ApiResult<ListResponse<DomainResource>> {
        self.list::<DomainWire, _>(
            RequestType::Domains,
            org_id,
            &format!("/v3/organizations/{org_id}/domains?"),
        )
        .await
    }

    async fn retrieve_route_mapping(
        &self,
        app_id: &str,
    ) -> ApiResult<ListResponse<RouteResource>> {
        self.list::<RouteWire, _>(
            RequestType::Routes,
            app_id,
            &format!("/v3/apps/{app_id}/routes?"),
        )
        .await
    }

    async fn retrieve_route(&self, route_id: &str) -> ApiResult<RouteResource> {
        let route_id_owned = route_id.to_string();
        self.fetcher
            .single_request(RequestType::Routes, route_id, || async {
                let wire: RouteWire = self
                    .get_json(&format!("/v3/routes/{route_id_owned}"))
                    .await?;
                Ok(wire.into())
            })
            .await
    }

    async fn retrieve_shared_domain(&self, domain_id: &str) -> ApiResult<DomainResource> {
        let domain_id_owned = domain_id.to_string();
        self.fetcher
            .single_request(RequestType::Domains, domain_id, || async {
                let wire: DomainWire = self
                    .get_json(&format!("/v3/domains/{domain_id_owned}"))
                    .await?;
                Ok(wire.into())
            })
            .await
    }

    async fn retrieve_processes(
        &self,
        org_id: &str,
        space_id: &str,
        app_id: &str,
    ) -> ApiResult<ListResponse<ProcessResource>> {
        self.list::<ProcessWire, _>(
            RequestType::Processes,
            &format!("{org_id}|{space_id}|{app_id}"),
            &format!("/v3/apps/{app_id}/processes?"),
        )
        .await
    }

    async fn retrieve_routes_for_app_ids(
        &self,
        app_ids: &[String],
    ) -> ApiResult<ListResponse<RouteResource>> {
        // Keyed by the guid set so disjoint bulk batches do not
        // serialize on one per-key lock.
        let guids = app_ids.join(",");
        self.list::<RouteWire, _>(
            RequestType::Routes,
            &guids,
            &format!("/v3/routes?app_guids={guids}"),
        )
        .await
    }

    async fn retrieve_web_processes_for_app_ids(
        &self,
        app_ids: &[String],
    ) -> ApiResult<ListResponse<ProcessResource>> {
        let guids = app_ids.join(",");
        self.list::<ProcessWire, _>(
            RequestType::Processes,
            &guids,
            &format!("/v3/processes?app_guids={guids}&types=web"),
        )
        .await
    }
}
