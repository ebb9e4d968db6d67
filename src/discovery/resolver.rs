//! Expansion of configured target patterns into concrete triples
//!
//! Resolution runs three chained stages (organization, space,
//! application). A literal name resolves through a single cached
//! lookup; a regex (or nothing) at a level lists all entities and
//! filters. Failures are isolated per target: a target that cannot be
//! resolved contributes nothing and is logged, without aborting its
//! siblings.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, warn};
use regex::Regex;

use super::ResolvedTarget;
use crate::client::{AppResource, CloudController, OrgResource, SpaceResource};
use crate::config::{compile_name_regex, Target};
use crate::error::ApiResult;

/// Opt-in annotation: applications without it are excluded when a
/// target enables annotation refinement.
pub const ANNOTATION_SCRAPE: &str = "prometheus.io/scrape";
/// Overrides the scrape path of an annotated application.
pub const ANNOTATION_PATH: &str = "prometheus.io/path";

pub struct TargetResolver {
    client: Arc<dyn CloudController>,
}

impl TargetResolver {
    pub fn new(client: Arc<dyn CloudController>) -> Self {
        Self { client }
    }

    /// Expand every configured target and deduplicate the union.
    pub async fn resolve_targets(&self, targets: &[Target]) -> Vec<ResolvedTarget> {
        let resolutions = join_all(targets.iter().map(|t| self.resolve_single(t))).await;

        let mut seen: HashSet<ResolvedTarget> = HashSet::new();
        let mut resolved = Vec::new();
        for (target, resolution) in targets.iter().zip(resolutions) {
            match resolution {
                Ok(expansion) => {
                    for entry in expansion {
                        if seen.insert(entry.clone()) {
                            resolved.push(entry);
                        }
                    }
                }
                Err(err) => {
                    warn!("failed to resolve target {target:?}: {err}; skipping it this cycle");
                }
            }
        }

        debug!(
            "resolved {} targets into {} concrete entries",
            targets.len(),
            resolved.len()
        );
        resolved
    }

    async fn resolve_single(&self, target: &Target) -> ApiResult<Vec<ResolvedTarget>> {
        let mut resolved = Vec::new();

        for org in self.resolve_orgs(target).await? {
            for space in self.resolve_spaces(target, &org).await? {
                for app in self.resolve_applications(target, &org, &space).await? {
                    let mut entry =
                        ResolvedTarget::from_target(target, &org.name, &space.name, &app.name);
                    if target.kubernetes_annotations {
                        if let Some(path) = app.annotations.get(ANNOTATION_PATH) {
                            entry.path = path.clone();
                        }
                    }
                    resolved.push(entry);
                }
            }
        }

        Ok(resolved)
    }

    async fn resolve_orgs(&self, target: &Target) -> ApiResult<Vec<OrgResource>> {
        if let Some(name) = &target.org_name {
            let response = self.client.retrieve_org_id(name).await?;
            if response.resources.is_empty() {
                debug!("organization '{name}' not found; target yields no results");
            }
            return Ok(response.resources);
        }

        let all = self.client.retrieve_all_org_ids().await?.resources;
        Ok(filter_by_name(all, target.org_regex.as_deref(), |o| &o.name))
    }

    async fn resolve_spaces(
        &self,
        target: &Target,
        org: &OrgResource,
    ) -> ApiResult<Vec<SpaceResource>> {
        if let Some(name) = &target.space_name {
            let response = self.client.retrieve_space_id(&org.id, name).await?;
            if response.resources.is_empty() {
                debug!(
                    "space '{name}' not found in organization '{}'; target yields no results",
                    org.name
                );
            }
            return Ok(response.resources);
        }

        let all = self
            .client
            .retrieve_space_ids_in_org(&org.id)
            .await?
            .resources;
        Ok(filter_by_name(all, target.space_regex.as_deref(), |s| {
            &s.name
        }))
    }

    async fn resolve_applications(
        &self,
        target: &Target,
        org: &OrgResource,
        space: &SpaceResource,
    ) -> ApiResult<Vec<AppResource>> {
        let all = self
            .client
            .retrieve_all_application_ids_in_space(&org.id, &space.id)
            .await?
            .resources;

        let mut apps: Vec<AppResource> = if let Some(name) = &target.application_name {
            all.into_iter()
                .filter(|a| a.name.eq_ignore_ascii_case(name))
                .collect()
        } else {
            filter_by_name(all, target.application_regex.as_deref(), |a| &a.name)
        };

        apps.retain(|a| {
            if a.is_scrapable() {
                true
            } else {
                debug!("skipping application '{}': state is '{}'", a.name, a.state);
                false
            }
        });

        if target.kubernetes_annotations {
            apps.retain(|a| {
                let opted_in = a
                    .annotations
                    .get(ANNOTATION_SCRAPE)
                    .is_some_and(|v| v == "true");
                if !opted_in {
                    debug!(
                        "skipping application '{}': no {ANNOTATION_SCRAPE} annotation",
                        a.name
                    );
                }
                opted_in
            });
        }

        Ok(apps)
    }
}

/// Keep entries whose name fully matches the pattern
/// (case-insensitive); with no pattern, keep all. An invalid pattern
/// matches nothing and is logged.
fn filter_by_name<T>(entries: Vec<T>, pattern: Option<&str>, name: impl Fn(&T) -> &str) -> Vec<T> {
    let Some(pattern) = pattern else {
        return entries;
    };

    let regex: Option<Regex> = match compile_name_regex(&format!("^(?:{pattern})$")) {
        Ok(regex) => Some(regex),
        Err(err) => {
            warn!("{err}; the pattern matches nothing");
            None
        }
    };

    match regex {
        Some(regex) => entries
            .into_iter()
            .filter(|e| regex.is_match(name(e)))
            .collect(),
        None => Vec::new(),
    }
}
