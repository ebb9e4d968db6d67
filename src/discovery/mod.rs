//! Target resolution and instance discovery
//!
//! [`DiscoveryService`] ties the pipeline together: configured
//! [`Target`](crate::config::Target) patterns are expanded by the
//! [`TargetResolver`] and the resulting triples are scanned into
//! concrete [`Instance`]s by the [`InstanceScanner`].

pub mod resolver;
pub mod scanner;
pub mod target;

pub use resolver::TargetResolver;
pub use scanner::{ApplicationIdFilter, InstanceFilter, InstanceScanner};
pub use target::{Instance, ResolvedTarget};

use std::sync::Arc;

use log::info;

use crate::client::{
    CloudController, RequestAggregator, RoutesForAppsLookup, WebProcessesLookup,
};
use crate::config::Config;

pub struct DiscoveryService {
    resolver: TargetResolver,
    scanner: InstanceScanner,
    targets: Vec<crate::config::Target>,
}

impl DiscoveryService {
    /// Wire up resolver, scanner and the two aggregators on top of the
    /// given (typically cached) accessor.
    pub fn new(client: Arc<dyn CloudController>, config: &Config) -> Self {
        let routes = Arc::new(RequestAggregator::new(
            Arc::new(RoutesForAppsLookup::new(Arc::clone(&client))),
            config.aggregator.check_interval(),
            config.aggregator.max_block_size,
        ));
        let web_processes = Arc::new(RequestAggregator::new(
            Arc::new(WebProcessesLookup::new(Arc::clone(&client))),
            config.aggregator.check_interval(),
            config.aggregator.max_block_size,
        ));

        Self {
            resolver: TargetResolver::new(Arc::clone(&client)),
            scanner: InstanceScanner::new(
                client,
                routes,
                web_processes,
                config.default_internal_route_port,
            ),
            targets: config.targets.clone(),
        }
    }

    /// Expand the configured targets, used by the discovery endpoint.
    pub async fn resolve_targets(&self) -> Vec<ResolvedTarget> {
        self.resolver.resolve_targets(&self.targets).await
    }

    /// Run one full discovery cycle.
    pub async fn discover(
        &self,
        application_id_filter: Option<ApplicationIdFilter<'_>>,
        instance_filter: Option<InstanceFilter<'_>>,
    ) -> Vec<Instance> {
        let resolved = self.resolver.resolve_targets(&self.targets).await;
        let instances = self
            .scanner
            .determine_instances_from_targets(&resolved, application_id_filter, instance_filter)
            .await;

        info!(
            "discovery cycle: {} targets -> {} resolved -> {} instances",
            self.targets.len(),
            resolved.len(),
            instances.len()
        );
        instances
    }
}
