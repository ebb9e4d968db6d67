//! Resolved-target and instance value types

use std::hash::{Hash, Hasher};

use crate::config::Target;

/// A concrete organization/space/application triple produced by
/// expanding a [`Target`] pattern.
///
/// Equality and hashing are structural over org, space, application,
/// path and protocol: two different source targets that expand to the
/// same endpoint collapse into one.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub org_name: String,
    pub space_name: String,
    pub application_name: String,
    pub path: String,
    pub protocol: String,

    /// The pattern this resolution came from; carries the
    /// preferred-route and internal-port settings the scanner needs.
    pub original_target: Target,
}

impl ResolvedTarget {
    pub fn from_target(
        target: &Target,
        org_name: &str,
        space_name: &str,
        application_name: &str,
    ) -> Self {
        Self {
            org_name: org_name.to_string(),
            space_name: space_name.to_string(),
            application_name: application_name.to_string(),
            path: target.path().to_string(),
            protocol: target.protocol().to_string(),
            original_target: target.clone(),
        }
    }
}

impl PartialEq for ResolvedTarget {
    fn eq(&self, other: &Self) -> bool {
        self.org_name == other.org_name
            && self.space_name == other.space_name
            && self.application_name == other.application_name
            && self.path == other.path
            && self.protocol == other.protocol
    }
}

impl Eq for ResolvedTarget {}

impl Hash for ResolvedTarget {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.org_name.hash(state);
        self.space_name.hash(state);
        self.application_name.hash(state);
        self.path.hash(state);
        self.protocol.hash(state);
    }
}

/// One running replica of a resolved target.
///
/// Immutable once constructed; a new scan cycle produces fresh
/// instances. Identity is [`instance_id`](Self::instance_id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub target: ResolvedTarget,
    /// `<application id>:<instance index>`
    pub instance_id: String,
    pub access_url: String,
    /// Reached via the platform-internal domain rather than a public
    /// route.
    pub internal: bool,
}

impl Instance {
    pub fn new(
        target: ResolvedTarget,
        application_id: &str,
        instance_index: u32,
        access_url: String,
        internal: bool,
    ) -> Self {
        Self {
            target,
            instance_id: format!("{application_id}:{instance_index}"),
            access_url,
            internal,
        }
    }

    /// The instance index encoded in the id.
    pub fn instance_index(&self) -> Option<u32> {
        self.instance_id.rsplit(':').next()?.parse().ok()
    }

    /// The application id encoded in the id.
    pub fn application_id(&self) -> &str {
        self.instance_id
            .rsplit_once(':')
            .map(|(app, _)| app)
            .unwrap_or(&self.instance_id)
    }
}
