use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::domain::SiteId;

/// Per-site topic suffixes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TopicKind {
    Static,
    Telemetry,
    Faults,
    Maintenance,
    Weather,
}

impl TopicKind {
    /// Static site metadata is retained so late subscribers receive it.
    pub fn retained(&self) -> bool {
        matches!(self, TopicKind::Static)
    }
}

/// Builds and parses `{namespace}/{site_id}/{kind}` topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    namespace: String,
}

impl Topics {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn topic(&self, site: &SiteId, kind: TopicKind) -> String {
        format!("{}/{}/{}", self.namespace, site, kind)
    }

    /// Wildcard matching every topic of `kind` across the fleet.
    pub fn subscription(&self, kind: TopicKind) -> String {
        format!("{}/+/{}", self.namespace, kind)
    }

    pub fn parse(&self, topic: &str) -> Option<(SiteId, TopicKind)> {
        let rest = topic.strip_prefix(&self.namespace)?.strip_prefix('/')?;
        let (site, kind) = rest.split_once('/')?;
        if site.is_empty() {
            return None;
        }
        Some((SiteId::from(site), kind.parse().ok()?))
    }
}
