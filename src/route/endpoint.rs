use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque versioning pair carried by control-plane updates, used to resolve
/// out-of-order delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationTag {
    pub guid: String,
    pub index: u64,
}

impl ModificationTag {
    pub fn new() -> Self {
        Self {
            guid: Uuid::new_v4().to_string(),
            index: 0,
        }
    }

    /// Whether `other` supersedes this tag. An empty guid on either side
    /// always yields true (untagged updates win); a different guid starts a
    /// new sequence; within a sequence the index must strictly increase.
    pub fn succeeded_by(&self, other: &ModificationTag) -> bool {
        if self.guid.is_empty() || other.guid.is_empty() {
            return true;
        }
        self.guid != other.guid || self.index < other.index
    }
}

/// One backend instance reachable at a canonical address.
///
/// Endpoints are immutable once built; the owning pool tracks their
/// freshness and failure state. Equality for pool membership is by
/// canonical address only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    address: String,
    application_id: String,
    instance_id: String,
    instance_index: String,
    tags: HashMap<String, String>,
    stale_threshold: Duration,
    modification_tag: ModificationTag,
}

impl Endpoint {
    pub fn new(
        application_id: impl Into<String>,
        host: &str,
        port: u16,
        instance_id: impl Into<String>,
        instance_index: impl Into<String>,
        tags: HashMap<String, String>,
        stale_threshold: Duration,
        modification_tag: ModificationTag,
    ) -> Self {
        // IPv6 literals need brackets to form a valid authority.
        let address = if host.contains(':') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        Self {
            address,
            application_id: application_id.into(),
            instance_id: instance_id.into(),
            instance_index: instance_index.into(),
            tags,
            stale_threshold,
            modification_tag,
        }
    }

    /// `host:port`, the pool membership key.
    pub fn canonical_addr(&self) -> &str {
        &self.address
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn instance_index(&self) -> &str {
        &self.instance_index
    }

    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }

    /// Per-endpoint staleness override; zero means the registry-wide
    /// threshold applies.
    pub fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }

    pub fn modification_tag(&self) -> &ModificationTag {
        &self.modification_tag
    }
}
