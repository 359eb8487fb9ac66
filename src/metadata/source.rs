//! Seam between the metadata provider and wherever a metadata tree actually
//! comes from. The distilled spec says the provider "is (re)built from a
//! source (file, inline DOM, or URL)" but leaves the interface implicit; this
//! names it explicitly so the provider core never has to parse XML, matching
//! design note 9's instruction to keep the object model out of the protocol layer.

use std::time::SystemTime;

use crate::error::MetadataError;
use crate::metadata::MetadataNode;

/// Produces a `MetadataNode` tree on demand, and reports when its backing
/// source last changed so the provider can decide whether to reload.
pub trait MetadataSource: Send + Sync {
    fn load(&self) -> Result<MetadataNode, MetadataError>;

    /// `None` means "always reload" (e.g. a URL source with no cache headers
    /// modeled); `Some(t)` lets the provider skip reloading when unchanged.
    fn last_modified(&self) -> Option<SystemTime> {
        None
    }
}

/// A fixed, already-built tree — useful for tests and for hosts that build
/// metadata programmatically rather than parsing it from a file.
pub struct InMemoryMetadataSource {
    tree: MetadataNode,
}

impl InMemoryMetadataSource {
    pub fn new(tree: MetadataNode) -> Self {
        Self { tree }
    }
}

impl MetadataSource for InMemoryMetadataSource {
    fn load(&self) -> Result<MetadataNode, MetadataError> {
        Ok(self.tree.clone())
    }
}

/// Runs after a fresh load, before the tree is installed. Filter failure aborts
/// the reload and keeps the previously installed tree.
pub trait MetadataFilter: Send + Sync {
    fn name(&self) -> &str;
    fn filter(&self, tree: &mut MetadataNode) -> Result<(), MetadataError>;
}

/// Drops any entity whose `valid_until` has already passed.
pub struct ExpiredEntityFilter {
    pub now: fn() -> chrono::DateTime<chrono::Utc>,
}

impl Default for ExpiredEntityFilter {
    fn default() -> Self {
        Self { now: chrono::Utc::now }
    }
}

impl MetadataFilter for ExpiredEntityFilter {
    fn name(&self) -> &str {
        "ExpiredEntityFilter"
    }

    fn filter(&self, tree: &mut MetadataNode) -> Result<(), MetadataError> {
        let now = (self.now)();
        prune_expired(tree, now);
        Ok(())
    }
}

fn prune_expired(node: &mut MetadataNode, now: chrono::DateTime<chrono::Utc>) {
    match node {
        MetadataNode::Entity(_) => {}
        MetadataNode::Group(group) => {
            group
                .children
                .retain(|child| !matches!(child, MetadataNode::Entity(e) if e.valid_until.is_some_and(|v| v < now)));
            for child in &mut group.children {
                prune_expired(child, now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EntityDescriptor, EntitiesDescriptor};

    #[test]
    fn expired_entity_filter_drops_stale_entities() {
        let fresh = EntityDescriptor::new("https://fresh.example");
        let mut stale = EntityDescriptor::new("https://stale.example");
        stale.valid_until = Some(chrono::Utc::now() - chrono::Duration::days(1));

        let mut tree = MetadataNode::Group(EntitiesDescriptor {
            name: None,
            children: vec![MetadataNode::Entity(fresh), MetadataNode::Entity(stale)],
        });

        let filter = ExpiredEntityFilter::default();
        filter.filter(&mut tree).unwrap();

        let ids: Vec<_> = tree.entities().into_iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["https://fresh.example"]);
    }
}
