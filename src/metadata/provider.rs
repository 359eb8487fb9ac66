use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::error::MetadataError;
use crate::metadata::source::{MetadataFilter, MetadataSource};
use crate::metadata::{EntityDescriptor, IndexedTree, RoleDescriptor, RoleKind};
use crate::util::sha1_20;

/// Notified after a successful refresh, while the provider still holds its
/// lock. Observers only ever see a [`MetadataReadGuard`] — there is no way to
/// reach the write path from inside `on_refresh`, which is how the "observers
/// must not reenter the write lock" invariant from design note 9 is enforced
/// at the type level rather than by convention.
pub trait MetadataObserver: Send + Sync {
    fn on_refresh(&self, metadata: &MetadataReadGuard<'_>);
}

struct Inner {
    tree: RwLock<Arc<IndexedTree>>,
    last_seen: RwLock<Option<SystemTime>>,
    loaded_once: RwLock<bool>,
}

/// Refresh-aware, observer-notifying store of federation metadata (C2).
pub struct MetadataProvider {
    inner: Inner,
    source: Box<dyn MetadataSource>,
    filters: Vec<Box<dyn MetadataFilter>>,
    observers: RwLock<Vec<Arc<dyn MetadataObserver>>>,
}

impl MetadataProvider {
    pub fn new(source: Box<dyn MetadataSource>, filters: Vec<Box<dyn MetadataFilter>>) -> Self {
        Self {
            inner: Inner {
                tree: RwLock::new(Arc::new(IndexedTree::default())),
                last_seen: RwLock::new(None),
                loaded_once: RwLock::new(false),
            },
            source,
            filters,
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn MetadataObserver>) {
        self.observers.write().unwrap().push(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn MetadataObserver>) {
        self.observers
            .write()
            .unwrap()
            .retain(|o| !Arc::ptr_eq(o, observer));
    }

    /// Shared-lock accessor: refreshes if the source reports it has gone
    /// stale, then hands back a read-only view.
    pub fn lock_shared(&self) -> MetadataReadGuard<'_> {
        self.refresh_if_stale();
        let tree = self.inner.tree.read().unwrap().clone();
        MetadataReadGuard { tree, provider: self }
    }

    pub fn lookup(&self, entity_id: &str) -> Option<EntityDescriptor> {
        self.lock_shared().lookup(entity_id)
    }

    pub fn lookup_by_artifact(&self, source_id: &[u8; 20]) -> Option<EntityDescriptor> {
        self.lock_shared().lookup_by_artifact(source_id)
    }

    pub fn get_role(&self, entity_id: &str, role: &RoleKind, protocol_uri: &str) -> Option<RoleDescriptor> {
        self.lock_shared().get_role(entity_id, role, protocol_uri)
    }

    /// Forces a reload regardless of the source's reported modification time.
    pub fn force_refresh(&self) -> Result<(), MetadataError> {
        self.reload()
    }

    /// Polls `source.last_modified()`; if it has advanced since the last load
    /// (or nothing has been loaded yet), attempts a reload. On reload failure
    /// the previously installed tree is kept, the failure is logged, and the
    /// stored timestamp still advances — this mirrors the original
    /// filesystem provider's behavior of not retrying on every single access
    /// once a source is known to be broken.
    fn refresh_if_stale(&self) {
        let current_mtime = self.source.last_modified();
        let loaded_once = *self.inner.loaded_once.read().unwrap();

        let stale = if !loaded_once {
            true
        } else {
            match current_mtime {
                None => false,
                Some(mtime) => {
                    let last_seen = *self.inner.last_seen.read().unwrap();
                    last_seen.map(|seen| mtime > seen).unwrap_or(true)
                }
            }
        };

        if !stale {
            return;
        }

        if let Err(e) = self.reload() {
            tracing::error!(error = %e, "metadata refresh failed; keeping previously loaded tree");
        }

        *self.inner.last_seen.write().unwrap() = current_mtime;
        *self.inner.loaded_once.write().unwrap() = true;
    }

    fn reload(&self) -> Result<(), MetadataError> {
        let mut node = self.source.load()?;
        for filter in &self.filters {
            filter.filter(&mut node).map_err(|e| {
                tracing::warn!(filter = filter.name(), error = %e, "metadata filter rejected reload");
                e
            })?;
        }
        let indexed = Arc::new(IndexedTree::build(&node, sha1_20));
        *self.inner.tree.write().unwrap() = indexed;

        let guard = MetadataReadGuard {
            tree: self.inner.tree.read().unwrap().clone(),
            provider: self,
        };
        for observer in self.observers.read().unwrap().iter() {
            observer.on_refresh(&guard);
        }
        Ok(())
    }
}

/// A consistent, point-in-time, read-only view over an indexed metadata tree.
pub struct MetadataReadGuard<'a> {
    tree: Arc<IndexedTree>,
    #[allow(dead_code)]
    provider: &'a MetadataProvider,
}

impl MetadataReadGuard<'_> {
    pub fn lookup(&self, entity_id: &str) -> Option<EntityDescriptor> {
        self.tree.by_entity_id.get(entity_id).cloned()
    }

    pub fn lookup_by_artifact(&self, source_id: &[u8; 20]) -> Option<EntityDescriptor> {
        let entity_id = self.tree.by_source_id.get(source_id)?;
        self.tree.by_entity_id.get(entity_id).cloned()
    }

    pub fn get_role(&self, entity_id: &str, role: &RoleKind, protocol_uri: &str) -> Option<RoleDescriptor> {
        self.lookup(entity_id)?.role(role, protocol_uri).cloned()
    }

    pub fn entity_count(&self) -> usize {
        self.tree.by_entity_id.len()
    }
}
