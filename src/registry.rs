use ahash::AHashSet;
use parking_lot::RwLock;
use std::sync::Arc;

/// Names of namespaces known to have a reflection on the apply cluster.
///
/// The namespace reconciler is the only writer; the predicate layer and the
/// other reconcilers read it to scope their work. The set lives for the
/// process lifetime and is rebuilt by re-sync, never persisted.
#[derive(Clone, Debug, Default)]
pub struct NamespaceRegistry(Arc<RwLock<AHashSet<String>>>);

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false for names never stored.
    pub fn load(&self, name: &str) -> bool {
        self.0.read().contains(name)
    }

    pub fn store(&self, name: &str) {
        self.0.write().insert(name.to_string());
    }

    pub fn delete(&self, name: &str) {
        self.0.write().remove(name);
    }
}
