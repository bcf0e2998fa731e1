//! Harness registry -- the live handles of this process, keyed by harness id.
//!
//! At most one handle exists per identifier. The map is guarded by a single
//! `RwLock` that is never held across an `.await`, so inserting one harness
//! and removing another from concurrent tasks cannot interfere. Handles are
//! fully constructed before [`HarnessRegistry::set`] publishes them.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::trait_def::HarnessHandle;

/// Live [`HarnessHandle`] handles, keyed by harness identifier.
///
/// # Example
///
/// ```ignore
/// let registry = HarnessRegistry::new();
/// registry.set("h1", handle);
/// let handle = registry.get("h1").unwrap();
/// ```
#[derive(Default)]
pub struct HarnessRegistry {
    harnesses: RwLock<HashMap<String, Arc<dyn HarnessHandle>>>,
}

impl HarnessRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a handle under `id`.
    ///
    /// A stale handle already stored under the same id is replaced and
    /// returned.
    pub fn set(&self, id: impl Into<String>, harness: Arc<dyn HarnessHandle>) -> Option<Arc<dyn HarnessHandle>> {
        self.harnesses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), harness)
    }

    /// Look up the handle for `id`.
    pub fn get(&self, id: &str) -> Option<Arc<dyn HarnessHandle>> {
        self.harnesses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Remove and return the handle for `id`.
    pub fn remove(&self, id: &str) -> Option<Arc<dyn HarnessHandle>> {
        self.harnesses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Identifiers of all registered harnesses, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .harnesses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Return the number of registered harnesses.
    pub fn len(&self) -> usize {
        self.harnesses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Return `true` if no harnesses are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every handle without tearing anything down.
    pub fn clear(&self) {
        self.harnesses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for HarnessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessRegistry")
            .field("harnesses", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    /// Minimal test harness.
    struct FakeHarness {
        harness_id: String,
    }

    impl FakeHarness {
        fn new(id: &str) -> Arc<dyn HarnessHandle> {
            Arc::new(Self {
                harness_id: id.to_string(),
            })
        }
    }

    #[async_trait]
    impl HarnessHandle for FakeHarness {
        fn id(&self) -> &str {
            &self.harness_id
        }

        async fn setup(&self) -> Result<()> {
            Ok(())
        }

        async fn teardown(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn registry_starts_empty() {
        let registry = HarnessRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.ids().is_empty());
    }

    #[test]
    fn set_and_get() {
        let registry = HarnessRegistry::new();
        assert!(registry.set("alpha", FakeHarness::new("alpha")).is_none());

        let harness = registry.get("alpha").expect("registered");
        assert_eq!(harness.id(), "alpha");
    }

    #[test]
    fn set_replaces_stale_handle() {
        let registry = HarnessRegistry::new();
        let first = FakeHarness::new("alpha");
        registry.set("alpha", first.clone());

        let old = registry.set("alpha", FakeHarness::new("alpha"));
        assert!(Arc::ptr_eq(&old.unwrap(), &first));
        assert_eq!(registry.len(), 1);
        assert!(!Arc::ptr_eq(&registry.get("alpha").unwrap(), &first));
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = HarnessRegistry::new();
        registry.set("alpha", FakeHarness::new("alpha"));
        assert!(registry.remove("alpha").is_some());
        assert!(registry.remove("alpha").is_none());
        assert!(registry.get("alpha").is_none());
    }

    #[test]
    fn ids_are_sorted() {
        let registry = HarnessRegistry::new();
        registry.set("gamma", FakeHarness::new("gamma"));
        registry.set("alpha", FakeHarness::new("alpha"));
        registry.set("beta", FakeHarness::new("beta"));
        assert_eq!(registry.ids(), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn clear_resets() {
        let registry = HarnessRegistry::new();
        registry.set("alpha", FakeHarness::new("alpha"));
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_inserts_and_removes() {
        let registry = Arc::new(HarnessRegistry::new());
        registry.set("keep", FakeHarness::new("keep"));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let id = format!("h{i}");
                    registry.set(id.clone(), FakeHarness::new(&id));
                    if i % 2 == 0 {
                        registry.remove(&id);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(registry.ids(), vec!["h1", "h3", "h5", "h7", "keep"]);
    }

    #[test]
    fn registry_debug_shows_ids() {
        let registry = HarnessRegistry::new();
        registry.set("test-harness", FakeHarness::new("test-harness"));
        let debug = format!("{registry:?}");
        assert!(debug.contains("test-harness"));
    }
}
