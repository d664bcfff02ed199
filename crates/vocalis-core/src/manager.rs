//! Per-family model manager
//!
//! Maps model ids to [`SelfDisposingModel`] handles. The map lock only guards
//! lookup/insert/remove; loading happens inside the handle, so a slow load
//! of one model never blocks requests for another.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::LifecycleError;
use crate::lifecycle::{LoadFn, ModelLease, ModelState, SelfDisposingModel, UnloadedCallback};
use crate::ttl::Ttl;

/// Family-specific model construction
pub trait ModelLoader: Send + Sync + 'static {
    /// Loaded model instance
    type Model: Send + Sync + 'static;

    /// Load the model identified by `model_id`. Blocking; may be slow.
    fn load(&self, model_id: &str) -> anyhow::Result<Self::Model>;
}

/// Snapshot of one managed handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedModelInfo {
    pub model_id: String,
    pub state: ModelState,
    pub use_count: usize,
}

struct Entry<T> {
    seq: u64,
    handle: SelfDisposingModel<T>,
}

struct Models<T> {
    next_seq: u64,
    entries: HashMap<String, Entry<T>>,
}

impl<T> Models<T> {
    fn ordered(&self) -> Vec<&Entry<T>> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }
}

/// Owns the handles of one model family
pub struct ModelManager<L: ModelLoader> {
    loader: Arc<L>,
    ttl: Ttl,
    models: Arc<Mutex<Models<L::Model>>>,
}

impl<L: ModelLoader> ModelManager<L> {
    /// Create a manager whose handles evict idle models after `ttl`
    pub fn new(loader: L, ttl: Ttl) -> Self {
        Self {
            loader: Arc::new(loader),
            ttl,
            models: Arc::new(Mutex::new(Models {
                next_seq: 0,
                entries: HashMap::new(),
            })),
        }
    }

    pub fn ttl(&self) -> Ttl {
        self.ttl
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Get the handle for `model_id`, creating it if absent. Does not load.
    pub fn load_model(&self, model_id: &str) -> SelfDisposingModel<L::Model> {
        let mut models = self.models.lock();
        if let Some(entry) = models.entries.get(model_id) {
            debug!("{} model already registered", model_id);
            return entry.handle.clone();
        }

        let loader = Arc::clone(&self.loader);
        let id = model_id.to_string();
        let load_fn: LoadFn<L::Model> = Arc::new(move || loader.load(&id));
        let handle = SelfDisposingModel::new(
            model_id,
            load_fn,
            self.ttl,
            Some(unloaded_callback(Arc::downgrade(&self.models))),
        );

        let seq = models.next_seq;
        models.next_seq += 1;
        models.entries.insert(
            model_id.to_string(),
            Entry {
                seq,
                handle: handle.clone(),
            },
        );
        handle
    }

    /// Lease `model_id`, loading it if needed
    pub async fn acquire(&self, model_id: &str) -> Result<ModelLease<L::Model>, LifecycleError> {
        loop {
            let handle = self.load_model(model_id);
            match handle.acquire().await {
                // Evicted between lookup and acquire; the map no longer holds it
                Err(LifecycleError::Retired(_)) => continue,
                other => return other,
            }
        }
    }

    /// Unload `model_id` now. Fails with `NotFound` if unmanaged, `Busy` if in use.
    pub fn unload_model(&self, model_id: &str) -> Result<(), LifecycleError> {
        let handle = self
            .models
            .lock()
            .entries
            .get(model_id)
            .map(|e| e.handle.clone())
            .ok_or_else(|| LifecycleError::NotFound(model_id.to_string()))?;
        handle.explicit_unload()
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.models.lock().entries.contains_key(model_id)
    }

    pub fn len(&self) -> usize {
        self.models.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Managed handles in the order they were first requested
    pub fn loaded_models(&self) -> Vec<LoadedModelInfo> {
        let handles: Vec<_> = self
            .models
            .lock()
            .ordered()
            .into_iter()
            .map(|e| e.handle.clone())
            .collect();
        handles
            .into_iter()
            .map(|h| LoadedModelInfo {
                model_id: h.model_id().to_string(),
                state: h.state(),
                use_count: h.use_count(),
            })
            .collect()
    }

    /// Unload every idle model. Returns the ids that were still busy.
    pub fn shutdown(&self) -> Vec<String> {
        let handles: Vec<_> = self
            .models
            .lock()
            .ordered()
            .into_iter()
            .map(|e| e.handle.clone())
            .collect();

        let mut busy = Vec::new();
        for handle in handles {
            if let Err(LifecycleError::Busy(id)) = handle.explicit_unload() {
                busy.push(id);
            }
        }
        info!("Model manager shut down, {} model(s) still busy", busy.len());
        busy
    }
}

/// Removes an evicted handle from the map. Holds the map weakly so pending
/// idle timers never keep a dropped manager alive.
fn unloaded_callback<T: Send + Sync + 'static>(models: Weak<Mutex<Models<T>>>) -> UnloadedCallback {
    Arc::new(move |model_id: &str| {
        let Some(models) = models.upgrade() else {
            return;
        };
        let mut models = models.lock();
        let evicted = models
            .entries
            .get(model_id)
            .is_some_and(|e| e.handle.retire_if_unloaded());
        if evicted {
            models.entries.remove(model_id);
            debug!("Removed {} from model manager", model_id);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct EchoModel {
        id: String,
    }

    #[derive(Default)]
    struct EchoLoader {
        loads: AtomicUsize,
    }

    impl ModelLoader for EchoLoader {
        type Model = EchoModel;

        fn load(&self, model_id: &str) -> anyhow::Result<EchoModel> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if model_id.starts_with("missing/") {
                anyhow::bail!("no weights for {model_id}");
            }
            Ok(EchoModel {
                id: model_id.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_load_model_returns_same_handle() {
        let manager = ModelManager::new(EchoLoader::default(), Ttl::Never);
        let a = manager.load_model("org/a");
        let b = manager.load_model("org/a");
        a.acquire().await.unwrap().release();
        assert!(b.is_loaded());
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.loader().loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unload_unknown_model() {
        let manager = ModelManager::new(EchoLoader::default(), Ttl::Never);
        assert_eq!(
            manager.unload_model("org/nope"),
            Err(LifecycleError::NotFound("org/nope".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unload_busy_then_removed() {
        let manager = ModelManager::new(EchoLoader::default(), Ttl::Never);
        let lease = manager.acquire("org/a").await.unwrap();
        assert_eq!(lease.id, "org/a");
        assert!(matches!(manager.unload_model("org/a"), Err(LifecycleError::Busy(_))));

        drop(lease);
        manager.unload_model("org/a").unwrap();
        assert!(!manager.contains("org/a"));
    }

    #[tokio::test]
    async fn test_immediate_ttl_removes_entry_on_release() {
        let manager = ModelManager::new(EchoLoader::default(), Ttl::Immediate);
        manager.acquire("org/a").await.unwrap().release();
        assert!(manager.is_empty());

        manager.acquire("org/a").await.unwrap().release();
        assert_eq!(manager.loader().loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_eviction_removes_entry() {
        let manager = ModelManager::new(EchoLoader::default(), Ttl::After(Duration::from_secs(1)));

        manager.acquire("m").await.unwrap().release();
        tokio::time::sleep(Duration::from_millis(500)).await;
        manager.acquire("m").await.unwrap().release();
        assert_eq!(manager.loader().loads.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!manager.contains("m"));
        assert!(manager.loaded_models().is_empty());
    }

    #[tokio::test]
    async fn test_failed_load_removes_entry_and_retries() {
        let manager = ModelManager::new(EchoLoader::default(), Ttl::Never);
        let err = manager.acquire("missing/model").await.unwrap_err();
        assert!(matches!(err, LifecycleError::LoadFailed { .. }));
        assert!(!manager.contains("missing/model"));
        assert!(manager.loaded_models().is_empty());

        assert!(manager.acquire("missing/model").await.is_err());
        assert_eq!(manager.loader().loads.load(Ordering::SeqCst), 2);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_failed_loads_do_not_accumulate() {
        let manager = ModelManager::new(EchoLoader::default(), Ttl::After(Duration::from_secs(1)));
        manager.acquire("org/good").await.unwrap().release();
        for i in 0..100 {
            assert!(manager.acquire(&format!("missing/{i}")).await.is_err());
        }
        assert_eq!(manager.len(), 1);
        assert!(manager.contains("org/good"));
    }

    #[tokio::test]
    async fn test_stale_handle_after_failed_load() {
        let manager = ModelManager::new(EchoLoader::default(), Ttl::Never);
        let stale = manager.load_model("missing/model");
        assert!(stale.acquire().await.is_err());
        assert!(matches!(stale.acquire().await, Err(LifecycleError::Retired(_))));
        // a fresh lookup gets a new handle
        assert!(matches!(
            manager.acquire("missing/model").await,
            Err(LifecycleError::LoadFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_loaded_models_in_request_order() {
        let manager = ModelManager::new(EchoLoader::default(), Ttl::Never);
        let _b = manager.acquire("org/b").await.unwrap();
        manager.acquire("org/a").await.unwrap().release();

        let listed = manager.loaded_models();
        let ids: Vec<_> = listed.iter().map(|m| m.model_id.as_str()).collect();
        assert_eq!(ids, vec!["org/b", "org/a"]);
        assert_eq!(listed[0].use_count, 1);
        assert_eq!(listed[1].state, ModelState::Loaded);
    }

    #[tokio::test]
    async fn test_shutdown_reports_busy_models() {
        let manager = ModelManager::new(EchoLoader::default(), Ttl::Never);
        let _held = manager.acquire("org/held").await.unwrap();
        manager.acquire("org/idle").await.unwrap().release();

        assert_eq!(manager.shutdown(), vec!["org/held".to_string()]);
        assert!(!manager.contains("org/idle"));
        assert!(manager.contains("org/held"));
    }
}
