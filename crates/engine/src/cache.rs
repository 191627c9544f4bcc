//! Per-tenant compiled graph cache with single-flight builds.
//!
//! Each tenant id maps to a shared `OnceCell`. Concurrent callers for an
//! uncached tenant all wait on the same cell, so exactly one build runs. A
//! failed build leaves the cell empty and the next caller tries again; once
//! no caller is waiting on it, the empty cell is dropped from the map.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cb_domain::error::Result;
use cb_domain::trace::TraceEvent;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

type Slot<G> = Arc<OnceCell<Arc<G>>>;

pub struct GraphCache<G> {
    slots: Mutex<HashMap<String, Slot<G>>>,
    builds: AtomicU64,
}

impl<G> Default for GraphCache<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G> GraphCache<G> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            builds: AtomicU64::new(0),
        }
    }

    /// Cached graph for `tenant_id`, building it with `build` if absent.
    ///
    /// Never returns a partially built graph: the cell is only populated
    /// once `build` resolves to `Ok`.
    pub async fn get_or_build<F, Fut>(&self, tenant_id: &str, build: F) -> Result<Arc<G>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<G>>,
    {
        let slot = self
            .slots
            .lock()
            .entry(tenant_id.to_owned())
            .or_default()
            .clone();

        let result = slot
            .get_or_try_init(move || async move {
                self.builds.fetch_add(1, Ordering::Relaxed);
                build().await.map(Arc::new)
            })
            .await
            .map(Arc::clone);

        if result.is_err() {
            self.discard_empty(tenant_id, &slot);
        }
        result
    }

    /// Forget a slot whose build failed, unless another caller is still
    /// waiting on it or it was already replaced. Clones of a slot are only
    /// taken under the map lock, so the count cannot grow while we hold it.
    fn discard_empty(&self, tenant_id: &str, slot: &Slot<G>) {
        let mut slots = self.slots.lock();
        let unused = slots.get(tenant_id).is_some_and(|current| {
            Arc::ptr_eq(current, slot) && !current.initialized() && Arc::strong_count(current) == 2
        });
        if unused {
            slots.remove(tenant_id);
        }
    }

    /// Cached graph without building.
    pub fn get(&self, tenant_id: &str) -> Option<Arc<G>> {
        self.slots
            .lock()
            .get(tenant_id)
            .and_then(|slot| slot.get().cloned())
    }

    /// Drop a tenant's graph (its config changed). A build already in
    /// flight completes for its waiters; later callers build afresh.
    pub fn invalidate(&self, tenant_id: &str) -> bool {
        let removed = self.slots.lock().remove(tenant_id).is_some();
        if removed {
            TraceEvent::GraphEvicted {
                tenant_id: tenant_id.to_owned(),
                reason: "invalidated".into(),
            }
            .emit();
        }
        removed
    }

    pub fn clear(&self) {
        let evicted = {
            let mut slots = self.slots.lock();
            let n = slots.len();
            slots.clear();
            n
        };
        tracing::info!(evicted, "graph cache cleared");
    }

    /// Number of tenants with a ready graph.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build attempts started so far (successful or not).
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }
}
