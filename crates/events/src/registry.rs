//! Process-wide map of progress stores keyed by job id.
//!
//! A dashboard process normally watches one job at a time, but keeping the
//! stores keyed lets a view switch jobs and come back without losing what
//! it already displayed.

use std::collections::HashMap;
use std::sync::Arc;

use stagewatch_core::merge::MergePolicy;
use stagewatch_core::types::JobId;
use tokio::sync::RwLock;

use crate::store::ProgressStore;

/// Keyed collection of [`ProgressStore`]s.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application.
pub struct StoreRegistry {
    stores: RwLock<HashMap<JobId, Arc<ProgressStore>>>,
    policy: MergePolicy,
}

impl StoreRegistry {
    /// Create an empty registry whose stores use the default merge policy.
    pub fn new() -> Self {
        Self::with_policy(MergePolicy::default())
    }

    /// Create an empty registry whose stores use `policy`.
    pub fn with_policy(policy: MergePolicy) -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// Return the store for `job_id`, creating a default one if absent.
    pub async fn get_or_create(&self, job_id: &str) -> Arc<ProgressStore> {
        if let Some(store) = self.stores.read().await.get(job_id) {
            return Arc::clone(store);
        }
        let mut stores = self.stores.write().await;
        let store = stores
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(ProgressStore::with_policy(self.policy)));
        Arc::clone(store)
    }

    /// Look up an existing store without creating one.
    pub async fn get(&self, job_id: &str) -> Option<Arc<ProgressStore>> {
        self.stores.read().await.get(job_id).cloned()
    }

    /// Forget the store for `job_id`. Readers holding the `Arc` keep it.
    pub async fn remove(&self, job_id: &str) -> Option<Arc<ProgressStore>> {
        self.stores.write().await.remove(job_id)
    }

    /// Number of jobs currently tracked.
    pub async fn len(&self) -> usize {
        self.stores.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.stores.read().await.is_empty()
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}
