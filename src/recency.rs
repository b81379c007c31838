//! Environments recently used by tools, keyed by resource.
//!
//! Bounded by age and by count. Pruning happens on every access; there is no
//! background timer.

use crate::config::RecencyLimits;
use crate::environment::{EnvironmentRef, Resource};
use parking_lot::Mutex;
use std::future::Future;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct RecencyEntry {
    resource: Option<Resource>,
    environment: EnvironmentRef,
    recorded_at: Instant,
}

#[derive(Debug, Default)]
pub struct RecencyCache {
    limits: RecencyLimits,
    entries: Mutex<Vec<RecencyEntry>>,
}

impl RecencyCache {
    pub fn new(limits: RecencyLimits) -> Self {
        Self {
            limits,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Record that a tool used `environment` for `resource`
    pub fn record(&self, resource: Option<&Resource>, environment: EnvironmentRef) {
        let mut entries = self.entries.lock();
        entries.retain(|e| e.resource.as_ref() != resource);
        debug!(
            "[RECENCY] {} -> {}",
            resource.map(Resource::as_str).unwrap_or("<none>"),
            environment.id
        );
        entries.push(RecencyEntry {
            resource: resource.cloned(),
            environment,
            recorded_at: Instant::now(),
        });
        Self::prune(&mut entries, &self.limits);
    }

    /// Environment last used for `resource`.
    ///
    /// Without a direct hit, `fallback` supplies the externally active
    /// environment, which is returned only when some tool already used it.
    /// The cache never produces an environment no tool has recorded.
    pub async fn lookup<F, Fut>(&self, resource: Option<&Resource>, fallback: F) -> Option<EnvironmentRef>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<EnvironmentRef>>,
    {
        {
            let mut entries = self.entries.lock();
            Self::prune(&mut entries, &self.limits);
            if let Some(hit) = entries.iter().find(|e| e.resource.as_ref() == resource) {
                return Some(hit.environment.clone());
            }
        }

        let active = fallback().await?;
        let mut entries = self.entries.lock();
        Self::prune(&mut entries, &self.limits);
        entries
            .iter()
            .any(|e| e.environment.id == active.id)
            .then_some(active)
    }

    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        Self::prune(&mut entries, &self.limits);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune(entries: &mut Vec<RecencyEntry>, limits: &RecencyLimits) {
        let now = Instant::now();
        entries.retain(|e| now.duration_since(e.recorded_at) <= limits.max_age);

        if entries.len() > limits.max_entries {
            let evicted = entries.len() - limits.max_entries;
            entries.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
            entries.truncate(limits.max_entries);
            entries.reverse();
            debug!("[RECENCY] Evicted {} entries over capacity", evicted);
        }
    }
}
