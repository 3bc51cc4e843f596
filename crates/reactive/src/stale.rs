//! Stale queue and drainer.
//!
//! Foreign-writer reactions mostly end up here as "this query is dirty, fix
//! it soon". A periodic drainer reruns queued subscriptions in bounded
//! batches, which caps the database load a notification storm can cause.

use crate::engine::EngineShared;
use futures::StreamExt;
use hashbrown::HashSet;
use livesql_core::QueryId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Default)]
struct Inner {
    queue: VecDeque<QueryId>,
    members: HashSet<QueryId>,
}

/// FIFO of staled query ids. A query id is queued at most once.
#[derive(Default)]
pub struct StaleQueue {
    inner: Mutex<Inner>,
}

impl StaleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `query_id`. Returns false if it was already queued.
    pub fn push(&self, query_id: QueryId) -> bool {
        let mut inner = self.inner.lock();
        if !inner.members.insert(query_id.clone()) {
            return false;
        }
        inner.queue.push_back(query_id);
        true
    }

    /// Dequeues up to `max` query ids, oldest first.
    pub fn take_batch(&self, max: usize) -> Vec<QueryId> {
        let mut inner = self.inner.lock();
        let n = max.min(inner.queue.len());
        let batch: Vec<QueryId> = inner.queue.drain(..n).collect();
        for id in &batch {
            inner.members.remove(id);
        }
        batch
    }

    /// Drops `query_id` from the queue. Returns true if it was queued.
    pub fn remove(&self, query_id: &QueryId) -> bool {
        let mut inner = self.inner.lock();
        if !inner.members.remove(query_id) {
            return false;
        }
        inner.queue.retain(|id| id != query_id);
        true
    }

    pub fn contains(&self, query_id: &QueryId) -> bool {
        self.inner.lock().members.contains(query_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }
}

/// Resets the re-entrancy flag when a drain cycle ends, however it ends.
struct DrainGuard<'a>(&'a EngineShared);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.draining.store(false, Ordering::Release);
    }
}

/// Runs one drain cycle and returns the number of subscriptions rerun.
///
/// Returns 0 without doing anything if another cycle is in progress.
pub(crate) async fn drain_once(shared: &Arc<EngineShared>) -> usize {
    if shared.draining.swap(true, Ordering::AcqRel) {
        return 0;
    }
    let _guard = DrainGuard(shared);

    let batch = shared.stale.take_batch(shared.config.drain_batch_size);
    if batch.is_empty() {
        return 0;
    }
    debug!(batch = batch.len(), "draining stale queue");

    let rerun = batch.len();
    futures::stream::iter(batch)
        .for_each_concurrent(shared.config.max_concurrent_reruns, |query_id| async move {
            let Ok(_permit) = shared.rerun_permits.clone().acquire_owned().await else {
                return;
            };
            // destroyed since it was queued
            let Some(subscription) = shared.subscription(&query_id) else {
                return;
            };
            if let Err(e) = subscription.rerun().await {
                warn!(query_id = %query_id, error = %e, "stale rerun failed");
            }
        })
        .await;
    rerun
}

/// Drains the stale queue every `drain_interval` until cancelled.
pub(crate) async fn run_drainer(shared: Arc<EngineShared>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(shared.config.drain_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                drain_once(&shared).await;
            }
        }
    }
    debug!("stale queue drainer stopped");
}
