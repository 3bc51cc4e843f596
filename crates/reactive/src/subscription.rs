//! Reactive subscriptions.
//!
//! A `Subscription` owns one query definition, one lifecycle state machine
//! and one loader. Every run executes the snapshot diff and delivers the
//! resulting `added`/`changed`/`removed` events to the listeners, followed
//! by `state`, `info` and `ready`.
//!
//! At most one run of a subscription executes at any time. The "running"
//! flag is a watch channel: claiming it is a compare-and-set, and anyone who
//! has to wait for an in-flight run (own-writer reactions, `destroy`)
//! awaits the flag turning false instead of polling.
//!
//! A run executes on its own task, which holds the flag until the delta is
//! delivered. Dropping the caller's future or giving up on it after
//! `rerun_timeout_ms` never interrupts a diff the store may already have
//! committed.

use crate::change_set::DiffAction;
use crate::diff::DiffExecutor;
use crate::engine::EngineShared;
use crate::event::{LoadingInfo, SubscriptionEvent};
use crate::listener::{emit, ListenerId, ListenerSet};
use crate::loader::{Loader, LoadingKind};
use crate::reactivity::ReactivityMode;
use crate::state::SubscriptionState;
use livesql_core::{Error, QueryDefinition, QueryId, Result, TableName, Value, WriterId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Options of a subscription besides its query.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionOptions {
    /// Writer owning the subscription; notifications carrying the same writer
    /// are own writes.
    pub writer_id: Option<WriterId>,
    pub reactivity: ReactivityMode,
    pub loading: LoadingKind,
    /// Page size of incremental and paging loaders. Defaults to the engine's
    /// `default_page_size`.
    pub page_size: Option<u64>,
    /// Column set to `true` on every added or changed row, so rows can be
    /// traced back to this subscription.
    pub salt: Option<String>,
}

struct Data {
    state: SubscriptionState,
    loader: Loader,
}

struct Inner {
    id: QueryId,
    writer_id: Option<WriterId>,
    relation: TableName,
    dependencies: Vec<TableName>,
    reactivity: ReactivityMode,
    salt: Option<String>,
    query: QueryDefinition,
    engine: Weak<EngineShared>,
    data: Mutex<Data>,
    running: watch::Sender<bool>,
    stopped: AtomicBool,
    listeners: Mutex<ListenerSet>,
}

/// A live query. Cloning yields another handle to the same subscription.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Inner>,
}

/// Holds the running flag; clears it on drop.
struct RunGuard {
    inner: Arc<Inner>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.running.send_replace(false);
    }
}

impl Subscription {
    /// Builds a subscription in the `created` state. Loading options that
    /// conflict with the query are rejected here, before any I/O.
    pub(crate) fn new(
        engine: &Arc<EngineShared>,
        relation: TableName,
        dependencies: Vec<TableName>,
        query: QueryDefinition,
        options: SubscriptionOptions,
    ) -> Result<Self> {
        query.validate()?;
        let page_size = options
            .page_size
            .unwrap_or(engine.config.default_page_size);
        let loader = Loader::new(options.loading, page_size, &query)?;
        let (running, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(Inner {
                id: QueryId::generate(),
                writer_id: options.writer_id,
                relation,
                dependencies,
                reactivity: options.reactivity,
                salt: options.salt,
                query,
                engine: Arc::downgrade(engine),
                data: Mutex::new(Data {
                    state: SubscriptionState::Created,
                    loader,
                }),
                running,
                stopped: AtomicBool::new(false),
                listeners: Mutex::new(ListenerSet::new()),
            }),
        })
    }

    #[inline]
    pub fn id(&self) -> &QueryId {
        &self.inner.id
    }

    #[inline]
    pub fn writer_id(&self) -> Option<&WriterId> {
        self.inner.writer_id.as_ref()
    }

    /// Relation the query reads.
    #[inline]
    pub fn relation(&self) -> &TableName {
        &self.inner.relation
    }

    /// Base tables whose changes affect this subscription.
    #[inline]
    pub fn dependencies(&self) -> &[TableName] {
        &self.inner.dependencies
    }

    #[inline]
    pub fn reactivity(&self) -> &ReactivityMode {
        &self.inner.reactivity
    }

    pub fn state(&self) -> SubscriptionState {
        self.inner.data.lock().state
    }

    pub fn loading_info(&self) -> LoadingInfo {
        let data = self.inner.data.lock();
        data.loader.info(data.state)
    }

    /// The query with the loader's current window applied.
    pub fn query(&self) -> QueryDefinition {
        self.inner.data.lock().loader.windowed(&self.inner.query)
    }

    /// Returns true while a run executes.
    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Adds a listener for every event of this subscription.
    pub fn on<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&SubscriptionEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.lock().add(callback)
    }

    /// Removes a listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.listeners.lock().remove(id)
    }

    /// Returns a receiver of every event emitted from now on. Dropping the
    /// receiver detaches it.
    pub fn events(&self) -> mpsc::UnboundedReceiver<SubscriptionEvent> {
        self.inner.listeners.lock().channel().1
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Runs the query for the first time, delivering every row as `added`.
    pub async fn run(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::invalid_state("subscription is stopped"));
        }
        let Some(guard) = self.try_claim() else {
            return Err(Error::invalid_state("subscription is already running"));
        };
        let loader = {
            let data = self.inner.data.lock();
            if data.state != SubscriptionState::Created {
                return Err(Error::invalid_state(format!(
                    "run() called in state {}",
                    data.state
                )));
            }
            data.loader.clone()
        };
        self.execute(guard, loader).await
    }

    /// Reruns the query and delivers the delta.
    ///
    /// If a run is already in flight this only marks the subscription staled
    /// and queues it; the drainer reruns it after the current run. Stopped
    /// and not yet started subscriptions ignore the call.
    pub async fn rerun(&self) -> Result<()> {
        if self.is_stopped() || self.state() == SubscriptionState::Created {
            return Ok(());
        }
        match self.try_claim() {
            Some(guard) => {
                let loader = self.inner.data.lock().loader.clone();
                self.execute(guard, loader).await
            }
            None => {
                self.enqueue_staled();
                Ok(())
            }
        }
    }

    /// Extends an incremental window by one page.
    ///
    /// Returns false without running when every row is already loaded.
    pub async fn load_next(&self) -> Result<bool> {
        self.move_window(|loader| loader.next_increment()).await
    }

    /// Moves a paging window to `page` (1-based).
    ///
    /// Returns false without running when the page does not exist.
    pub async fn goto_page(&self, page: u64) -> Result<bool> {
        self.move_window(|loader| loader.page(page)).await
    }

    async fn move_window<F>(&self, next: F) -> Result<bool>
    where
        F: FnOnce(&Loader) -> Result<Option<Loader>>,
    {
        if self.is_stopped() {
            return Err(Error::invalid_state("subscription is stopped"));
        }
        // a window change must not be coalesced away, so wait for the slot
        let guard = self.claim_when_idle().await;
        let candidate = {
            let data = self.inner.data.lock();
            if data.state == SubscriptionState::Created {
                return Err(Error::invalid_state("subscription has not run yet"));
            }
            if data.state.is_terminal() {
                return Err(Error::invalid_state("subscription is stopped"));
            }
            next(&data.loader)?
        };
        match candidate {
            Some(loader) => self.execute(guard, loader).await.map(|_| true),
            None => Ok(false),
        }
    }

    /// Disables reactivity. Snapshot rows and registrations stay until
    /// `destroy`.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.transition_and_announce(SubscriptionState::Stopped);
    }

    /// Stops the subscription, waits for an in-flight run to finish, then
    /// deletes its snapshot rows, unregisters it and drops its listeners.
    ///
    /// Local cleanup happens even if deleting the snapshot fails; the error
    /// is returned afterwards.
    pub async fn destroy(&self) -> Result<()> {
        if self.state() == SubscriptionState::Destroyed {
            return Ok(());
        }
        self.stop();
        let _guard = self.claim_when_idle().await;
        if self.state() == SubscriptionState::Destroyed {
            return Ok(());
        }

        let result = match self.inner.engine.upgrade() {
            Some(engine) => {
                let dropped = DiffExecutor::new(engine.provider.clone())
                    .drop_snapshot(&self.inner.id)
                    .await;
                engine.detach(&self.inner.id, &self.inner.dependencies);
                dropped.map(|_| ())
            }
            None => Err(Error::Shutdown),
        };

        self.transition_and_announce(SubscriptionState::Destroyed);
        self.inner.listeners.lock().clear();

        match &result {
            Ok(()) => info!(query_id = %self.inner.id, "subscription destroyed"),
            Err(e) => warn!(query_id = %self.inner.id, error = %e, "snapshot cleanup failed on destroy"),
        }
        result
    }

    /// Marks the subscription staled without queueing it.
    ///
    /// Returns false if it has not run yet or no longer reacts.
    pub(crate) fn mark_staled(&self) -> bool {
        let changed = {
            let mut data = self.inner.data.lock();
            match data.state {
                SubscriptionState::Created
                | SubscriptionState::Stopped
                | SubscriptionState::Destroyed => return false,
                SubscriptionState::Staled => None,
                _ => {
                    data.state = SubscriptionState::Staled;
                    Some(data.loader.info(SubscriptionState::Staled))
                }
            }
        };
        if let Some(info) = changed {
            self.emit_all(&[
                SubscriptionEvent::State(SubscriptionState::Staled),
                SubscriptionEvent::Info(info),
            ]);
        }
        true
    }

    /// Marks the subscription staled and queues it for the drainer.
    pub(crate) fn enqueue_staled(&self) {
        if !self.mark_staled() {
            return;
        }
        if let Some(engine) = self.inner.engine.upgrade() {
            if engine.stale.push(self.inner.id.clone()) {
                debug!(query_id = %self.inner.id, "queued staled subscription");
            }
        }
    }

    /// Waits for any in-flight run, then reruns. Own-writer reactions use
    /// this so the write they react to is always observed.
    pub(crate) async fn rerun_when_idle(&self) -> Result<()> {
        if self.is_stopped() {
            return Ok(());
        }
        let guard = self.claim_when_idle().await;
        let loader = {
            let data = self.inner.data.lock();
            if data.state == SubscriptionState::Created || data.state.is_terminal() {
                return Ok(());
            }
            data.loader.clone()
        };
        self.execute(guard, loader).await
    }

    fn try_claim(&self) -> Option<RunGuard> {
        let claimed = self.inner.running.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        });
        claimed.then(|| RunGuard {
            inner: self.inner.clone(),
        })
    }

    async fn claim_when_idle(&self) -> RunGuard {
        let mut idle = self.inner.running.subscribe();
        loop {
            if let Some(guard) = self.try_claim() {
                return guard;
            }
            // the sender lives in `inner`, so this cannot fail while `self` exists
            let _ = idle.wait_for(|running| !*running).await;
        }
    }

    /// Executes one run with `loader`'s window on a spawned task that owns
    /// `guard`, and waits for it up to the rerun timeout.
    ///
    /// A caller that times out gets `Error::Timeout` while the run goes on
    /// and still delivers its delta.
    async fn execute(&self, guard: RunGuard, loader: Loader) -> Result<()> {
        let limit = self
            .inner
            .engine
            .upgrade()
            .ok_or(Error::Shutdown)?
            .config
            .rerun_timeout();
        let subscription = self.clone();
        let task = tokio::spawn(async move { subscription.run_to_completion(guard, loader).await });
        let joined = match limit {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        query_id = %self.inner.id,
                        timeout_ms = limit.as_millis() as u64,
                        "run exceeded its timeout, finishing in the background"
                    );
                    return Err(Error::Timeout(limit));
                }
            },
            None => task.await,
        };
        joined.map_err(|e| {
            if e.is_cancelled() {
                Error::Shutdown
            } else {
                Error::invalid_state(format!("run task failed: {}", e))
            }
        })?
    }

    /// The body of a run. Releases the running flag when it returns.
    ///
    /// On failure the previous state is restored and the loader is left
    /// untouched, so the call may simply be retried.
    async fn run_to_completion(self, _guard: RunGuard, loader: Loader) -> Result<()> {
        let engine = self.inner.engine.upgrade().ok_or(Error::Shutdown)?;

        let (previous, current) = {
            let mut data = self.inner.data.lock();
            let previous = data.state;
            if previous.is_terminal() {
                return Ok(());
            }
            let current = if previous == SubscriptionState::Created {
                SubscriptionState::Running
            } else {
                SubscriptionState::ReRunning
            };
            if !previous.can_transition_to(current) {
                return Err(Error::invalid_state(format!(
                    "cannot run in state {}",
                    previous
                )));
            }
            data.state = current;
            (previous, current)
        };
        self.emit_all(&[
            SubscriptionEvent::State(current),
            SubscriptionEvent::Info(loader.info(current)),
        ]);

        let query = loader.windowed(&self.inner.query);
        let outcome = DiffExecutor::new(engine.provider.clone())
            .diff(&self.inner.id, &query, loader.counts_rows())
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                let (restored, info) = {
                    let mut data = self.inner.data.lock();
                    // marked staled or stopped meanwhile: keep that
                    if data.state == current {
                        data.state = previous;
                    }
                    (data.state, data.loader.info(data.state))
                };
                self.emit_all(&[
                    SubscriptionEvent::State(restored),
                    SubscriptionEvent::Info(info),
                ]);
                warn!(query_id = %self.inner.id, error = %e, "run failed");
                return Err(e);
            }
        };

        let mut loader = loader;
        if let Some(total) = outcome.total_row_count {
            loader.record_total(total);
        }

        let listeners = self.inner.listeners.lock().snapshot();
        for row in outcome.changes {
            let event = match (row.action, row.data) {
                (DiffAction::Removed, _) => {
                    SubscriptionEvent::Removed { id: row.row_id }
                }
                (action, data) => {
                    let mut data = data.unwrap_or_default();
                    if let Some(salt) = &self.inner.salt {
                        data.insert(salt.clone(), Value::Boolean(true));
                    }
                    if action == DiffAction::Added {
                        SubscriptionEvent::Added {
                            id: row.row_id,
                            row: data,
                        }
                    } else {
                        SubscriptionEvent::Changed {
                            id: row.row_id,
                            row: data,
                        }
                    }
                }
            };
            emit(&listeners, &event);
        }

        let (finished, info) = {
            let mut data = self.inner.data.lock();
            data.loader = loader;
            if data.state == current {
                data.state = SubscriptionState::Ready;
                // caught up; a notification during the run would have left it staled
                engine.stale.remove(&self.inner.id);
            }
            (data.state, data.loader.info(data.state))
        };
        self.emit_all(&[
            SubscriptionEvent::State(finished),
            SubscriptionEvent::Info(info),
            SubscriptionEvent::Ready,
        ]);
        debug!(query_id = %self.inner.id, state = %finished, "run finished");
        Ok(())
    }

    /// Moves to `next` if legal and announces it.
    fn transition_and_announce(&self, next: SubscriptionState) {
        let info = {
            let mut data = self.inner.data.lock();
            if !data.state.can_transition_to(next) {
                return;
            }
            data.state = next;
            data.loader.info(next)
        };
        self.emit_all(&[SubscriptionEvent::State(next), SubscriptionEvent::Info(info)]);
    }

    fn emit_all(&self, events: &[SubscriptionEvent]) {
        let listeners = self.inner.listeners.lock().snapshot();
        for event in events {
            emit(&listeners, event);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("relation", &self.inner.relation)
            .field("state", &self.state())
            .field("reactivity", &self.inner.reactivity)
            .finish()
    }
}
