//! The engine ties the collaborators together.
//!
//! `Engine::start` spawns two background tasks: the listener loop, which
//! decodes notifications from the change channel and hands each one to the
//! router, and the stale-queue drainer. Both stop on `shutdown` or when the
//! engine is dropped.

use crate::config::EngineConfig;
use crate::gate::WriteGate;
use crate::registry::DependencyRegistry;
use crate::router;
use crate::stale::{self, StaleQueue};
use crate::subscription::Subscription;
use crate::table::{Table, View};
use crate::transaction::Transaction;
use hashbrown::{HashMap, HashSet};
use livesql_core::{
    ChangeChannel, ConnectionProvider, IsolationLevel, QueryId, Result, TableName, WriterId,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause after a failed read from the change channel.
const CHANNEL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// State shared by the engine, its handles and its background tasks.
pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) provider: Arc<dyn ConnectionProvider>,
    pub(crate) registry: DependencyRegistry,
    pub(crate) stale: StaleQueue,
    pub(crate) gate: WriteGate,
    pub(crate) rerun_permits: Arc<Semaphore>,
    pub(crate) draining: AtomicBool,
    pub(crate) cancel: CancellationToken,
    subscriptions: RwLock<HashMap<QueryId, Subscription>>,
    prepared: Mutex<HashSet<TableName>>,
}

impl EngineShared {
    /// Looks up a live subscription.
    pub(crate) fn subscription(&self, query_id: &QueryId) -> Option<Subscription> {
        self.subscriptions.read().get(query_id).cloned()
    }

    /// Makes a subscription visible to the router.
    pub(crate) fn attach(&self, subscription: &Subscription) {
        self.subscriptions
            .write()
            .insert(subscription.id().clone(), subscription.clone());
        self.registry.register(
            subscription.id(),
            subscription.writer_id(),
            subscription.dependencies(),
        );
    }

    /// Forgets a subscription everywhere.
    pub(crate) fn detach(&self, query_id: &QueryId, dependencies: &[TableName]) {
        self.registry.unregister(query_id, dependencies);
        self.stale.remove(query_id);
        self.subscriptions.write().remove(query_id);
    }

    /// Parses a relation name against the default schema.
    pub(crate) fn table_name(&self, name: &str) -> Result<TableName> {
        TableName::parse(name, &self.config.default_schema)
    }

    /// Installs change notification on `table` once per engine.
    pub(crate) async fn prepare(&self, table: &TableName) -> Result<()> {
        if self.prepared.lock().contains(table) {
            return Ok(());
        }
        self.provider.prepare_relation(table).await?;
        if self.prepared.lock().insert(table.clone()) {
            debug!(table = %table, "change notification installed");
        }
        Ok(())
    }
}

/// A running live-query engine.
pub struct Engine {
    shared: Arc<EngineShared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Starts an engine on `provider`, consuming notifications from
    /// `channel`. Must be called within a tokio runtime.
    pub fn start<C>(
        config: EngineConfig,
        provider: Arc<dyn ConnectionProvider>,
        channel: C,
    ) -> Result<Self>
    where
        C: ChangeChannel,
    {
        config.validate()?;
        let cancel = CancellationToken::new();
        let shared = Arc::new(EngineShared {
            rerun_permits: Arc::new(Semaphore::new(config.max_concurrent_reruns)),
            config,
            provider,
            registry: DependencyRegistry::new(),
            stale: StaleQueue::new(),
            gate: WriteGate::new(),
            draining: AtomicBool::new(false),
            cancel: cancel.clone(),
            subscriptions: RwLock::new(HashMap::new()),
            prepared: Mutex::new(HashSet::new()),
        });

        let listener = tokio::spawn(run_listener(shared.clone(), channel, cancel.clone()));
        let drainer = tokio::spawn(stale::run_drainer(shared.clone(), cancel));
        info!(
            schema = %shared.config.default_schema,
            drain_interval_ms = shared.config.drain_interval_ms,
            "live query engine started"
        );
        Ok(Self {
            shared,
            tasks: Mutex::new(vec![listener, drainer]),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Opens a table, installing change notification on it if needed.
    pub async fn table(&self, name: &str) -> Result<Table> {
        let name = self.shared.table_name(name)?;
        let dependencies = self.shared.provider.resolve_dependencies(&name).await?;
        for table in &dependencies {
            self.shared.prepare(table).await?;
        }
        Ok(Table::new(self.shared.clone(), name, dependencies))
    }

    /// Opens a view. Its subscriptions depend on every base table the view
    /// reads, transitively.
    pub async fn view(&self, name: &str) -> Result<View> {
        let name = self.shared.table_name(name)?;
        let dependencies = self.shared.provider.resolve_dependencies(&name).await?;
        for table in &dependencies {
            self.shared.prepare(table).await?;
        }
        debug!(view = %name, dependencies = dependencies.len(), "view resolved");
        Ok(View::new(self.shared.clone(), name, dependencies))
    }

    /// Starts an explicit transaction on a dedicated connection.
    pub async fn begin_transaction(
        &self,
        writer_id: Option<WriterId>,
        isolation: Option<IsolationLevel>,
    ) -> Result<Transaction> {
        Transaction::begin(self.shared.clone(), writer_id, isolation).await
    }

    pub fn subscription(&self, query_id: &QueryId) -> Option<Subscription> {
        self.shared.subscription(query_id)
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.read().len()
    }

    pub fn registry(&self) -> &DependencyRegistry {
        &self.shared.registry
    }

    pub fn stale_queue(&self) -> &StaleQueue {
        &self.shared.stale
    }

    /// Number of writes waiting for their notification.
    pub fn pending_writes(&self) -> usize {
        self.shared.gate.pending()
    }

    /// Runs one drain cycle now and returns how many subscriptions it reran.
    pub async fn drain_now(&self) -> usize {
        stale::drain_once(&self.shared).await
    }

    /// Stops the background tasks and waits for them to exit.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "engine task ended abnormally");
            }
        }
        info!("live query engine stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

async fn run_listener<C>(shared: Arc<EngineShared>, mut channel: C, cancel: CancellationToken)
where
    C: ChangeChannel,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = channel.next_event() => next,
        };
        match next {
            Ok(Some(payload)) => match payload.into_event(&shared.config.default_schema) {
                Ok(event) => {
                    tokio::spawn(router::dispatch(shared.clone(), event));
                }
                Err(e) => warn!(error = %e, "dropping undecodable notification"),
            },
            Ok(None) => {
                info!("change channel closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "change channel read failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(CHANNEL_RETRY_DELAY) => {}
                }
            }
        }
    }
    debug!("change listener stopped");
}
