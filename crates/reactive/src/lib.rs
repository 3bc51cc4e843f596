//! livesql Reactive - Live query subscriptions over a relational store.
//!
//! A subscription runs its query once and afterwards receives
//! `added`/`changed`/`removed` events whenever rows it depends on change.
//! Each run is a single statement that diffs the current result against a
//! per-subscription snapshot kept in the database.
//!
//! # Core Concepts
//!
//! - `Engine`: owns the change listener, the stale-queue drainer and all
//!   live subscriptions
//! - `Table`/`View`: relation handles; queries start with `find`
//! - `Subscription`: lifecycle state machine plus loader (complete,
//!   incremental or paging)
//! - `DependencyRegistry`: routes a table change to dependent subscriptions
//! - `WriteGate`: lets a writer wait until its own subscriptions saw a write
//!
//! # Example
//!
//! ```rust,no_run
//! use livesql_core::{doc, Filter, OrderBy};
//! use livesql_memory::MemoryDatabase;
//! use livesql_reactive::{Engine, EngineConfig, LoadingKind, SubscriptionEvent, WriteOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> livesql_core::Result<()> {
//! let db = MemoryDatabase::new();
//! db.create_table("people", "_id")?;
//! let engine = Engine::start(EngineConfig::default(), Arc::new(db.clone()), db.listen())?;
//!
//! let people = engine.table("people").await?;
//! let subscription = people
//!     .find(Filter::starts_with("name", "A"))
//!     .order_by(OrderBy::asc("name"))
//!     .loading(LoadingKind::Incremental)
//!     .writer("client-1")
//!     .subscribe()?;
//! subscription.on(|event: &SubscriptionEvent| println!("{}", event.name()));
//! subscription.run().await?;
//!
//! people
//!     .insert_one(doc! { "_id" => "p1", "name" => "Anna" }, &WriteOptions::writer("client-1"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod change_set;
pub mod config;
pub mod diff;
mod engine;
pub mod event;
pub mod gate;
pub mod listener;
pub mod loader;
pub mod reactivity;
pub mod registry;
mod router;
pub mod stale;
pub mod state;
pub mod subscription;
pub mod table;
pub mod transaction;

pub use change_set::{ChangeSet, DiffAction, DiffRow};
pub use config::EngineConfig;
pub use diff::{DiffExecutor, DiffOutcome};
pub use engine::Engine;
pub use event::{LoadingInfo, SubscriptionEvent};
pub use gate::{WriteGate, WriteTicket};
pub use listener::{Listener, ListenerId, ListenerSet};
pub use loader::{Loader, LoadingKind};
pub use reactivity::{Action, CustomReaction, ReactionContext, ReactivityMode};
pub use registry::{DependencyRegistry, Registration};
pub use stale::StaleQueue;
pub use state::SubscriptionState;
pub use subscription::{Subscription, SubscriptionOptions};
pub use table::{Find, Table, View, WriteOptions, WriteOutcome};
pub use transaction::Transaction;
