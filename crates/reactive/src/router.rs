//! Notification routing.
//!
//! For each change event the router looks up the dependent subscriptions,
//! runs the own-writer reactions to completion, releases the write gate for
//! the event's statement and only then deals with foreign subscriptions.

use crate::engine::EngineShared;
use crate::reactivity::Action;
use crate::registry::Registration;
use crate::subscription::Subscription;
use futures::StreamExt;
use livesql_core::ChangeEvent;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Whether a registration belongs to the writer that caused `event`.
fn is_own(registration: &Registration, event: &ChangeEvent) -> bool {
    matches!(
        (&registration.writer_id, &event.writer_id),
        (Some(subscriber), Some(writer)) if subscriber == writer
    )
}

/// Routes one change event.
pub(crate) async fn dispatch(shared: Arc<EngineShared>, event: ChangeEvent) {
    let registrations = shared.registry.lookup(&event.table);
    let (own, foreign): (Vec<_>, Vec<_>) = registrations
        .into_iter()
        .partition(|registration| is_own(registration, &event));

    debug!(
        table = %event.table,
        action = %event.action,
        own = own.len(),
        foreign = foreign.len(),
        "routing change event"
    );

    let own: Vec<Subscription> = own
        .iter()
        .filter_map(|registration| shared.subscription(&registration.query_id))
        .collect();
    futures::stream::iter(own)
        .for_each_concurrent(shared.config.own_reaction_concurrency, |subscription| {
            let event = &event;
            async move { react_own(&subscription, event).await }
        })
        .await;

    if let Some(statement_id) = &event.statement_id {
        if shared.gate.release(statement_id) {
            trace!(statement_id = %statement_id, "write gate released");
        }
    }

    for registration in foreign {
        // destroyed since the lookup
        let Some(subscription) = shared.subscription(&registration.query_id) else {
            continue;
        };
        react_foreign(&shared, subscription, &event);
    }
}

async fn react_own(subscription: &Subscription, event: &ChangeEvent) {
    match subscription.reactivity().resolve(true, event) {
        Action::RerunNow => {
            if let Err(e) = subscription.rerun_when_idle().await {
                warn!(query_id = %subscription.id(), error = %e, "own-write rerun failed");
            }
        }
        Action::MarkStaled => {
            subscription.mark_staled();
        }
        Action::Enqueue => subscription.enqueue_staled(),
        Action::Nothing | Action::InvokeCustom => {}
    }
}

fn react_foreign(shared: &Arc<EngineShared>, subscription: Subscription, event: &ChangeEvent) {
    match subscription.reactivity().resolve(false, event) {
        Action::RerunNow => {
            let permits = shared.rerun_permits.clone();
            tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                if let Err(e) = subscription.rerun().await {
                    warn!(query_id = %subscription.id(), error = %e, "rerun failed");
                }
            });
        }
        Action::MarkStaled => {
            subscription.mark_staled();
        }
        Action::Enqueue => subscription.enqueue_staled(),
        Action::Nothing | Action::InvokeCustom => {}
    }
}
