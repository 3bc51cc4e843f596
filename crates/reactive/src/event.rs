//! Events a subscription delivers to its listeners.

use crate::loader::LoadingKind;
use crate::state::SubscriptionState;
use livesql_core::{Document, RowId};
use serde::Serialize;

/// Loading metadata published with every `info` event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingInfo {
    #[serde(rename = "type")]
    pub kind: LoadingKind,
    /// Page size of incremental and paging loaders, explicit limit otherwise.
    pub limit: Option<u64>,
    pub current_limit: Option<u64>,
    pub current_offset: Option<u64>,
    pub total_row_count: Option<u64>,
    pub current_page: Option<u64>,
    pub total_page_count: Option<u64>,
    pub ready: bool,
    pub state: SubscriptionState,
}

/// An event emitted by a subscription.
#[derive(Clone, Debug, PartialEq)]
pub enum SubscriptionEvent {
    /// A row entered the result.
    Added { id: RowId, row: Document },
    /// A row in the result changed.
    Changed { id: RowId, row: Document },
    /// A row left the result.
    Removed { id: RowId },
    Info(LoadingInfo),
    /// A run finished and every delta of it has been delivered.
    Ready,
    State(SubscriptionState),
}

impl SubscriptionEvent {
    /// Returns the event name: `added`, `changed`, `removed`, `info`, `ready`
    /// or `state`.
    pub fn name(&self) -> &'static str {
        match self {
            SubscriptionEvent::Added { .. } => "added",
            SubscriptionEvent::Changed { .. } => "changed",
            SubscriptionEvent::Removed { .. } => "removed",
            SubscriptionEvent::Info(_) => "info",
            SubscriptionEvent::Ready => "ready",
            SubscriptionEvent::State(_) => "state",
        }
    }

    /// Returns true for `added`, `changed` and `removed`.
    pub fn is_row_event(&self) -> bool {
        matches!(
            self,
            SubscriptionEvent::Added { .. }
                | SubscriptionEvent::Changed { .. }
                | SubscriptionEvent::Removed { .. }
        )
    }
}
