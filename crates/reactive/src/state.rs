//! Subscription lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a subscription.
///
/// ```text
/// created -> running -> ready <-> re-running <-> staled
///                 any -> stopped -> destroyed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriptionState {
    Created,
    Running,
    Ready,
    ReRunning,
    Staled,
    Stopped,
    Destroyed,
}

impl SubscriptionState {
    /// Returns the wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::Created => "created",
            SubscriptionState::Running => "running",
            SubscriptionState::Ready => "ready",
            SubscriptionState::ReRunning => "re-running",
            SubscriptionState::Staled => "staled",
            SubscriptionState::Stopped => "stopped",
            SubscriptionState::Destroyed => "destroyed",
        }
    }

    /// Returns true while a diff is executing.
    #[inline]
    pub fn is_running(&self) -> bool {
        matches!(self, SubscriptionState::Running | SubscriptionState::ReRunning)
    }

    /// Returns true once the subscription no longer reacts.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionState::Stopped | SubscriptionState::Destroyed)
    }

    /// Returns true if `next` is a legal successor of `self`.
    ///
    /// `running -> created` and `re-running -> ready|staled` also serve to
    /// restore the previous state after a failed run.
    pub fn can_transition_to(&self, next: SubscriptionState) -> bool {
        use SubscriptionState::*;
        match (self, next) {
            (Destroyed, _) => false,
            (_, Destroyed) => true,
            (Stopped, _) => false,
            (_, Stopped) => true,
            (Created, Running) => true,
            (Running, Ready | Staled | Created) => true,
            (Ready, ReRunning | Staled) => true,
            (ReRunning, Ready | Staled) => true,
            (Staled, ReRunning | Staled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
