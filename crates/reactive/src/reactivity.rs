//! Reactivity modes.
//!
//! A subscription's mode decides what a change notification for one of its
//! tables does to it, depending on whether the subscription's own writer
//! caused the change.

use livesql_core::ChangeEvent;
use std::fmt;
use std::sync::Arc;

/// What the router does with a subscription for one notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Rerun now.
    RerunNow,
    /// Mark the subscription staled; the application decides when to rerun.
    MarkStaled,
    /// Mark it staled and queue it for the drainer.
    Enqueue,
    /// Ignore the notification.
    Nothing,
    /// Ask the mode's callback.
    InvokeCustom,
}

/// Input of a custom reaction.
#[derive(Clone, Debug)]
pub struct ReactionContext<'a> {
    pub own_write: bool,
    pub event: &'a ChangeEvent,
}

/// Callback deciding the reaction of a `Custom` mode. It must return one of
/// `RerunNow`, `MarkStaled`, `Enqueue` or `Nothing`; `InvokeCustom` is read
/// as `Nothing`.
pub type CustomReaction = Arc<dyn Fn(&ReactionContext<'_>) -> Action + Send + Sync>;

/// How a subscription reacts to change notifications.
#[derive(Clone, Default)]
pub enum ReactivityMode {
    /// Never react after the first run.
    None,
    /// Rerun on own writes; foreign writes only mark the subscription staled.
    Own,
    /// Mark staled on every write; the application reruns explicitly.
    Manually,
    /// Rerun on every write.
    #[default]
    Always,
    /// Let a callback decide.
    Custom(CustomReaction),
}

impl ReactivityMode {
    /// Builds a custom mode from a closure.
    pub fn custom<F>(decide: F) -> Self
    where
        F: Fn(&ReactionContext<'_>) -> Action + Send + Sync + 'static,
    {
        ReactivityMode::Custom(Arc::new(decide))
    }

    /// The action for a notification, before any custom callback runs.
    pub fn decide(&self, own_write: bool) -> Action {
        match self {
            ReactivityMode::None => Action::Nothing,
            ReactivityMode::Own if own_write => Action::RerunNow,
            ReactivityMode::Own => Action::MarkStaled,
            ReactivityMode::Manually => Action::MarkStaled,
            ReactivityMode::Always => Action::RerunNow,
            ReactivityMode::Custom(_) => Action::InvokeCustom,
        }
    }

    /// The final action for a notification, running the custom callback if
    /// there is one.
    pub fn resolve(&self, own_write: bool, event: &ChangeEvent) -> Action {
        match (self.decide(own_write), self) {
            (Action::InvokeCustom, ReactivityMode::Custom(decide)) => {
                match decide(&ReactionContext { own_write, event }) {
                    Action::InvokeCustom => Action::Nothing,
                    action => action,
                }
            }
            (action, _) => action,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReactivityMode::None => "none",
            ReactivityMode::Own => "own",
            ReactivityMode::Manually => "manually",
            ReactivityMode::Always => "always",
            ReactivityMode::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for ReactivityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livesql_core::{ChangeAction, TableName};

    fn event() -> ChangeEvent {
        ChangeEvent::new(TableName::new("public", "people"), ChangeAction::Insert)
    }

    #[test]
    fn test_decide_table() {
        assert_eq!(ReactivityMode::None.decide(true), Action::Nothing);
        assert_eq!(ReactivityMode::Own.decide(true), Action::RerunNow);
        assert_eq!(ReactivityMode::Own.decide(false), Action::MarkStaled);
        assert_eq!(ReactivityMode::Manually.decide(true), Action::MarkStaled);
        assert_eq!(ReactivityMode::Always.decide(false), Action::RerunNow);
        assert_eq!(
            ReactivityMode::custom(|_| Action::Nothing).decide(false),
            Action::InvokeCustom
        );
    }

    #[test]
    fn test_default_is_always() {
        assert_eq!(ReactivityMode::default().name(), "always");
    }

    #[test]
    fn test_custom_sees_ownership() {
        let mode = ReactivityMode::custom(|ctx| {
            if ctx.own_write {
                Action::RerunNow
            } else {
                Action::Enqueue
            }
        });
        assert_eq!(mode.resolve(true, &event()), Action::RerunNow);
        assert_eq!(mode.resolve(false, &event()), Action::Enqueue);
    }

    #[test]
    fn test_custom_cannot_recurse() {
        let mode = ReactivityMode::custom(|_| Action::InvokeCustom);
        assert_eq!(mode.resolve(true, &event()), Action::Nothing);
    }
}
