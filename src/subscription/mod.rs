//! Reactive subscriptions.
//!
//! - `notifier`: turns keyspace mutations into [`ChangeEvent`]s
//! - `engine`: watched queries, re-evaluation and bounded push delivery

pub mod engine;
pub mod notifier;

pub use engine::{
    Push, QueryResult, SubscriberChannel, SubscriberHandle, SubscriberId, SubscriptionConfig,
    SubscriptionEngine, SubscriptionId, SubscriptionState, SubscriptionStats,
};
pub use notifier::{ChangeEvent, MutationNotifier};
