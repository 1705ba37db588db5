//! Live, self-healing listing feeds.
//!
//! A subscription first asks the store for the refined query (server-side
//! filter and order). When the store reports a missing index it re-issues the
//! plain scope query and keeps filtering and ordering locally with the same
//! predicates and comparator, so consumers see the same ordered collection in
//! either mode.

mod manager;
pub mod memory;
mod source;

pub use manager::{
    ListingSubscription, SubscriptionError, SubscriptionManager, SubscriptionOptions,
    SubscriptionState, SubscriptionView,
};
pub use memory::MemoryCollectionSource;
pub use source::{
    Change, ChangeBatch, ChangeKind, ChangeStream, CollectionSource, Membership, QueryDescriptor,
    SourceError,
};
