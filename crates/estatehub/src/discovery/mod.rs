//! Listing discovery: filter, sort and page a live listing collection.

pub mod domain;
pub mod filter;
pub mod predicate;
pub mod query;
pub mod router;
pub mod sort;
pub mod subscription;

pub use domain::{Listing, ListingId, ListingKind, ListingStatus};
pub use filter::{FilterSession, FilterSpec, RawFilterInput, TriState};
pub use predicate::{Predicate, PredicateSet};
pub use query::{
    matching_listings, run_query, DiscoverySession, PageWindow, QueryContext, QueryRequest,
    QueryResult, DEFAULT_PAGE_SIZE,
};
pub use router::listing_router;
pub use sort::{SortDirection, SortKey, SortSpec};
pub use subscription::{
    CollectionSource, ListingSubscription, MemoryCollectionSource, QueryDescriptor, SourceError,
    SubscriptionError, SubscriptionManager, SubscriptionOptions, SubscriptionState,
    SubscriptionView,
};
