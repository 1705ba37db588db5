//! Subscription manager behavior against the in-memory collection source:
//! degraded fallback, failure surfacing, retained data and shutdown.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use estatehub::discovery::subscription::ChangeStream;
use estatehub::discovery::{
    run_query, CollectionSource, Listing, ListingId, ListingKind, ListingStatus,
    MemoryCollectionSource, PageWindow, QueryContext, QueryDescriptor, QueryRequest, SortSpec,
    SourceError, SubscriptionError, SubscriptionManager, SubscriptionOptions, SubscriptionState,
};

fn listing(id: &str, kind: ListingKind, price: Option<f64>) -> Listing {
    Listing {
        id: ListingId(id.to_string()),
        kind,
        status: ListingStatus::Active,
        title: format!("Home {id}"),
        description: "Close to the market".to_string(),
        price,
        city: "Lagos".to_string(),
        bedrooms: 3,
        bathrooms: 2,
        furnished: true,
        parking: false,
        area: None,
        created_at: None,
        owner_id: "agent-1".to_string(),
    }
}

fn seed() -> Vec<Listing> {
    vec![
        listing("r1", ListingKind::Rent, Some(700.0)),
        listing("s1", ListingKind::Sale, Some(90_000.0)),
        listing("r2", ListingKind::Rent, None),
        listing("r3", ListingKind::Rent, Some(400.0)),
        listing("w1", ListingKind::Wanted, Some(500.0)),
        listing("r4", ListingKind::Rent, Some(400.0)),
    ]
}

fn rentals_by_price() -> QueryDescriptor {
    QueryDescriptor::new("listings")
        .with_kind(ListingKind::Rent)
        .ordered_by(SortSpec::cheapest_first())
}

fn ids(listings: &[Listing]) -> Vec<&str> {
    listings.iter().map(|listing| listing.id.as_str()).collect()
}

/// Never answers a subscribe call.
struct Hanging;

#[async_trait]
impl CollectionSource for Hanging {
    async fn subscribe(&self, _query: &QueryDescriptor) -> Result<ChangeStream, SourceError> {
        future::pending().await
    }
}

#[tokio::test]
async fn degraded_mode_matches_live_output() {
    let live_source = Arc::new(MemoryCollectionSource::new(seed()));
    let degraded_source = Arc::new(MemoryCollectionSource::new(seed()));
    degraded_source.set_missing_indexes(true);

    let live = SubscriptionManager::new(live_source, SubscriptionOptions::default())
        .open(rentals_by_price());
    let degraded = SubscriptionManager::new(degraded_source, SubscriptionOptions::default())
        .open(rentals_by_price());

    let live_view = live
        .wait_for(|view| view.state == SubscriptionState::Live)
        .await;
    let degraded_view = degraded
        .wait_for(|view| view.state == SubscriptionState::Degraded && !view.listings.is_empty())
        .await;

    assert_eq!(live_view.state, SubscriptionState::Live);
    assert_eq!(degraded_view.state, SubscriptionState::Degraded);
    assert!(degraded_view.last_error.is_none(), "fallback is transparent");
    assert_eq!(ids(&live_view.listings), vec!["r2", "r3", "r4", "r1"]);
    assert_eq!(live_view.listings, degraded_view.listings);

    let request = QueryRequest {
        context: QueryContext::RentalsOnly,
        sort: SortSpec::cheapest_first(),
        window: PageWindow::first_page(2),
        ..QueryRequest::default()
    };
    assert_eq!(
        run_query(&live_view.listings, &request),
        run_query(&degraded_view.listings, &request)
    );
}

#[tokio::test]
async fn tied_listing_leaving_and_rejoining_keeps_one_order_in_both_modes() {
    let live_source = Arc::new(MemoryCollectionSource::new(seed()));
    let degraded_source = Arc::new(MemoryCollectionSource::new(seed()));
    degraded_source.set_missing_indexes(true);

    let live = SubscriptionManager::new(Arc::clone(&live_source), SubscriptionOptions::default())
        .open(rentals_by_price());
    let degraded =
        SubscriptionManager::new(Arc::clone(&degraded_source), SubscriptionOptions::default())
            .open(rentals_by_price());
    live.wait_for(|view| view.state == SubscriptionState::Live).await;
    degraded
        .wait_for(|view| view.state == SubscriptionState::Degraded && view.listings.len() == 4)
        .await;

    for source in [&live_source, &degraded_source] {
        source.upsert(listing("r3", ListingKind::Sale, Some(400.0)));
    }
    live.wait_for(|view| view.listings.len() == 3).await;
    degraded.wait_for(|view| view.listings.len() == 3).await;

    for source in [&live_source, &degraded_source] {
        source.upsert(listing("r3", ListingKind::Rent, Some(400.0)));
    }
    let live_view = live.wait_for(|view| view.listings.len() == 4).await;
    let degraded_view = degraded.wait_for(|view| view.listings.len() == 4).await;

    assert_eq!(ids(&live_view.listings), vec!["r2", "r3", "r4", "r1"]);
    assert_eq!(ids(&degraded_view.listings), ids(&live_view.listings));

    let fresh = SubscriptionManager::new(live_source, SubscriptionOptions::default())
        .open(rentals_by_price());
    let fresh_view = fresh
        .wait_for(|view| view.state == SubscriptionState::Live)
        .await;
    assert_eq!(ids(&fresh_view.listings), ids(&live_view.listings));
}

#[tokio::test]
async fn degraded_feed_keeps_applying_updates_locally() {
    let source = Arc::new(MemoryCollectionSource::new(seed()));
    source.set_missing_indexes(true);
    let subscription = SubscriptionManager::new(Arc::clone(&source), SubscriptionOptions::default())
        .open(rentals_by_price());
    subscription
        .wait_for(|view| view.state == SubscriptionState::Degraded && view.listings.len() == 4)
        .await;

    source.upsert(listing("r5", ListingKind::Rent, Some(100.0)));
    source.upsert(listing("s2", ListingKind::Sale, Some(50.0)));
    source.upsert(listing("r1", ListingKind::Sale, Some(700.0)));
    source.remove(&ListingId("r3".to_string()));

    let view = subscription
        .wait_for(|view| ids(&view.listings) == vec!["r2", "r5", "r4"])
        .await;
    assert_eq!(view.state, SubscriptionState::Degraded);
}

#[tokio::test]
async fn missing_index_mid_stream_falls_back_without_losing_data() {
    let source = Arc::new(MemoryCollectionSource::new(seed()));
    let subscription = SubscriptionManager::new(Arc::clone(&source), SubscriptionOptions::default())
        .open(rentals_by_price());
    let live = subscription
        .wait_for(|view| view.state == SubscriptionState::Live)
        .await;

    source.set_missing_indexes(true);
    source.fail_feeds(true, SourceError::IndexMissing);

    let degraded = subscription
        .wait_for(|view| view.state == SubscriptionState::Degraded && view.version > live.version + 1)
        .await;
    assert_eq!(degraded.listings, live.listings);
    assert!(degraded.last_error.is_none());
}

#[tokio::test]
async fn retry_preferred_returns_to_live() {
    let source = Arc::new(MemoryCollectionSource::new(seed()));
    source.set_missing_indexes(true);
    let subscription = SubscriptionManager::new(Arc::clone(&source), SubscriptionOptions::default())
        .open(rentals_by_price());
    let degraded = subscription
        .wait_for(|view| view.state == SubscriptionState::Degraded && !view.listings.is_empty())
        .await;

    source.set_missing_indexes(false);
    assert!(subscription.retry_preferred());

    let live = subscription
        .wait_for(|view| view.state == SubscriptionState::Live)
        .await;
    assert_eq!(live.listings, degraded.listings);
}

#[tokio::test]
async fn permission_denied_closes_and_surfaces() {
    let source = Arc::new(MemoryCollectionSource::new(seed()));
    source.set_permission_denied(true);
    let subscription = SubscriptionManager::new(source, SubscriptionOptions::default())
        .open(rentals_by_price());

    let view = subscription.wait_for(|_| false).await;

    assert_eq!(view.state, SubscriptionState::Closed);
    assert_eq!(view.last_error, Some(SubscriptionError::PermissionDenied));
    assert!(view.listings.is_empty());
}

#[tokio::test]
async fn failed_fallback_retains_last_known_listings() {
    let source = Arc::new(MemoryCollectionSource::new(seed()));
    let subscription = SubscriptionManager::new(Arc::clone(&source), SubscriptionOptions::default())
        .open(rentals_by_price());
    let live = subscription
        .wait_for(|view| view.state == SubscriptionState::Live)
        .await;

    source.set_permission_denied(true);
    source.fail_feeds(true, SourceError::IndexMissing);

    let closed = subscription.wait_for(|_| false).await;
    assert_eq!(closed.state, SubscriptionState::Closed);
    assert_eq!(closed.last_error, Some(SubscriptionError::PermissionDenied));
    assert_eq!(closed.listings, live.listings);
}

#[tokio::test]
async fn unknown_stream_error_closes_with_data_retained() {
    let source = Arc::new(MemoryCollectionSource::new(seed()));
    let subscription = SubscriptionManager::new(Arc::clone(&source), SubscriptionOptions::default())
        .open(rentals_by_price());
    let live = subscription
        .wait_for(|view| view.state == SubscriptionState::Live)
        .await;

    source.fail_feeds(true, SourceError::Unknown("quota exceeded".to_string()));

    let closed = subscription.wait_for(|_| false).await;
    assert_eq!(
        closed.last_error,
        Some(SubscriptionError::Unknown("quota exceeded".to_string()))
    );
    assert_eq!(closed.listings, live.listings);
}

#[tokio::test]
async fn close_is_idempotent_and_stops_updates() {
    let source = Arc::new(MemoryCollectionSource::new(seed()));
    let subscription = SubscriptionManager::new(Arc::clone(&source), SubscriptionOptions::default())
        .open(rentals_by_price());
    subscription
        .wait_for(|view| view.state == SubscriptionState::Live)
        .await;

    subscription.close();
    let closed = subscription.snapshot();
    subscription.close();
    assert_eq!(subscription.snapshot().version, closed.version);
    assert_eq!(closed.state, SubscriptionState::Closed);
    assert!(closed.last_error.is_none());

    source.upsert(listing("r9", ListingKind::Rent, Some(1.0)));
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let after = subscription.snapshot();
    assert_eq!(after.version, closed.version);
    assert_eq!(after.listings, closed.listings);

    subscription.shutdown().await;
    assert_eq!(source.subscriber_count(), 0);
}

#[tokio::test]
async fn close_during_pending_open_is_clean() {
    let subscription = SubscriptionManager::new(Arc::new(Hanging), SubscriptionOptions::default())
        .open(rentals_by_price());
    assert_eq!(subscription.state(), SubscriptionState::Connecting);

    subscription.close();
    let view = subscription.snapshot();
    assert_eq!(view.state, SubscriptionState::Closed);
    assert!(view.last_error.is_none());

    tokio::time::timeout(Duration::from_secs(1), subscription.shutdown())
        .await
        .expect("worker stops promptly");
}

#[tokio::test]
async fn open_timeout_is_opt_in() {
    let unbounded = SubscriptionManager::new(Arc::new(Hanging), SubscriptionOptions::default())
        .open(rentals_by_price());
    let bounded = SubscriptionManager::new(
        Arc::new(Hanging),
        SubscriptionOptions {
            open_timeout: Some(Duration::from_millis(30)),
        },
    )
    .open(rentals_by_price());

    let timed_out = bounded.wait_for(|_| false).await;
    assert_eq!(
        timed_out.last_error,
        Some(SubscriptionError::Timeout(Duration::from_millis(30)))
    );
    assert_eq!(unbounded.state(), SubscriptionState::Connecting);
}

#[tokio::test]
async fn independent_subscriptions_do_not_affect_each_other() {
    let source = Arc::new(MemoryCollectionSource::new(seed()));
    let manager = SubscriptionManager::new(Arc::clone(&source), SubscriptionOptions::default());
    let rentals = manager.open(rentals_by_price());
    let everything = manager.open(QueryDescriptor::new("listings"));

    rentals
        .wait_for(|view| view.state == SubscriptionState::Live)
        .await;
    everything
        .wait_for(|view| view.state == SubscriptionState::Live)
        .await;

    source.fail_feeds(true, SourceError::Unknown("shard offline".to_string()));
    rentals.wait_for(|_| false).await;

    source.upsert(listing("s9", ListingKind::Sale, Some(10.0)));
    let view = everything
        .wait_for(|view| view.listings.len() == 7)
        .await;
    assert_eq!(view.state, SubscriptionState::Live);
    assert_eq!(rentals.state(), SubscriptionState::Closed);
}
