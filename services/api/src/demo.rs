use crate::infra::seed_listings;
use chrono::Utc;
use clap::Args;
use estatehub::discovery::{
    DiscoverySession, Listing, ListingId, ListingKind, ListingStatus, MemoryCollectionSource,
    QueryContext, QueryDescriptor, QueryResult, SortSpec, SubscriptionManager,
    SubscriptionOptions, SubscriptionState,
};
use estatehub::error::AppError;
use estatehub::requests::{
    MemoryInbox, MemoryRequestStore, NewServiceRequest, NotificationDispatcher, PartyId,
    RequestCategory, RequestWorkflow, TransitionAction,
};
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Listings shown per page in the discovery walkthrough.
    #[arg(long, default_value_t = 4)]
    pub(crate) page_size: usize,
    /// Skip the service request portion of the demo.
    #[arg(long)]
    pub(crate) skip_requests: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    println!("EstateHub demo");
    run_discovery(args.page_size.max(1)).await?;

    if args.skip_requests {
        return Ok(());
    }
    run_request_lifecycle().await;
    Ok(())
}

async fn run_discovery(page_size: usize) -> Result<(), AppError> {
    println!("\nListing discovery (composite index unavailable)");
    let source = Arc::new(MemoryCollectionSource::new(seed_listings()));
    source.set_missing_indexes(true);

    let manager = SubscriptionManager::new(Arc::clone(&source), SubscriptionOptions::default());
    let subscription = manager.open(
        QueryDescriptor::new("listings")
            .with_kind(ListingKind::Rent)
            .ordered_by(SortSpec::cheapest_first()),
    );
    let view = subscription
        .wait_for(|view| !view.listings.is_empty())
        .await;
    if let Some(error) = view.last_error {
        return Err(error.into());
    }
    println!(
        "- Feed {} with {} rentals (filtered and ordered locally)",
        view.state.label(),
        view.listings.len()
    );

    let mut session = DiscoverySession::new(QueryContext::RentalsOnly, page_size);
    session.set_sort(SortSpec::cheapest_first());
    print_page("First page", &session.query(&subscription.listings()));
    print_page("After load more", &session.load_more(&subscription.listings()));

    source.upsert(Listing {
        id: ListingId("listing-demo".to_string()),
        kind: ListingKind::Rent,
        status: ListingStatus::Published,
        title: "Just listed: riverside loft".to_string(),
        description: "Open plan loft with river views".to_string(),
        price: Some(95.0),
        city: "Jinja".to_string(),
        bedrooms: 1,
        bathrooms: 1,
        furnished: true,
        parking: false,
        area: Some(48.0),
        created_at: Some(Utc::now()),
        owner_id: "agent-2".to_string(),
    });
    let count = view.listings.len() + 1;
    let updated = subscription
        .wait_for(|view| view.listings.len() == count)
        .await;
    print_page("Refreshed after a new listing", &session.query(&updated.listings));

    source.set_missing_indexes(false);
    subscription.retry_preferred();
    let recovered = subscription
        .wait_for(|view| view.state == SubscriptionState::Live)
        .await;
    println!(
        "- Index restored, feed {} with {} rentals",
        recovered.state.label(),
        recovered.listings.len()
    );

    subscription.shutdown().await;
    Ok(())
}

fn print_page(heading: &str, result: &QueryResult) {
    println!(
        "  {heading}: {} of {} shown{}",
        result.items.len(),
        result.total_matches,
        if result.has_more { " (more available)" } else { "" }
    );
    for listing in &result.items {
        let price = listing
            .price
            .map(|price| format!("{price:.0}"))
            .unwrap_or_else(|| "on request".to_string());
        println!("    - {} | {} | {}", listing.title, listing.city, price);
    }
}

async fn run_request_lifecycle() {
    println!("\nRenovation request lifecycle");
    let inbox = Arc::new(MemoryInbox::default());
    let workflow = RequestWorkflow::new(
        Arc::new(MemoryRequestStore::default()),
        NotificationDispatcher::spawn(Arc::clone(&inbox)),
    );
    let owner = PartyId::new("owner-17");
    let builder = PartyId::new("builder-3");

    let request = match workflow
        .create(NewServiceRequest {
            category: RequestCategory::Renovation,
            requester_id: owner.clone(),
            provider_id: None,
            property_id: Some("listing-003".to_string()),
            budget: 4_800.0,
            description: "Refit kitchen and bathroom".to_string(),
        })
        .await
    {
        Ok(request) => request,
        Err(err) => {
            println!("  Request rejected: {err}");
            return;
        }
    };
    println!("- Created {} -> {}", request.id, request.status);

    match workflow
        .transition(&request.id, TransitionAction::Cancel, &builder, None)
        .await
    {
        Ok(_) => println!("  Unexpected: provider cancelled a pending request"),
        Err(err) => println!("  Refused: {err}"),
    }

    for action in [
        TransitionAction::Accept,
        TransitionAction::Start,
        TransitionAction::Complete,
    ] {
        match workflow.transition(&request.id, action, &builder, None).await {
            Ok(updated) => println!("- {builder} {action} -> {}", updated.status),
            Err(err) => {
                println!("  Transition failed: {err}");
                return;
            }
        }
    }

    match workflow
        .transition(&request.id, TransitionAction::Cancel, &owner, None)
        .await
    {
        Ok(_) => println!("  Unexpected: completed request was cancelled"),
        Err(err) => println!("  Refused: {err}"),
    }

    workflow.notifications().flush().await;
    let stats = workflow.notifications().stats();
    println!(
        "- Notifications: {} queued, {} delivered, {} failed",
        stats.queued, stats.delivered, stats.failed
    );
    for event in inbox.for_recipient(&owner) {
        println!("    - to {}: {}", event.recipient, event.message);
    }
}
