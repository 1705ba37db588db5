use chrono::{Duration, TimeZone, Utc};
use estatehub::discovery::{
    Listing, ListingId, ListingKind, ListingStatus, ListingSubscription, SubscriptionState,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) listings: Arc<ListingSubscription>,
}

impl AppState {
    /// Ready once the listener is bound and the listing feed is serving data.
    pub(crate) fn is_ready(&self) -> bool {
        self.readiness.load(Ordering::Acquire)
            && matches!(
                self.listings.state(),
                SubscriptionState::Live | SubscriptionState::Degraded
            )
    }
}

/// Kind, title, city, asking price and bedrooms.
type SeedListing = (ListingKind, &'static str, &'static str, Option<f64>, u32);

const SEED: &[SeedListing] = &[
    (ListingKind::Rent, "Sunny studio near the university", "Kampala", Some(320.0), 1),
    (ListingKind::Sale, "Family house with garden", "Entebbe", Some(145_000.0), 4),
    (ListingKind::Rent, "Two bedroom apartment", "Kampala", Some(650.0), 2),
    (ListingKind::Wanted, "Looking for office space", "Kampala", Some(1_200.0), 0),
    (ListingKind::Rent, "Lakeside cottage", "Jinja", Some(480.0), 2),
    (ListingKind::Rent, "Room in shared house", "Kampala", Some(150.0), 1),
    (ListingKind::Sale, "Plot with approved plans", "Mukono", Some(38_000.0), 0),
    (ListingKind::Rent, "Penthouse with terrace", "Kampala", Some(1_900.0), 3),
    (ListingKind::Rent, "Townhouse, price on request", "Entebbe", None, 3),
    (ListingKind::Rent, "Garden flat", "Jinja", Some(410.0), 2),
    (ListingKind::Sale, "Renovated bungalow", "Kampala", Some(96_500.0), 3),
    (ListingKind::Rent, "Bedsitter close to the market", "Mbarara", Some(120.0), 1),
];

/// Sample catalogue for the development server and the demo. Later entries
/// are newer.
pub(crate) fn seed_listings() -> Vec<Listing> {
    let base = Utc
        .with_ymd_and_hms(2025, 1, 6, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);

    SEED.iter()
        .enumerate()
        .map(|(index, &(kind, title, city, price, bedrooms))| Listing {
            id: ListingId(format!("listing-{:03}", index + 1)),
            kind,
            status: ListingStatus::Published,
            title: title.to_string(),
            description: format!("{title} in {city}"),
            price,
            city: city.to_string(),
            bedrooms,
            bathrooms: bedrooms.clamp(1, 2),
            furnished: index % 2 == 0,
            parking: index % 3 != 0,
            area: None,
            created_at: Some(base + Duration::days(index as i64)),
            owner_id: format!("agent-{}", index % 3 + 1),
        })
        .collect()
}
