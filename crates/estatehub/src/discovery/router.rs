use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::domain::Listing;
use super::filter::{FilterSpec, RawFilterInput};
use super::query::{run_query, PageWindow, QueryContext, QueryRequest};
use super::sort::SortSpec;
use super::subscription::{ListingSubscription, SubscriptionState};
use crate::error::AppError;

/// Shared state for the listing query endpoint.
#[derive(Clone)]
pub struct ListingQueryState {
    pub subscription: Arc<ListingSubscription>,
    pub page_size: usize,
}

/// Wire form of a discovery query. `shown` is the client's cursor; omit it
/// for the first page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListingQueryBody {
    pub context: QueryContext,
    pub search: Option<String>,
    pub filter: RawFilterInput,
    pub sort: SortSpec,
    pub page_size: Option<usize>,
    pub shown: Option<usize>,
}

impl ListingQueryBody {
    pub fn into_request(self, default_page_size: usize) -> QueryRequest {
        let page_size = self.page_size.unwrap_or(default_page_size).max(1);
        let shown = self.shown.unwrap_or(page_size).max(page_size);
        QueryRequest {
            context: self.context,
            search: self.search,
            filter: FilterSpec::from_raw(&self.filter),
            sort: self.sort,
            window: PageWindow { page_size, shown },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListingQueryResponse {
    pub items: Vec<Listing>,
    pub has_more: bool,
    pub total_matches: usize,
    pub shown: usize,
    pub feed_state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub fn listing_router(state: ListingQueryState) -> Router {
    Router::new()
        .route("/api/v1/listings/query", post(query_handler))
        .with_state(state)
}

pub(crate) async fn query_handler(
    State(state): State<ListingQueryState>,
    Json(body): Json<ListingQueryBody>,
) -> Response {
    let view = state.subscription.snapshot();

    if view.listings.is_empty() {
        match (view.state, view.last_error.clone()) {
            (SubscriptionState::Connecting, _) => {
                let payload = json!({ "error": "listing feed is still connecting" });
                return (StatusCode::SERVICE_UNAVAILABLE, Json(payload)).into_response();
            }
            (SubscriptionState::Closed, Some(error)) => {
                return AppError::from(error).into_response();
            }
            (SubscriptionState::Closed, None) => {
                let payload = json!({ "error": "listing feed was closed before any data arrived" });
                return (StatusCode::SERVICE_UNAVAILABLE, Json(payload)).into_response();
            }
            _ => {}
        }
    }

    let request = body.into_request(state.page_size);
    let result = run_query(&view.listings, &request);

    let response = ListingQueryResponse {
        items: result.items,
        has_more: result.has_more,
        total_matches: result.total_matches,
        shown: result.shown,
        feed_state: view.state.label(),
        warning: view
            .last_error
            .map(|error| format!("serving last known listings: {error}")),
    };
    (StatusCode::OK, Json(response)).into_response()
}

#[cfg(test)]
mod tests {
    use std::future;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::discovery::domain::{ListingId, ListingKind, ListingStatus};
    use crate::discovery::subscription::{
        ChangeStream, CollectionSource, MemoryCollectionSource, QueryDescriptor, SourceError,
        SubscriptionManager, SubscriptionOptions,
    };

    fn listing(id: &str, kind: ListingKind, price: f64) -> Listing {
        Listing {
            id: ListingId(id.to_string()),
            kind,
            status: ListingStatus::Published,
            title: format!("Listing {id}"),
            description: String::new(),
            price: Some(price),
            city: "Accra".to_string(),
            bedrooms: 2,
            bathrooms: 1,
            furnished: false,
            parking: true,
            area: None,
            created_at: None,
            owner_id: "owner".to_string(),
        }
    }

    struct Silent;

    #[async_trait]
    impl CollectionSource for Silent {
        async fn subscribe(&self, _query: &QueryDescriptor) -> Result<ChangeStream, SourceError> {
            future::pending().await
        }
    }

    async fn live_state(listings: Vec<Listing>) -> ListingQueryState {
        let manager = SubscriptionManager::new(
            Arc::new(MemoryCollectionSource::new(listings)),
            SubscriptionOptions::default(),
        );
        let subscription = manager.open(QueryDescriptor::new("listings"));
        subscription
            .wait_for(|view| view.state == SubscriptionState::Live)
            .await;
        ListingQueryState {
            subscription: Arc::new(subscription),
            page_size: 2,
        }
    }

    async fn post_query(router: Router, body: Value) -> (StatusCode, Value) {
        let response = router
            .oneshot(
                Request::post("/api/v1/listings/query")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_vec(&body).expect("serialize")))
                    .expect("valid request"),
            )
            .await
            .expect("route executes");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("read body");
        (status, serde_json::from_slice(&bytes).expect("json payload"))
    }

    #[tokio::test]
    async fn first_page_uses_configured_page_size() {
        let state = live_state(vec![
            listing("a", ListingKind::Rent, 300.0),
            listing("b", ListingKind::Sale, 100.0),
            listing("c", ListingKind::Rent, 200.0),
        ])
        .await;

        let (status, payload) = post_query(
            listing_router(state),
            json!({ "sort": { "key": "price", "direction": "ascending" } }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["total_matches"], json!(3));
        assert_eq!(payload["shown"], json!(2));
        assert_eq!(payload["has_more"], json!(true));
        assert_eq!(payload["feed_state"], json!("live"));
        assert_eq!(payload["items"][0]["id"], json!("b"));
        assert!(payload.get("warning").is_none());
    }

    #[tokio::test]
    async fn rental_context_ignores_requested_kind() {
        let state = live_state(vec![
            listing("a", ListingKind::Rent, 300.0),
            listing("b", ListingKind::Sale, 100.0),
        ])
        .await;

        let (status, payload) = post_query(
            listing_router(state),
            json!({ "context": "rentals_only", "filter": { "kind": "sale", "min_price": "abc" } }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["total_matches"], json!(1));
        assert_eq!(payload["items"][0]["id"], json!("a"));
        assert_eq!(payload["has_more"], json!(false));
    }

    #[tokio::test]
    async fn connecting_feed_is_unavailable() {
        let manager = SubscriptionManager::new(Arc::new(Silent), SubscriptionOptions::default());
        let state = ListingQueryState {
            subscription: Arc::new(manager.open(QueryDescriptor::new("listings"))),
            page_size: 12,
        };

        let (status, payload) = post_query(listing_router(state), json!({})).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(payload["error"].as_str().unwrap_or_default().contains("connecting"));
    }

    #[tokio::test]
    async fn feed_closed_while_connecting_is_unavailable() {
        let manager = SubscriptionManager::new(Arc::new(Silent), SubscriptionOptions::default());
        let subscription = manager.open(QueryDescriptor::new("listings"));
        subscription.close();
        let state = ListingQueryState {
            subscription: Arc::new(subscription),
            page_size: 12,
        };

        let (status, payload) = post_query(listing_router(state), json!({})).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(payload["error"].as_str().unwrap_or_default().contains("closed"));
    }

    #[tokio::test]
    async fn denied_feed_without_data_is_forbidden() {
        let source = MemoryCollectionSource::new(vec![listing("a", ListingKind::Rent, 1.0)]);
        source.set_permission_denied(true);
        let manager = SubscriptionManager::new(Arc::new(source), SubscriptionOptions::default());
        let subscription = manager.open(QueryDescriptor::new("listings"));
        subscription.wait_for(|view| view.is_closed()).await;
        let state = ListingQueryState {
            subscription: Arc::new(subscription),
            page_size: 12,
        };

        let (status, _) = post_query(listing_router(state), json!({})).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn shown_cursor_never_drops_below_one_page() {
        let body = ListingQueryBody {
            page_size: Some(5),
            shown: Some(3),
            ..ListingQueryBody::default()
        };
        let request = body.into_request(12);
        assert_eq!(request.window, PageWindow { page_size: 5, shown: 5 });

        let request = ListingQueryBody::default().into_request(12);
        assert_eq!(request.window, PageWindow::first_page(12));
    }
}
