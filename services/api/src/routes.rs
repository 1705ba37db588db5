use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use estatehub::discovery::router::ListingQueryState;
use estatehub::discovery::listing_router;
use estatehub::requests::{request_router, RequestStore, RequestWorkflow};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_core_routes<S>(
    listings: ListingQueryState,
    workflow: Arc<RequestWorkflow<S>>,
) -> axum::Router
where
    S: RequestStore + 'static,
{
    listing_router(listings)
        .merge(request_router(workflow))
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let feed = state.listings.state().label();
    if state.is_ready() {
        (
            StatusCode::OK,
            Json(json!({ "status": "ready", "listing_feed": feed })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "initializing", "listing_feed": feed })),
        )
    }
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::seed_listings;
    use axum::body::Body;
    use axum::http::Request;
    use estatehub::discovery::{
        MemoryCollectionSource, QueryDescriptor, SubscriptionManager, SubscriptionOptions,
        SubscriptionState,
    };
    use estatehub::requests::{MemoryInbox, MemoryRequestStore, NotificationDispatcher};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::AtomicBool;
    use tower::ServiceExt;

    async fn app(ready: bool) -> axum::Router {
        let manager = SubscriptionManager::new(
            Arc::new(MemoryCollectionSource::new(seed_listings())),
            SubscriptionOptions::default(),
        );
        let subscription = manager.open(QueryDescriptor::new("listings"));
        subscription
            .wait_for(|view| view.state == SubscriptionState::Live)
            .await;
        let subscription = Arc::new(subscription);

        let workflow = Arc::new(RequestWorkflow::new(
            Arc::new(MemoryRequestStore::default()),
            NotificationDispatcher::spawn(Arc::new(MemoryInbox::default())),
        ));
        let state = AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
            listings: Arc::clone(&subscription),
        };

        with_core_routes(
            ListingQueryState {
                subscription,
                page_size: 4,
            },
            workflow,
        )
        .layer(Extension(state))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 256 * 1024)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json payload")
    }

    #[tokio::test]
    async fn healthcheck_reports_ok() {
        let Json(body) = healthcheck().await;
        assert_eq!(body["status"], json!("ok"));
    }

    #[tokio::test]
    async fn readiness_waits_for_listener() {
        let response = app(false)
            .await
            .oneshot(Request::get("/ready").body(Body::empty()).expect("request"))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app(true)
            .await
            .oneshot(Request::get("/ready").body(Body::empty()).expect("request"))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["listing_feed"], json!("live"));
    }

    #[tokio::test]
    async fn listing_query_is_served_from_the_seeded_feed() {
        let response = app(true)
            .await
            .oneshot(
                Request::post("/api/v1/listings/query")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({
                            "context": "rentals_only",
                            "sort": { "key": "price", "direction": "ascending" }
                        })
                        .to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("route executes");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response).await;
        assert_eq!(payload["total_matches"], json!(8));
        assert_eq!(payload["has_more"], json!(true));
        assert_eq!(payload["items"].as_array().map(Vec::len), Some(4));
        assert!(payload["items"][0]["price"].is_null(), "missing price sorts as zero");
    }
}
