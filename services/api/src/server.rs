use crate::cli::ServeArgs;
use crate::infra::{seed_listings, AppState};
use crate::routes::with_core_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use estatehub::config::AppConfig;
use estatehub::discovery::router::ListingQueryState;
use estatehub::discovery::{
    MemoryCollectionSource, QueryDescriptor, SortSpec, SubscriptionManager, SubscriptionOptions,
};
use estatehub::error::AppError;
use estatehub::requests::{MemoryInbox, MemoryRequestStore, NotificationDispatcher, RequestWorkflow};
use estatehub::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let source = Arc::new(MemoryCollectionSource::new(seed_listings()));
    let manager = SubscriptionManager::new(source, SubscriptionOptions::from(&config.discovery));
    let subscription = Arc::new(
        manager.open(QueryDescriptor::new("listings").ordered_by(SortSpec::newest_first())),
    );

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        listings: Arc::clone(&subscription),
    };

    let workflow = Arc::new(RequestWorkflow::new(
        Arc::new(MemoryRequestStore::default()),
        NotificationDispatcher::spawn(Arc::new(MemoryInbox::default())),
    ));

    let listings = ListingQueryState {
        subscription,
        page_size: config.discovery.page_size,
    };
    let app = with_core_routes(listings, workflow)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        page_size = config.discovery.page_size,
        "estatehub service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
