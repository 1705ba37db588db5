use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use serde_json::Value;

use crate::requests::domain::{
    NewServiceRequest, PartyId, RequestCategory, RequestId, ServiceRequest,
};
use crate::requests::notification::{
    DeliveryError, MemoryInbox, NotificationDispatcher, NotificationEvent, NotificationSink,
};
use crate::requests::service::RequestWorkflow;
use crate::requests::store::{MemoryRequestStore, RequestPatch, RequestStore, StoreError};

pub(super) const REQUESTER: &str = "owner-1";
pub(super) const PROVIDER: &str = "provider-x";

pub(super) fn requester() -> PartyId {
    PartyId::new(REQUESTER)
}

pub(super) fn provider() -> PartyId {
    PartyId::new(PROVIDER)
}

pub(super) fn renovation(provider_id: Option<PartyId>) -> NewServiceRequest {
    NewServiceRequest {
        category: RequestCategory::Renovation,
        requester_id: requester(),
        provider_id,
        property_id: Some("prop-12".to_string()),
        budget: 8_500.0,
        description: "Repaint the ground floor and replace the tiles".to_string(),
    }
}

pub(super) fn build_workflow() -> (
    RequestWorkflow<MemoryRequestStore>,
    Arc<MemoryRequestStore>,
    Arc<MemoryInbox>,
) {
    let store = Arc::new(MemoryRequestStore::default());
    let inbox = Arc::new(MemoryInbox::default());
    let workflow = RequestWorkflow::new(
        Arc::clone(&store),
        NotificationDispatcher::spawn(Arc::clone(&inbox)),
    );
    (workflow, store, inbox)
}

/// Sink that records every attempt and fails all of them.
#[derive(Default)]
pub(super) struct FailingSink {
    attempts: Mutex<Vec<NotificationEvent>>,
}

impl FailingSink {
    pub(super) fn attempts(&self) -> Vec<NotificationEvent> {
        self.attempts.lock().expect("sink mutex poisoned").clone()
    }
}

#[async_trait]
impl NotificationSink for FailingSink {
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        self.attempts
            .lock()
            .expect("sink mutex poisoned")
            .push(event.clone());
        Err(DeliveryError::Transport("push gateway offline".to_string()))
    }
}

/// Store whose writes always fail; reads go to an inner memory store.
#[derive(Default)]
pub(super) struct ReadOnlyStore {
    pub(super) inner: MemoryRequestStore,
}

#[async_trait]
impl RequestStore for ReadOnlyStore {
    async fn insert(&self, request: ServiceRequest) -> Result<ServiceRequest, StoreError> {
        self.inner.insert(request).await
    }

    async fn fetch(&self, id: &RequestId) -> Result<Option<ServiceRequest>, StoreError> {
        self.inner.fetch(id).await
    }

    async fn apply(
        &self,
        _id: &RequestId,
        _patch: RequestPatch,
    ) -> Result<ServiceRequest, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
