use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use super::domain::{
    NewServiceRequest, PartyId, RequestId, RequestStatus, ServiceRequest, StatusChange,
    TransitionAction,
};
use super::notification::{NotificationCategory, NotificationDispatcher, NotificationEvent};
use super::store::{RequestPatch, RequestStore, StoreError};
use super::workflow::{plan_transition, TransitionPlan, TransitionRejection};

/// Creates service requests and drives them through their lifecycle.
///
/// A transition is persisted before its notification is queued, and a
/// failed delivery never touches the stored request.
pub struct RequestWorkflow<S> {
    store: Arc<S>,
    notifications: NotificationDispatcher,
}

static REQUEST_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> RequestId {
    let id = REQUEST_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    RequestId(format!("req-{id:06}"))
}

impl<S> RequestWorkflow<S>
where
    S: RequestStore + 'static,
{
    pub fn new(store: Arc<S>, notifications: NotificationDispatcher) -> Self {
        Self {
            store,
            notifications,
        }
    }

    pub fn notifications(&self) -> &NotificationDispatcher {
        &self.notifications
    }

    /// Registers a new `Pending` request.
    pub async fn create(&self, input: NewServiceRequest) -> Result<ServiceRequest, RequestError> {
        if input.description.trim().is_empty() {
            return Err(RequestError::InvalidRequest(
                "description must not be empty".to_string(),
            ));
        }
        if !input.budget.is_finite() || input.budget < 0.0 {
            return Err(RequestError::InvalidRequest(
                "budget must be a non-negative amount".to_string(),
            ));
        }
        if input.provider_id.as_ref() == Some(&input.requester_id) {
            return Err(RequestError::InvalidRequest(
                "a request cannot be directed at its own requester".to_string(),
            ));
        }

        let now = Utc::now();
        let request = ServiceRequest {
            id: next_request_id(),
            category: input.category,
            requester_id: input.requester_id,
            provider_id: input.provider_id,
            property_id: input.property_id,
            status: RequestStatus::Pending,
            budget: input.budget,
            description: input.description,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        };

        let stored = self.store.insert(request).await?;
        info!(
            request_id = %stored.id,
            requester = %stored.requester_id,
            category = ?stored.category,
            "service request created"
        );
        Ok(stored)
    }

    pub async fn get(&self, id: &RequestId) -> Result<ServiceRequest, RequestError> {
        self.store
            .fetch(id)
            .await?
            .ok_or_else(|| RequestError::NotFound(id.clone()))
    }

    /// Validates, persists, then notifies the counterparty. Returns the
    /// updated request.
    pub async fn transition(
        &self,
        id: &RequestId,
        action: TransitionAction,
        actor: &PartyId,
        note: Option<String>,
    ) -> Result<ServiceRequest, RequestError> {
        let current = self.get(id).await?;
        let plan = plan_transition(&current, action, actor)?;

        let at = Utc::now();
        let patch = RequestPatch {
            expected: plan.from,
            status: plan.to,
            provider_id: plan.provider_id.clone(),
            updated_at: at,
            change: StatusChange {
                from: plan.from,
                to: plan.to,
                actor: actor.clone(),
                note,
                at,
            },
        };

        let updated = match self.store.apply(id, patch).await {
            Ok(updated) => updated,
            Err(StoreError::StaleStatus { current }) => {
                return Err(RequestError::InvalidTransition {
                    from: current,
                    requested: plan.to,
                });
            }
            Err(StoreError::NotFound) => return Err(RequestError::NotFound(id.clone())),
            Err(other) => return Err(other.into()),
        };

        info!(
            request_id = %updated.id,
            from = plan.from.label(),
            to = plan.to.label(),
            actor = %actor,
            "service request transitioned"
        );
        self.notify(&updated, &plan);
        Ok(updated)
    }

    fn notify(&self, request: &ServiceRequest, plan: &TransitionPlan) {
        let Some(recipient) = plan.notify.clone() else {
            debug!(request_id = %request.id, "no counterparty to notify");
            return;
        };

        self.notifications.dispatch(NotificationEvent {
            recipient,
            request_id: request.id.clone(),
            category: NotificationCategory::from(plan.action),
            message: describe(request, plan),
            link: Some(format!("/requests/{}", request.id)),
            delivered: false,
        });
    }
}

fn describe(request: &ServiceRequest, plan: &TransitionPlan) -> String {
    let verb = match plan.action {
        TransitionAction::Accept => "accepted",
        TransitionAction::Reject => "declined",
        TransitionAction::Start => "started work on",
        TransitionAction::Complete => "completed",
        TransitionAction::Cancel => "cancelled",
    };
    format!("{} {verb} request {}", plan.actor, request.id)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error("request {0} not found")]
    NotFound(RequestId),
    #[error("cannot move request from {from} to {requested}")]
    InvalidTransition {
        from: RequestStatus,
        requested: RequestStatus,
    },
    #[error("{actor} is not allowed to {action} this request")]
    Unauthorized {
        actor: PartyId,
        action: TransitionAction,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

impl From<TransitionRejection> for RequestError {
    fn from(rejection: TransitionRejection) -> Self {
        match rejection {
            TransitionRejection::InvalidTransition { from, requested } => {
                Self::InvalidTransition { from, requested }
            }
            TransitionRejection::Unauthorized { actor, action } => {
                Self::Unauthorized { actor, action }
            }
        }
    }
}
