use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::domain::{NewServiceRequest, PartyId, RequestId, TransitionAction};
use super::service::{RequestError, RequestWorkflow};
use super::store::{RequestStore, StoreError};

/// Body of `POST /api/v1/requests/:id/transitions`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransitionBody {
    pub action: TransitionAction,
    pub actor: PartyId,
    #[serde(default)]
    pub note: Option<String>,
}

pub fn request_router<S>(workflow: Arc<RequestWorkflow<S>>) -> Router
where
    S: RequestStore + 'static,
{
    Router::new()
        .route("/api/v1/requests", post(create_handler::<S>))
        .route("/api/v1/requests/:request_id", get(status_handler::<S>))
        .route(
            "/api/v1/requests/:request_id/transitions",
            post(transition_handler::<S>),
        )
        .with_state(workflow)
}

pub(crate) async fn create_handler<S>(
    State(workflow): State<Arc<RequestWorkflow<S>>>,
    Json(input): Json<NewServiceRequest>,
) -> Response
where
    S: RequestStore + 'static,
{
    match workflow.create(input).await {
        Ok(request) => (StatusCode::CREATED, Json(request)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn status_handler<S>(
    State(workflow): State<Arc<RequestWorkflow<S>>>,
    Path(request_id): Path<String>,
) -> Response
where
    S: RequestStore + 'static,
{
    match workflow.get(&RequestId(request_id)).await {
        Ok(request) => (StatusCode::OK, Json(request)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn transition_handler<S>(
    State(workflow): State<Arc<RequestWorkflow<S>>>,
    Path(request_id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> Response
where
    S: RequestStore + 'static,
{
    let id = RequestId(request_id);
    match workflow
        .transition(&id, body.action, &body.actor, body.note)
        .await
    {
        Ok(request) => (StatusCode::OK, Json(request)).into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: RequestError) -> Response {
    let status = match &err {
        RequestError::NotFound(_) => StatusCode::NOT_FOUND,
        RequestError::InvalidTransition { .. } => StatusCode::CONFLICT,
        RequestError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        RequestError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RequestError::Persistence(StoreError::Duplicate) => StatusCode::CONFLICT,
        RequestError::Persistence(other) => {
            error!(error = %other, "request store failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let mut payload = json!({ "error": err.to_string() });
    match &err {
        RequestError::InvalidTransition { from, requested } => {
            payload["code"] = json!("invalid_transition");
            payload["current"] = json!(from);
            payload["requested"] = json!(requested);
        }
        RequestError::Unauthorized { .. } => payload["code"] = json!("unauthorized"),
        _ => {}
    }
    (status, Json(payload)).into_response()
}
