//! Renovation, construction and rental requests: the status lifecycle, its
//! acting-party checks, and the notifications each transition produces.

pub mod domain;
pub mod notification;
pub mod router;
pub mod service;
pub mod store;
pub mod workflow;

#[cfg(test)]
mod tests;

pub use domain::{
    NewServiceRequest, PartyId, RequestCategory, RequestId, RequestStatus, ServiceRequest,
    StatusChange, TransitionAction,
};
pub use notification::{
    DeliveryError, DispatchStats, MemoryInbox, NotificationCategory, NotificationDispatcher,
    NotificationEvent, NotificationSink,
};
pub use router::{request_router, TransitionBody};
pub use service::{RequestError, RequestWorkflow};
pub use store::{MemoryRequestStore, RequestPatch, RequestStore, StoreError};
