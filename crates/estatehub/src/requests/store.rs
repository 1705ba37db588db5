use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::domain::{PartyId, RequestId, RequestStatus, ServiceRequest, StatusChange};

/// Persistence boundary for service requests.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn insert(&self, request: ServiceRequest) -> Result<ServiceRequest, StoreError>;
    async fn fetch(&self, id: &RequestId) -> Result<Option<ServiceRequest>, StoreError>;
    /// Applies `patch` only while the stored status still equals
    /// `patch.expected`; otherwise fails with `StaleStatus`.
    async fn apply(&self, id: &RequestId, patch: RequestPatch)
        -> Result<ServiceRequest, StoreError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("request already exists")]
    Duplicate,
    #[error("request not found")]
    NotFound,
    #[error("request is already {current}")]
    StaleStatus { current: RequestStatus },
    #[error("request store unavailable: {0}")]
    Unavailable(String),
}

/// Conditional status update carrying the audit entry it produces.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPatch {
    pub expected: RequestStatus,
    pub status: RequestStatus,
    pub provider_id: Option<PartyId>,
    pub updated_at: DateTime<Utc>,
    pub change: StatusChange,
}

impl RequestPatch {
    pub fn apply_to(self, request: &mut ServiceRequest) -> Result<(), StoreError> {
        if request.status != self.expected {
            return Err(StoreError::StaleStatus {
                current: request.status,
            });
        }
        request.status = self.status;
        request.provider_id = self.provider_id;
        request.updated_at = self.updated_at;
        request.history.push(self.change);
        Ok(())
    }
}

/// Process-local store. The mutex makes each conditional update atomic, so
/// two providers racing to accept an open request cannot both win.
#[derive(Debug, Default)]
pub struct MemoryRequestStore {
    records: Mutex<HashMap<RequestId, ServiceRequest>>,
}

impl MemoryRequestStore {
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, ServiceRequest>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RequestStore for MemoryRequestStore {
    async fn insert(&self, request: ServiceRequest) -> Result<ServiceRequest, StoreError> {
        let mut records = self.lock();
        if records.contains_key(&request.id) {
            return Err(StoreError::Duplicate);
        }
        records.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    async fn fetch(&self, id: &RequestId) -> Result<Option<ServiceRequest>, StoreError> {
        Ok(self.lock().get(id).cloned())
    }

    async fn apply(
        &self,
        id: &RequestId,
        patch: RequestPatch,
    ) -> Result<ServiceRequest, StoreError> {
        let mut records = self.lock();
        let request = records.get_mut(id).ok_or(StoreError::NotFound)?;
        patch.apply_to(request)?;
        Ok(request.clone())
    }
}
