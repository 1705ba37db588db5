use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::domain::{PartyId, RequestId, TransitionAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    RequestAccepted,
    RequestRejected,
    WorkStarted,
    WorkCompleted,
    RequestCancelled,
}

impl From<TransitionAction> for NotificationCategory {
    fn from(action: TransitionAction) -> Self {
        match action {
            TransitionAction::Accept => Self::RequestAccepted,
            TransitionAction::Reject => Self::RequestRejected,
            TransitionAction::Start => Self::WorkStarted,
            TransitionAction::Complete => Self::WorkCompleted,
            TransitionAction::Cancel => Self::RequestCancelled,
        }
    }
}

/// Message for the counterparty of a request transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub recipient: PartyId,
    pub request_id: RequestId,
    pub category: NotificationCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub delivered: bool,
}

/// Outbound delivery channel (push, e-mail, in-app inbox).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("recipient {0} cannot be reached")]
    UnknownRecipient(PartyId),
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Delivery counters since the dispatcher started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub queued: u64,
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

enum Dispatch {
    Deliver(NotificationEvent),
    Flush(oneshot::Sender<()>),
}

/// Fire-and-forget delivery on a background task.
///
/// Each event is attempted once, in queue order. Failures are logged and
/// counted, never retried, and never reported to whoever queued the event.
#[derive(Clone)]
pub struct NotificationDispatcher {
    queue: mpsc::UnboundedSender<Dispatch>,
    counters: Arc<Counters>,
}

impl NotificationDispatcher {
    /// Must be called inside a Tokio runtime. The worker stops once every
    /// clone of the dispatcher is dropped.
    pub fn spawn<N>(sink: Arc<N>) -> Self
    where
        N: NotificationSink + 'static,
    {
        let (queue, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        tokio::spawn(deliver_loop(sink, receiver, Arc::clone(&counters)));
        Self { queue, counters }
    }

    pub fn dispatch(&self, event: NotificationEvent) {
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        if let Err(mpsc::error::SendError(Dispatch::Deliver(event))) =
            self.queue.send(Dispatch::Deliver(event))
        {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                recipient = %event.recipient,
                request_id = %event.request_id,
                "notification dispatcher stopped; dropping event"
            );
        }
    }

    /// Waits until every event queued before this call has been attempted.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.queue.send(Dispatch::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

async fn deliver_loop<N>(
    sink: Arc<N>,
    mut receiver: mpsc::UnboundedReceiver<Dispatch>,
    counters: Arc<Counters>,
) where
    N: NotificationSink,
{
    while let Some(dispatch) = receiver.recv().await {
        match dispatch {
            Dispatch::Deliver(event) => match sink.deliver(&event).await {
                Ok(()) => {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        recipient = %event.recipient,
                        request_id = %event.request_id,
                        category = ?event.category,
                        "notification delivered"
                    );
                }
                Err(err) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        recipient = %event.recipient,
                        request_id = %event.request_id,
                        error = %err,
                        "notification delivery failed; dropping event"
                    );
                }
            },
            Dispatch::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// In-app inbox keeping every delivered event.
#[derive(Debug, Default)]
pub struct MemoryInbox {
    events: Mutex<Vec<NotificationEvent>>,
}

impl MemoryInbox {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.lock().clone()
    }

    pub fn for_recipient(&self, recipient: &PartyId) -> Vec<NotificationEvent> {
        self.lock()
            .iter()
            .filter(|event| &event.recipient == recipient)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<NotificationEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl NotificationSink for MemoryInbox {
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        let mut stored = event.clone();
        stored.delivered = true;
        self.lock().push(stored);
        Ok(())
    }
}
