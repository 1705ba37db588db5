use std::collections::BTreeMap;
use std::future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::source::{
    ChangeBatch, ChangeKind, ChangeStream, CollectionSource, Membership, QueryDescriptor,
    SourceError,
};
use crate::config::DiscoveryConfig;
use crate::discovery::domain::{Listing, ListingId};
use crate::discovery::sort::SortSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Connecting,
    Live,
    /// Serving an unordered query, filtered and sorted locally.
    Degraded,
    Closed,
}

impl SubscriptionState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Live => "live",
            Self::Degraded => "degraded",
            Self::Closed => "closed",
        }
    }
}

/// Reasons a subscription stopped on its own. A missing index never shows up
/// here unless the fallback query failed as well.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error("permission denied by the listing store")]
    PermissionDenied,
    #[error("listing store failure: {0}")]
    Unknown(String),
    #[error("fallback query failed after a missing index: {0}")]
    FallbackFailed(SourceError),
    #[error("listing store did not answer within {0:?}")]
    Timeout(Duration),
}

impl From<SourceError> for SubscriptionError {
    fn from(value: SourceError) -> Self {
        match value {
            SourceError::PermissionDenied => Self::PermissionDenied,
            SourceError::Unknown(message) => Self::Unknown(message),
            other @ SourceError::IndexMissing => Self::Unknown(other.to_string()),
        }
    }
}

fn fallback_error(error: SourceError) -> SubscriptionError {
    match error {
        SourceError::PermissionDenied => SubscriptionError::PermissionDenied,
        other => SubscriptionError::FallbackFailed(other),
    }
}

/// Latest published state of one subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionView {
    pub state: SubscriptionState,
    /// Ordered listings in scope. Retained after a failure.
    pub listings: Arc<[Listing]>,
    pub last_error: Option<SubscriptionError>,
    pub version: u64,
}

impl SubscriptionView {
    fn connecting() -> Self {
        Self {
            state: SubscriptionState::Connecting,
            listings: Arc::from(Vec::new()),
            last_error: None,
            version: 0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == SubscriptionState::Closed
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriptionOptions {
    /// Bound on each attempt to open a query. `None` waits forever.
    pub open_timeout: Option<Duration>,
}

impl From<&DiscoveryConfig> for SubscriptionOptions {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            open_timeout: config.open_timeout,
        }
    }
}

/// Opens resilient listing subscriptions against one remote source.
pub struct SubscriptionManager<S> {
    source: Arc<S>,
    options: SubscriptionOptions,
}

impl<S> SubscriptionManager<S>
where
    S: CollectionSource + 'static,
{
    pub fn new(source: Arc<S>, options: SubscriptionOptions) -> Self {
        Self { source, options }
    }

    /// Starts a subscription in `Connecting`. Must be called inside a Tokio
    /// runtime.
    pub fn open(&self, descriptor: QueryDescriptor) -> ListingSubscription {
        let (publisher, view) = watch::channel(SubscriptionView::connecting());
        let publisher = Arc::new(publisher);
        let (commands, command_rx) = mpsc::unbounded_channel();

        info!(
            scope = %descriptor.scope,
            refined = descriptor.is_refined(),
            "opening listing subscription"
        );

        let worker = SubscriptionWorker {
            source: Arc::clone(&self.source),
            membership: descriptor.membership(),
            sort: descriptor.effective_sort(),
            descriptor,
            collection: MaterializedCollection::default(),
            publisher: Arc::clone(&publisher),
            commands: command_rx,
            open_timeout: self.options.open_timeout,
        };
        let task = tokio::spawn(worker.run());

        ListingSubscription {
            view,
            publisher,
            commands,
            task: Some(task),
        }
    }
}

/// Handle to one live subscription. Dropping it closes the subscription.
pub struct ListingSubscription {
    view: watch::Receiver<SubscriptionView>,
    publisher: Arc<watch::Sender<SubscriptionView>>,
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

impl ListingSubscription {
    pub fn snapshot(&self) -> SubscriptionView {
        self.view.borrow().clone()
    }

    pub fn state(&self) -> SubscriptionState {
        self.view.borrow().state
    }

    pub fn listings(&self) -> Arc<[Listing]> {
        Arc::clone(&self.view.borrow().listings)
    }

    pub fn watch(&self) -> watch::Receiver<SubscriptionView> {
        self.view.clone()
    }

    /// Resolves once `ready` holds or the subscription has closed.
    pub async fn wait_for(&self, mut ready: impl FnMut(&SubscriptionView) -> bool) -> SubscriptionView {
        let mut receiver = self.view.clone();
        let view = match receiver
            .wait_for(|view| view.is_closed() || ready(view))
            .await
        {
            Ok(view) => view.clone(),
            Err(_) => self.snapshot(),
        };
        view
    }

    /// Asks a degraded subscription to try the preferred query again.
    pub fn retry_preferred(&self) -> bool {
        self.commands.send(Command::RetryPreferred).is_ok()
    }

    /// Idempotent. No update is published after this returns.
    pub fn close(&self) {
        if close_view(&self.publisher, None) {
            info!("listing subscription closed");
        }
        let _ = self.commands.send(Command::Close);
    }

    /// Closes and waits for the background task to finish.
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "listing subscription task ended abnormally");
            }
        }
    }
}

impl Drop for ListingSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

fn close_view(
    publisher: &watch::Sender<SubscriptionView>,
    error: Option<SubscriptionError>,
) -> bool {
    publisher.send_if_modified(|view| {
        if view.is_closed() {
            return false;
        }
        view.state = SubscriptionState::Closed;
        view.last_error = error;
        view.version += 1;
        true
    })
}

#[derive(Debug)]
enum Command {
    RetryPreferred,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Preferred,
    Fallback,
}

impl Mode {
    fn state(self) -> SubscriptionState {
        match self {
            Mode::Preferred => SubscriptionState::Live,
            Mode::Fallback => SubscriptionState::Degraded,
        }
    }
}

enum Opened {
    Stream(ChangeStream),
    Failed(SourceError),
    TimedOut(Duration),
    Cancelled,
}

struct SubscriptionWorker<S> {
    source: Arc<S>,
    descriptor: QueryDescriptor,
    membership: Membership,
    sort: SortSpec,
    collection: MaterializedCollection,
    publisher: Arc<watch::Sender<SubscriptionView>>,
    commands: mpsc::UnboundedReceiver<Command>,
    open_timeout: Option<Duration>,
}

impl<S> SubscriptionWorker<S>
where
    S: CollectionSource,
{
    async fn run(mut self) {
        let Some((mut mode, mut stream)) = self.connect().await else {
            return;
        };
        let mut awaiting_initial = true;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(Command::Close) => {
                        debug!(scope = %self.descriptor.scope, "listing subscription worker stopping");
                        return;
                    }
                    Some(Command::RetryPreferred) => {
                        if mode == Mode::Fallback {
                            match self.open(self.descriptor.clone()).await {
                                Opened::Stream(preferred) => {
                                    info!(scope = %self.descriptor.scope, "preferred listing query available again");
                                    stream = preferred;
                                    mode = Mode::Preferred;
                                    awaiting_initial = true;
                                }
                                Opened::Failed(err) => {
                                    debug!(error = %err, "preferred listing query still unavailable");
                                }
                                Opened::TimedOut(after) => {
                                    debug!(?after, "preferred listing query retry timed out");
                                }
                                Opened::Cancelled => return,
                            }
                        }
                    }
                },
                delivery = stream.recv() => match delivery {
                    Some(Ok(batch)) => {
                        self.apply(batch, awaiting_initial, mode);
                        awaiting_initial = false;
                    }
                    Some(Err(SourceError::IndexMissing)) if mode == Mode::Preferred => {
                        match self.degrade().await {
                            Some(fallback) => {
                                stream = fallback;
                                mode = Mode::Fallback;
                                awaiting_initial = true;
                            }
                            None => return,
                        }
                    }
                    Some(Err(err)) => {
                        let error = match mode {
                            Mode::Preferred => SubscriptionError::from(err),
                            Mode::Fallback => fallback_error(err),
                        };
                        self.fail(error);
                        return;
                    }
                    None => {
                        self.fail(SubscriptionError::Unknown("change stream ended".to_string()));
                        return;
                    }
                },
            }
        }
    }

    async fn connect(&mut self) -> Option<(Mode, ChangeStream)> {
        match self.open(self.descriptor.clone()).await {
            Opened::Stream(stream) => Some((Mode::Preferred, stream)),
            Opened::Failed(SourceError::IndexMissing) => {
                self.degrade().await.map(|stream| (Mode::Fallback, stream))
            }
            Opened::Failed(err) => {
                self.fail(err.into());
                None
            }
            Opened::TimedOut(after) => {
                self.fail(SubscriptionError::Timeout(after));
                None
            }
            Opened::Cancelled => None,
        }
    }

    async fn degrade(&mut self) -> Option<ChangeStream> {
        warn!(
            scope = %self.descriptor.scope,
            "preferred listing query needs a missing index; filtering and ordering locally"
        );
        self.publish_state(SubscriptionState::Degraded);

        match self.open(self.descriptor.unordered()).await {
            Opened::Stream(stream) => Some(stream),
            Opened::Failed(err) => {
                self.fail(fallback_error(err));
                None
            }
            Opened::TimedOut(after) => {
                self.fail(SubscriptionError::Timeout(after));
                None
            }
            Opened::Cancelled => None,
        }
    }

    /// Issues one query, racing it against the timeout and a close request.
    async fn open(&mut self, query: QueryDescriptor) -> Opened {
        let source = Arc::clone(&self.source);
        let request = source.subscribe(&query);
        tokio::pin!(request);

        let timeout = self.open_timeout;
        let deadline = async move {
            match timeout {
                Some(after) => tokio::time::sleep(after).await,
                None => future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                result = &mut request => {
                    return match result {
                        Ok(stream) => Opened::Stream(stream),
                        Err(err) => Opened::Failed(err),
                    };
                }
                _ = &mut deadline => return Opened::TimedOut(timeout.unwrap_or_default()),
                command = self.commands.recv() => match command {
                    None | Some(Command::Close) => return Opened::Cancelled,
                    Some(Command::RetryPreferred) => {}
                },
            }
        }
    }

    fn apply(&mut self, batch: ChangeBatch, replace: bool, mode: Mode) {
        let changes = batch.len();
        if replace {
            self.collection.replace(batch);
        } else {
            self.collection.merge(batch);
        }

        let listings = self.collection.ordered(&self.membership, self.sort);
        let count = listings.len();
        let state = mode.state();
        let mut previous = state;
        let published = self.publisher.send_if_modified(|view| {
            if view.is_closed() {
                return false;
            }
            previous = view.state;
            view.state = state;
            view.listings = listings;
            view.last_error = None;
            view.version += 1;
            true
        });

        if !published {
            return;
        }
        if previous != state {
            info!(scope = %self.descriptor.scope, state = state.label(), count, "listing subscription synchronized");
        } else {
            debug!(scope = %self.descriptor.scope, changes, count, "listing subscription updated");
        }
    }

    fn publish_state(&self, state: SubscriptionState) {
        self.publisher.send_if_modified(|view| {
            if view.is_closed() || view.state == state {
                return false;
            }
            view.state = state;
            view.version += 1;
            true
        });
    }

    fn fail(&self, error: SubscriptionError) {
        error!(scope = %self.descriptor.scope, error = %error, "listing subscription closed by failure");
        close_view(&self.publisher, Some(error));
    }
}

/// Entities keyed by id. Iteration follows the id, never delivery history.
#[derive(Debug, Default)]
struct MaterializedCollection {
    entries: BTreeMap<ListingId, Listing>,
}

impl MaterializedCollection {
    fn replace(&mut self, batch: ChangeBatch) {
        self.entries.clear();
        self.merge(batch);
    }

    fn merge(&mut self, batch: ChangeBatch) {
        for change in batch {
            match change.kind {
                ChangeKind::Insert | ChangeKind::Modify => {
                    self.entries.insert(change.listing.id.clone(), change.listing);
                }
                ChangeKind::Remove => {
                    self.entries.remove(&change.listing.id);
                }
            }
        }
    }

    fn ordered(&self, membership: &Membership, sort: SortSpec) -> Arc<[Listing]> {
        let mut listings: Vec<Listing> = self
            .entries
            .values()
            .filter(|listing| membership.admits(listing))
            .cloned()
            .collect();
        sort.sort(&mut listings);
        Arc::from(listings)
    }
}
