use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::source::{
    Change, ChangeBatch, ChangeStream, CollectionSource, Membership, QueryDescriptor, SourceError,
};
use crate::discovery::domain::{Listing, ListingId};

/// In-process listing store with live change feeds.
///
/// Listings are kept in insertion order. Refined queries are served filtered
/// and ordered, the way an indexed remote query would be; plain queries come
/// back in insertion order. Index and permission failures can be switched on
/// to exercise the degraded path.
#[derive(Debug, Default)]
pub struct MemoryCollectionSource {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    listings: Vec<Listing>,
    subscribers: Vec<Subscriber>,
    missing_indexes: bool,
    permission_denied: bool,
}

#[derive(Debug)]
struct Subscriber {
    query: QueryDescriptor,
    membership: Membership,
    sender: mpsc::UnboundedSender<Result<ChangeBatch, SourceError>>,
}

impl MemoryCollectionSource {
    pub fn new(listings: Vec<Listing>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                listings,
                ..MemoryState::default()
            }),
        }
    }

    /// Refined queries fail with `IndexMissing` while set.
    pub fn set_missing_indexes(&self, missing: bool) {
        self.lock().missing_indexes = missing;
    }

    pub fn set_permission_denied(&self, denied: bool) {
        self.lock().permission_denied = denied;
    }

    pub fn len(&self) -> usize {
        self.lock().listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().listings.is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state
            .subscribers
            .retain(|subscriber| !subscriber.sender.is_closed());
        state.subscribers.len()
    }

    /// Inserts or replaces a listing and notifies every affected feed.
    pub fn upsert(&self, listing: Listing) {
        let mut state = self.lock();
        let previous = match state
            .listings
            .iter()
            .position(|existing| existing.id == listing.id)
        {
            Some(index) => Some(std::mem::replace(
                &mut state.listings[index],
                listing.clone(),
            )),
            None => {
                state.listings.push(listing.clone());
                None
            }
        };

        state.subscribers.retain(|subscriber| {
            let was_member = previous
                .as_ref()
                .map_or(false, |old| subscriber.membership.admits(old));
            let change = match (was_member, subscriber.membership.admits(&listing)) {
                (false, true) => Change::insert(listing.clone()),
                (true, true) => Change::modify(listing.clone()),
                (true, false) => Change::remove(listing.clone()),
                (false, false) => return !subscriber.sender.is_closed(),
            };
            subscriber.sender.send(Ok(vec![change])).is_ok()
        });
    }

    pub fn remove(&self, id: &ListingId) -> Option<Listing> {
        let mut state = self.lock();
        let index = state
            .listings
            .iter()
            .position(|existing| &existing.id == id)?;
        let removed = state.listings.remove(index);

        state.subscribers.retain(|subscriber| {
            if subscriber.membership.admits(&removed) {
                subscriber
                    .sender
                    .send(Ok(vec![Change::remove(removed.clone())]))
                    .is_ok()
            } else {
                !subscriber.sender.is_closed()
            }
        });
        Some(removed)
    }

    /// Pushes an error onto every open feed whose query matches `refined`
    /// and drops those feeds, as a remote store does after a stream error.
    pub fn fail_feeds(&self, refined: bool, error: SourceError) {
        let mut state = self.lock();
        state.subscribers.retain(|subscriber| {
            if subscriber.query.is_refined() == refined {
                let _ = subscriber.sender.send(Err(error.clone()));
                false
            } else {
                true
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CollectionSource for MemoryCollectionSource {
    async fn subscribe(&self, query: &QueryDescriptor) -> Result<ChangeStream, SourceError> {
        let mut state = self.lock();
        if state.permission_denied {
            return Err(SourceError::PermissionDenied);
        }
        if state.missing_indexes && query.is_refined() {
            return Err(SourceError::IndexMissing);
        }

        let membership = query.membership();
        let mut initial: Vec<Listing> = state
            .listings
            .iter()
            .filter(|listing| membership.admits(listing))
            .cloned()
            .collect();
        if let Some(sort) = query.sort {
            sort.sort(&mut initial);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(Ok(initial.into_iter().map(Change::insert).collect()));
        state.subscribers.push(Subscriber {
            query: query.clone(),
            membership,
            sender,
        });

        Ok(receiver)
    }
}
