use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::discovery::domain::{Listing, ListingKind};
use crate::discovery::filter::FilterSpec;
use crate::discovery::predicate::PredicateSet;
use crate::discovery::sort::SortSpec;

/// Failures reported by the remote store, either when a query is opened or
/// later on its change stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("query requires an index that does not exist")]
    IndexMissing,
    #[error("{0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Modify,
    Remove,
}

/// One document change as delivered by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub kind: ChangeKind,
    pub listing: Listing,
}

impl Change {
    pub fn insert(listing: Listing) -> Self {
        Self {
            kind: ChangeKind::Insert,
            listing,
        }
    }

    pub fn modify(listing: Listing) -> Self {
        Self {
            kind: ChangeKind::Modify,
            listing,
        }
    }

    pub fn remove(listing: Listing) -> Self {
        Self {
            kind: ChangeKind::Remove,
            listing,
        }
    }
}

/// Changes delivered together in one remote snapshot. The first batch on a
/// stream carries the complete current contents of the query.
pub type ChangeBatch = Vec<Change>;

pub type ChangeStream = mpsc::UnboundedReceiver<Result<ChangeBatch, SourceError>>;

/// What to ask the remote store for.
///
/// `scope` names the collection and `owner` optionally narrows it to one
/// owner's listings; both are cheap equality constraints any store can serve.
/// `filter`, `kind` and `sort` are the server-side refinements that may need
/// a composite index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub scope: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub filter: FilterSpec,
    #[serde(default)]
    pub kind: Option<ListingKind>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
}

impl QueryDescriptor {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ..Self::default()
        }
    }

    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_filter(mut self, filter: FilterSpec) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_kind(mut self, kind: ListingKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn ordered_by(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Same scope with every server-side refinement stripped.
    pub fn unordered(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            owner: self.owner.clone(),
            ..Self::default()
        }
    }

    /// Whether the store has to filter or order beyond the plain scope.
    pub fn is_refined(&self) -> bool {
        self.kind.is_some() || self.sort.is_some() || !self.filter.is_unconstrained()
    }

    /// Membership test for the full logical query, evaluated locally.
    pub fn membership(&self) -> Membership {
        Membership {
            owner: self.owner.clone(),
            predicates: PredicateSet::build(&self.filter, self.kind),
        }
    }

    pub fn effective_sort(&self) -> SortSpec {
        self.sort.unwrap_or_default()
    }
}

/// Precomputed scope, owner and refinement checks for one descriptor.
#[derive(Debug, Clone)]
pub struct Membership {
    owner: Option<String>,
    predicates: PredicateSet,
}

impl Membership {
    pub fn admits(&self, listing: &Listing) -> bool {
        self.owner
            .as_deref()
            .map_or(true, |owner| listing.owner_id == owner)
            && self.predicates.matches(listing)
    }
}

/// Live query boundary of the remote document store.
#[async_trait]
pub trait CollectionSource: Send + Sync {
    /// Opens a change stream for `query`. Failures may be reported here or
    /// later as an `Err` item on the stream.
    async fn subscribe(&self, query: &QueryDescriptor) -> Result<ChangeStream, SourceError>;
}
