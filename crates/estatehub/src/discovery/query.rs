use serde::{Deserialize, Serialize};

use super::domain::{Listing, ListingKind};
use super::filter::{FilterSession, FilterSpec};
use super::predicate::PredicateSet;
use super::sort::SortSpec;

pub const DEFAULT_PAGE_SIZE: usize = 12;

/// The view a query runs on behalf of. Views other than `All` pin the
/// listing kind no matter what the user selected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryContext {
    #[default]
    All,
    RentalsOnly,
    ForSale,
    Wanted,
}

impl QueryContext {
    pub const fn forced_kind(self) -> Option<ListingKind> {
        match self {
            Self::All => None,
            Self::RentalsOnly => Some(ListingKind::Rent),
            Self::ForSale => Some(ListingKind::Sale),
            Self::Wanted => Some(ListingKind::Wanted),
        }
    }
}

/// Pagination cursor expressed as "how many items are visible".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageWindow {
    pub page_size: usize,
    pub shown: usize,
}

impl PageWindow {
    pub fn first_page(page_size: usize) -> Self {
        let page_size = page_size.max(1);
        Self {
            page_size,
            shown: page_size,
        }
    }

    pub fn extended(self) -> Self {
        Self {
            page_size: self.page_size,
            shown: self.shown.saturating_add(self.page_size),
        }
    }
}

impl Default for PageWindow {
    fn default() -> Self {
        Self::first_page(DEFAULT_PAGE_SIZE)
    }
}

/// Complete input to a single query run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryRequest {
    pub context: QueryContext,
    pub search: Option<String>,
    pub filter: FilterSpec,
    pub sort: SortSpec,
    pub window: PageWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub items: Vec<Listing>,
    pub has_more: bool,
    pub total_matches: usize,
    pub shown: usize,
}

/// Steps one to four of the pipeline: context kind, free-text search,
/// filter predicates, then the listing sort. The collection is never mutated.
pub fn matching_listings(collection: &[Listing], request: &QueryRequest) -> Vec<Listing> {
    let forced_kind = request.context.forced_kind();
    let needle = request
        .search
        .as_deref()
        .map(str::trim)
        .filter(|needle| !needle.is_empty())
        .map(str::to_lowercase);
    let predicates = PredicateSet::build(&request.filter, forced_kind);

    let mut matches: Vec<Listing> = collection
        .iter()
        .filter(|listing| forced_kind.map_or(true, |kind| listing.kind == kind))
        .filter(|listing| {
            needle
                .as_deref()
                .map_or(true, |needle| matches_search(listing, needle))
        })
        .filter(|listing| predicates.matches(listing))
        .cloned()
        .collect();

    request.sort.sort(&mut matches);
    matches
}

/// Runs the full pipeline and slices the result to the visible window.
pub fn run_query(collection: &[Listing], request: &QueryRequest) -> QueryResult {
    let mut matches = matching_listings(collection, request);
    let total_matches = matches.len();
    let shown = request.window.shown;
    matches.truncate(shown);

    QueryResult {
        items: matches,
        has_more: total_matches > shown,
        total_matches,
        shown,
    }
}

fn matches_search(listing: &Listing, needle: &str) -> bool {
    [&listing.title, &listing.description, &listing.city]
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
}

/// Per-visitor browsing state layered over the pure query functions.
///
/// Changing the applied filter, the sort, or the search text starts a new
/// epoch and rewinds the window to the first page.
#[derive(Debug, Clone)]
pub struct DiscoverySession {
    context: QueryContext,
    filters: FilterSession,
    sort: SortSpec,
    search: Option<String>,
    window: PageWindow,
}

impl DiscoverySession {
    pub fn new(context: QueryContext, page_size: usize) -> Self {
        Self {
            context,
            filters: FilterSession::default(),
            sort: SortSpec::default(),
            search: None,
            window: PageWindow::first_page(page_size),
        }
    }

    pub fn context(&self) -> QueryContext {
        self.context
    }

    pub fn filters(&self) -> &FilterSession {
        &self.filters
    }

    pub fn draft_mut(&mut self) -> &mut FilterSpec {
        self.filters.draft_mut()
    }

    pub fn window(&self) -> PageWindow {
        self.window
    }

    pub fn sort(&self) -> SortSpec {
        self.sort
    }

    pub fn apply_filters(&mut self) -> bool {
        let changed = self.filters.apply();
        if changed {
            self.rewind();
        }
        changed
    }

    pub fn reset_filters(&mut self) -> bool {
        let changed = self.filters.reset();
        if changed {
            self.rewind();
        }
        changed
    }

    pub fn set_sort(&mut self, sort: SortSpec) {
        if self.sort != sort {
            self.sort = sort;
            self.rewind();
        }
    }

    pub fn set_search(&mut self, search: Option<String>) {
        let search = search
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        if self.search != search {
            self.search = search;
            self.rewind();
        }
    }

    pub fn request(&self) -> QueryRequest {
        QueryRequest {
            context: self.context,
            search: self.search.clone(),
            filter: self.filters.applied().clone(),
            sort: self.sort,
            window: self.window,
        }
    }

    pub fn query(&self, collection: &[Listing]) -> QueryResult {
        run_query(collection, &self.request())
    }

    /// Re-runs the pipeline against the latest snapshot and grows the window
    /// by one page when more matches exist. Once every match is shown the
    /// window stays put, so a later load after the collection grows reveals
    /// at most one new page. The window never shrinks.
    pub fn load_more(&mut self, collection: &[Listing]) -> QueryResult {
        let total = matching_listings(collection, &self.request()).len();
        if total > self.window.shown {
            self.window = self.window.extended();
        }
        self.query(collection)
    }

    fn rewind(&mut self) {
        self.window = PageWindow::first_page(self.window.page_size);
    }
}
