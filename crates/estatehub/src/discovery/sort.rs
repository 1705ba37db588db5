use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::domain::Listing;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    CreatedAt,
    Price,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

/// Requested result order. Defaults to newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl SortSpec {
    pub const fn new(key: SortKey, direction: SortDirection) -> Self {
        Self { key, direction }
    }

    pub const fn newest_first() -> Self {
        Self::new(SortKey::CreatedAt, SortDirection::Descending)
    }

    pub const fn cheapest_first() -> Self {
        Self::new(SortKey::Price, SortDirection::Ascending)
    }

    /// Total order over listings for this key and direction. Listings that
    /// tie on the key are ordered by ascending id in both directions.
    pub fn comparator(self) -> impl Fn(&Listing, &Listing) -> Ordering + Copy {
        move |left: &Listing, right: &Listing| {
            let ordering = match self.key {
                SortKey::CreatedAt => left.created_or_oldest().cmp(&right.created_or_oldest()),
                SortKey::Price => left.price_or_zero().total_cmp(&right.price_or_zero()),
            };
            let ordering = match self.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            ordering.then_with(|| left.id.cmp(&right.id))
        }
    }

    pub fn sort(self, listings: &mut [Listing]) {
        listings.sort_by(self.comparator());
    }
}
