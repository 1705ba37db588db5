use super::domain::{Listing, ListingKind, ListingStatus};
use super::filter::FilterSpec;

/// One normalized constraint derived from a [`FilterSpec`].
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Kind(ListingKind),
    Status(ListingStatus),
    /// Lower-cased needle matched by substring containment.
    CityContains(String),
    PriceAtLeast(f64),
    PriceAtMost(f64),
    MinBedrooms(u32),
    MinBathrooms(u32),
    Furnished(bool),
    Parking(bool),
}

impl Predicate {
    pub fn matches(&self, listing: &Listing) -> bool {
        match self {
            Predicate::Kind(kind) => listing.kind == *kind,
            Predicate::Status(status) => listing.status == *status,
            Predicate::CityContains(needle) => listing.city.to_lowercase().contains(needle),
            Predicate::PriceAtLeast(min) => listing.price_or_zero() >= *min,
            Predicate::PriceAtMost(max) => listing.price_or_zero() <= *max,
            Predicate::MinBedrooms(min) => listing.bedrooms >= *min,
            Predicate::MinBathrooms(min) => listing.bathrooms >= *min,
            Predicate::Furnished(required) => listing.furnished == *required,
            Predicate::Parking(required) => listing.parking == *required,
        }
    }
}

/// Conjunction of the constraints present in a filter.
///
/// Predicates are always emitted in field order, so two filters with the same
/// constraints build equal sets regardless of how they were edited.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredicateSet {
    predicates: Vec<Predicate>,
}

impl PredicateSet {
    /// `kind_override` replaces whatever kind the user picked.
    pub fn build(spec: &FilterSpec, kind_override: Option<ListingKind>) -> Self {
        let mut predicates = Vec::new();

        if let Some(kind) = kind_override.or(spec.kind) {
            predicates.push(Predicate::Kind(kind));
        }
        if let Some(status) = spec.status {
            predicates.push(Predicate::Status(status));
        }
        if let Some(city) = spec.city.as_deref().map(str::trim) {
            if !city.is_empty() {
                predicates.push(Predicate::CityContains(city.to_lowercase()));
            }
        }
        if let Some(min) = spec.min_price {
            predicates.push(Predicate::PriceAtLeast(min));
        }
        if let Some(max) = spec.max_price {
            predicates.push(Predicate::PriceAtMost(max));
        }
        if let Some(min) = spec.min_bedrooms {
            predicates.push(Predicate::MinBedrooms(min));
        }
        if let Some(min) = spec.min_bathrooms {
            predicates.push(Predicate::MinBathrooms(min));
        }
        if let Some(required) = spec.furnished.required() {
            predicates.push(Predicate::Furnished(required));
        }
        if let Some(required) = spec.parking.required() {
            predicates.push(Predicate::Parking(required));
        }

        Self { predicates }
    }

    pub fn matches(&self, listing: &Listing) -> bool {
        self.predicates
            .iter()
            .all(|predicate| predicate.matches(listing))
    }

    pub fn as_fn(&self) -> impl Fn(&Listing) -> bool + '_ {
        move |listing: &Listing| self.matches(listing)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Predicate> {
        self.predicates.iter()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}
