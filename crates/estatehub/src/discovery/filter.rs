use serde::{Deserialize, Serialize};
use tracing::debug;

use super::domain::{ListingKind, ListingStatus};

/// Three-valued boolean constraint; `Any` places no constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriState {
    #[default]
    Any,
    Yes,
    No,
}

impl TriState {
    pub fn required(self) -> Option<bool> {
        match self {
            Self::Any => None,
            Self::Yes => Some(true),
            Self::No => Some(false),
        }
    }

    fn parse(field: &'static str, raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "any" | "all" => Self::Any,
            "true" | "yes" | "1" | "on" => Self::Yes,
            "false" | "no" | "0" | "off" => Self::No,
            other => {
                debug!(field, value = other, "ignoring unrecognised tri-state filter value");
                Self::Any
            }
        }
    }
}

/// Sparse set of user-selected constraints. Every field is optional and an
/// absent field means "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    pub kind: Option<ListingKind>,
    pub status: Option<ListingStatus>,
    pub city: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_bedrooms: Option<u32>,
    pub min_bathrooms: Option<u32>,
    pub furnished: TriState,
    pub parking: TriState,
}

impl FilterSpec {
    pub fn is_unconstrained(&self) -> bool {
        *self == Self::default()
    }

    /// Parses form input. Malformed fields fall back to "absent" rather than
    /// failing the whole filter.
    pub fn from_raw(raw: &RawFilterInput) -> Self {
        Self {
            kind: parse_field("kind", raw.kind.as_deref(), ListingKind::parse),
            status: parse_field("status", raw.status.as_deref(), ListingStatus::parse),
            city: raw
                .city
                .as_deref()
                .map(str::trim)
                .filter(|city| !city.is_empty())
                .map(str::to_string),
            min_price: parse_field("min_price", raw.min_price.as_deref(), parse_amount),
            max_price: parse_field("max_price", raw.max_price.as_deref(), parse_amount),
            min_bedrooms: parse_field("min_bedrooms", raw.min_bedrooms.as_deref(), parse_count),
            min_bathrooms: parse_field(
                "min_bathrooms",
                raw.min_bathrooms.as_deref(),
                parse_count,
            ),
            furnished: raw
                .furnished
                .as_deref()
                .map(|value| TriState::parse("furnished", value))
                .unwrap_or_default(),
            parking: raw
                .parking
                .as_deref()
                .map(|value| TriState::parse("parking", value))
                .unwrap_or_default(),
        }
    }
}

/// Filter values exactly as typed into a form or query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawFilterInput {
    pub kind: Option<String>,
    pub status: Option<String>,
    pub city: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub min_bedrooms: Option<String>,
    pub min_bathrooms: Option<String>,
    pub furnished: Option<String>,
    pub parking: Option<String>,
}

fn parse_field<T>(
    field: &'static str,
    raw: Option<&str>,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let value = raw.map(str::trim).filter(|value| !value.is_empty())?;
    let parsed = parse(value);
    if parsed.is_none() {
        debug!(field, value, "treating malformed filter value as absent");
    }
    parsed
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|amount| amount.is_finite())
}

fn parse_count(raw: &str) -> Option<u32> {
    raw.parse::<u32>().ok()
}

/// The two filter copies held by a browsing session.
///
/// Edits land on `draft`; only [`FilterSession::apply`] makes them visible to
/// queries. Each apply that changes the applied filter starts a new epoch.
#[derive(Debug, Clone, Default)]
pub struct FilterSession {
    draft: FilterSpec,
    applied: FilterSpec,
    epoch: u64,
}

impl FilterSession {
    pub fn new(initial: FilterSpec) -> Self {
        Self {
            draft: initial.clone(),
            applied: initial,
            epoch: 0,
        }
    }

    pub fn draft(&self) -> &FilterSpec {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut FilterSpec {
        &mut self.draft
    }

    pub fn applied(&self) -> &FilterSpec {
        &self.applied
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_dirty(&self) -> bool {
        self.draft != self.applied
    }

    /// Copies the whole draft over the applied filter. Returns whether the
    /// applied filter changed.
    pub fn apply(&mut self) -> bool {
        if !self.is_dirty() {
            return false;
        }
        self.applied = self.draft.clone();
        self.epoch += 1;
        true
    }

    pub fn discard_draft(&mut self) {
        self.draft = self.applied.clone();
    }

    /// Clears both copies.
    pub fn reset(&mut self) -> bool {
        self.draft = FilterSpec::default();
        self.apply()
    }
}
