//! Loupe search: canonical filter state, current-rank resolution and request building.
//!
//! [`FilterState`] is the only place filters live. Its methods are the only
//! mutators, which keeps the rank prefix property enforceable in one spot:
//! if rank *i* is filtered, every rank before *i* is filtered too.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use loupe_core::{FacetKey, Rank, Scope};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod query;

pub use query::{build_request, SearchRequest};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("cannot filter {rank} while {missing} is unset")]
    RankGap { rank: Rank, missing: Rank },
}

/// The independently toggleable filters; this is what gets persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterSet {
    categorical: BTreeMap<String, String>,
    ranks: [Option<String>; Rank::COUNT],
    first_image_only: bool,
}

impl FilterSet {
    /// Build from loose parts. Ranks after the first unset one are dropped.
    pub fn from_parts(
        categorical: BTreeMap<String, String>,
        mut ranks: [Option<String>; Rank::COUNT],
        first_image_only: bool,
    ) -> Self {
        if let Some(gap) = ranks.iter().position(Option::is_none) {
            for slot in ranks.iter_mut().skip(gap + 1) {
                if let Some(v) = slot.take() {
                    debug!(value = %v, "filters: dropping rank below a gap");
                }
            }
        }
        Self { categorical, ranks, first_image_only }
    }

    pub fn rank(&self, rank: Rank) -> Option<&str> { self.ranks[rank.index()].as_deref() }

    pub fn categorical(&self, key: &str) -> Option<&str> { self.categorical.get(key).map(String::as_str) }

    pub fn categoricals(&self) -> impl Iterator<Item = (&str, &str)> {
        self.categorical.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Set ranks in ancestor-to-descendant order.
    pub fn set_ranks(&self) -> impl Iterator<Item = (Rank, &str)> {
        Rank::ALL.into_iter().filter_map(move |r| self.rank(r).map(|v| (r, v)))
    }

    pub fn get(&self, key: &FacetKey) -> Option<&str> {
        match key {
            FacetKey::Rank(r) => self.rank(*r),
            FacetKey::Categorical(k) => self.categorical(k),
        }
    }

    pub fn first_image_only(&self) -> bool { self.first_image_only }

    /// No categorical or rank filter is set; `first_image_only` is a display toggle.
    pub fn is_clear(&self) -> bool { self.categorical.is_empty() && self.ranks.iter().all(Option::is_none) }

    /// First rank without a filter, i.e. the rank to browse next.
    pub fn current_rank(&self) -> Option<Rank> { Rank::ALL.into_iter().find(|r| self.rank(*r).is_none()) }

    fn clear_ranks_from(&mut self, index: usize) {
        for slot in self.ranks.iter_mut().skip(index) {
            *slot = None;
        }
    }
}

/// Filters plus entity scope and pagination cursor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterState {
    filters: FilterSet,
    scope: Option<Scope>,
    offset: u64,
}

impl FilterState {
    pub fn new() -> Self { Self::default() }

    pub fn with_scope(scope: Option<Scope>) -> Self { Self { scope, ..Self::default() } }

    pub fn filters(&self) -> &FilterSet { &self.filters }
    pub fn scope(&self) -> Option<&Scope> { self.scope.as_ref() }
    pub fn offset(&self) -> u64 { self.offset }
    pub fn current_rank(&self) -> Option<Rank> { self.filters.current_rank() }

    /// Set a filter. A rank cascade-clears every rank below it; setting a rank
    /// whose ancestor is unset is refused. Always asks for a refetch.
    pub fn apply_filter(&mut self, key: &FacetKey, filter_query: impl Into<String>) -> Result<bool, FilterError> {
        match key {
            FacetKey::Rank(rank) => {
                if let Some(missing) = Rank::ALL[..rank.index()].iter().copied().find(|r| self.filters.rank(*r).is_none()) {
                    return Err(FilterError::RankGap { rank: *rank, missing });
                }
                self.filters.clear_ranks_from(rank.index() + 1);
                self.filters.ranks[rank.index()] = Some(filter_query.into());
            }
            FacetKey::Categorical(k) => {
                self.filters.categorical.insert(k.clone(), filter_query.into());
            }
        }
        self.offset = 0;
        Ok(true)
    }

    /// Unset a filter; a rank takes all its descendants with it.
    pub fn clear_filter(&mut self, key: &FacetKey) -> bool {
        match key {
            FacetKey::Rank(rank) => self.filters.clear_ranks_from(rank.index()),
            FacetKey::Categorical(k) => {
                self.filters.categorical.remove(k);
            }
        }
        self.offset = 0;
        true
    }

    /// Unset every categorical and rank filter. Returns false (no refetch) when already clear.
    pub fn clear_all_filters(&mut self) -> bool {
        if self.filters.is_clear() {
            return false;
        }
        self.filters.categorical.clear();
        self.filters.clear_ranks_from(0);
        self.offset = 0;
        true
    }

    /// Drill up to `rank`: unset everything strictly below it.
    pub fn remove_ranks_below(&mut self, rank: Rank) -> bool {
        self.filters.clear_ranks_from(rank.index() + 1);
        self.offset = 0;
        true
    }

    pub fn advance_page(&mut self, page_size: u64) { self.offset = self.offset.saturating_add(page_size); }

    /// Undo an `advance_page` whose request failed.
    pub fn rewind_page(&mut self, page_size: u64) { self.offset = self.offset.saturating_sub(page_size); }

    /// New scope means a fresh state.
    pub fn set_entity_scope(&mut self, scope: Option<Scope>) -> bool {
        *self = Self::with_scope(scope);
        true
    }

    pub fn set_first_image_only(&mut self, flag: bool) -> bool {
        if self.filters.first_image_only == flag {
            return false;
        }
        self.filters.first_image_only = flag;
        self.offset = 0;
        true
    }

    /// Replace the filters with an externally supplied selection (history navigation).
    pub fn restore(&mut self, filters: FilterSet) -> bool {
        if self.filters == filters {
            return false;
        }
        self.filters = filters;
        self.offset = 0;
        true
    }
}
