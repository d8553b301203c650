#![forbid(unsafe_code)]

use loupe_core::{filter_label, FacetResult, FacetValue, ImageRecord, LoadStatus, Rank};
use loupe_search::FilterState;
use loupe_store::ResultAccumulator;
use serde::Serialize;
use smallvec::SmallVec;

/// One selected rank in the trail above the active rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breadcrumb {
    pub rank: Rank,
    pub label: String,
    pub filter_query: String,
}

/// Everything a renderer needs; derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigatorView {
    pub cumulative_images: Vec<ImageRecord>,
    pub active_rank: Option<Rank>,
    pub active_rank_values: Vec<FacetValue>,
    pub breadcrumbs: SmallVec<[Breadcrumb; Rank::COUNT]>,
    pub categorical_facets: Vec<FacetResult>,
    pub load_status: LoadStatus,
    pub total_records: u64,
    pub failure: Option<String>,
    pub has_more: bool,
}

impl NavigatorView {
    pub fn build(state: &FilterState, acc: &ResultAccumulator) -> Self {
        let breadcrumbs = state
            .filters()
            .set_ranks()
            .map(|(rank, fq)| Breadcrumb { rank, label: filter_label(fq).to_string(), filter_query: fq.to_string() })
            .collect();
        Self {
            cumulative_images: acc.images().to_vec(),
            active_rank: state.current_rank(),
            active_rank_values: acc.rank_values().map(|f| f.values.clone()).unwrap_or_default(),
            breadcrumbs,
            categorical_facets: acc.categorical_facets().to_vec(),
            load_status: acc.status(),
            total_records: acc.total_records(),
            failure: acc.failure().map(str::to_string),
            has_more: acc.has_more(),
        }
    }
}
