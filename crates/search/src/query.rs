#![forbid(unsafe_code)]

use loupe_core::NavigatorConfig;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::FilterState;

/// One occurrence-search request, independent of transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub q: String,
    /// Filter-query terms, ANDed by the backend. Scope first, then categorical, then ranks.
    pub fq: SmallVec<[String; 8]>,
    /// Facets to count; only present on first-page requests.
    pub facets: Option<Vec<String>>,
    pub page_size: u64,
    pub start: u64,
}

impl SearchRequest {
    pub fn is_first_page(&self) -> bool { self.start == 0 }

    pub fn facets_param(&self) -> Option<String> { self.facets.as_ref().map(|f| f.join(",")) }

    /// Ordered query parameters; `fq` repeats once per term.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::with_capacity(self.fq.len() + 4);
        out.push(("q", self.q.clone()));
        for term in self.fq.iter() {
            out.push(("fq", term.clone()));
        }
        if let Some(facets) = self.facets_param() {
            out.push(("facets", facets));
        }
        out.push(("pageSize", self.page_size.to_string()));
        out.push(("start", self.start.to_string()));
        out
    }

    pub fn query_string(&self) -> String {
        let mut ser = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in self.query_pairs() {
            ser.append_pair(k, &v);
        }
        ser.finish()
    }

    pub fn to_url(&self, base_url: &str) -> String {
        format!("{}/occurrences/search?{}", base_url.trim_end_matches('/'), self.query_string())
    }
}

/// Turn the current state into a request. Facet counts (categorical allow-list plus
/// the current rank) are only asked for on the first page so that "show more"
/// never disturbs the navigation panel.
pub fn build_request(state: &FilterState, cfg: &NavigatorConfig) -> SearchRequest {
    let filters = state.filters();
    let mut fq: SmallVec<[String; 8]> = SmallVec::new();
    if let Some(scope) = state.scope() {
        fq.push(scope.filter_query());
    }
    fq.extend(filters.categoricals().map(|(_, v)| v.to_string()));
    fq.extend(filters.set_ranks().map(|(_, v)| v.to_string()));

    let facets = (state.offset() == 0).then(|| {
        let mut f = cfg.categorical_facets.clone();
        if let Some(rank) = filters.current_rank() {
            f.push(rank.name().to_string());
        }
        f
    });

    SearchRequest { q: cfg.base_query.clone(), fq, facets, page_size: cfg.page_size, start: state.offset() }
}
