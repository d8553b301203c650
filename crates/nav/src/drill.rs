#![forbid(unsafe_code)]

use loupe_core::{Rank, SearchResponse};

/// Filter the navigator applies on the user's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drill {
    pub rank: Rank,
    pub filter_query: String,
}

/// A rank with a single possible value is not a choice: select it and move on.
///
/// Only first-page responses are fed here. Returns `None` when there is no current
/// rank, the facet is missing, or it holds zero or several values.
pub fn decide(current_rank: Option<Rank>, resp: &SearchResponse) -> Option<Drill> {
    let rank = current_rank?;
    let facet = resp.facet(rank.name())?;
    match facet.values.as_slice() {
        [only] => {
            let filter_query = if only.filter_query.is_empty() {
                format!("{}:\"{}\"", rank.name(), only.label)
            } else {
                only.filter_query.clone()
            };
            Some(Drill { rank, filter_query })
        }
        _ => None,
    }
}
