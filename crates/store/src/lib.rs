//! Loupe store: the cumulative image list and facet views built from paginated responses.
//!
//! The first page replaces everything; later pages only append images. Facets and the
//! total are owned by the first page so "show more" never changes the navigation panel.

#![forbid(unsafe_code)]

use loupe_core::{FacetResult, ImageRecord, LoadStatus, Rank, RawRecord, SearchResponse};
use serde::Serialize;
use tracing::debug;

/// Flatten records into image tiles. The first image of each record is always
/// kept; later ones only when `first_image_only` is off.
pub fn flatten(records: &[RawRecord], first_image_only: bool) -> Vec<ImageRecord> {
    let mut out = Vec::with_capacity(records.len());
    for rec in records {
        for (i, img) in rec.images.iter().enumerate() {
            if i > 0 && first_image_only {
                break;
            }
            out.push(ImageRecord::new(rec, img, i));
        }
    }
    out
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultAccumulator {
    epoch: u64,
    images: Vec<ImageRecord>,
    total_records: u64,
    records_loaded: u64,
    categorical: Vec<FacetResult>,
    rank_values: Option<FacetResult>,
    status: LoadStatus,
    failure: Option<String>,
}

impl ResultAccumulator {
    pub fn new() -> Self { Self::default() }

    /// Drop results and facet views. Runs before any filter/scope driven request
    /// so results of the old filter never mix with the new one.
    pub fn reset(&mut self) {
        self.images.clear();
        self.total_records = 0;
        self.records_loaded = 0;
        self.categorical.clear();
        self.rank_values = None;
        self.failure = None;
        self.bump();
    }

    /// Mark a request as outstanding.
    pub fn begin(&mut self) {
        self.status = LoadStatus::Loading;
        self.failure = None;
        self.bump();
    }

    /// Apply a first-page response: replace images, capture total and facets.
    pub fn apply_first_page(
        &mut self,
        resp: &SearchResponse,
        current_rank: Option<Rank>,
        allow_list: &[String],
        first_image_only: bool,
    ) {
        self.images = flatten(&resp.records, first_image_only);
        self.total_records = resp.total_records;
        self.records_loaded = resp.records.len() as u64;
        self.categorical = allow_list.iter().filter_map(|k| resp.facet(k).cloned()).collect();
        self.rank_values = current_rank.and_then(|r| resp.facet(r.name()).cloned());
        self.status = if resp.records.is_empty() { LoadStatus::Empty } else { LoadStatus::Done };
        self.failure = None;
        debug!(images = self.images.len(), total = self.total_records, status = %self.status, "store: first page applied");
        self.bump();
    }

    /// Append a later page. Facets and total stay as the first page left them.
    pub fn apply_next_page(&mut self, resp: &SearchResponse, first_image_only: bool) {
        let mut more = flatten(&resp.records, first_image_only);
        let added = more.len();
        self.images.append(&mut more);
        self.records_loaded += resp.records.len() as u64;
        self.status = LoadStatus::Done;
        self.failure = None;
        debug!(added, images = self.images.len(), "store: page appended");
        self.bump();
    }

    /// Record a failed request; `status` is one of the terminal failure states.
    pub fn fail(&mut self, status: LoadStatus, message: impl Into<String>) {
        self.status = status;
        self.failure = Some(message.into());
        self.bump();
    }

    pub fn epoch(&self) -> u64 { self.epoch }
    pub fn images(&self) -> &[ImageRecord] { &self.images }
    pub fn total_records(&self) -> u64 { self.total_records }
    pub fn records_loaded(&self) -> u64 { self.records_loaded }
    pub fn categorical_facets(&self) -> &[FacetResult] { &self.categorical }
    pub fn rank_values(&self) -> Option<&FacetResult> { self.rank_values.as_ref() }
    pub fn status(&self) -> LoadStatus { self.status }
    pub fn failure(&self) -> Option<&str> { self.failure.as_deref() }

    /// More records exist beyond those loaded.
    pub fn has_more(&self) -> bool { self.records_loaded < self.total_records }

    fn bump(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        metrics::gauge!("accumulator_images", self.images.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loupe_core::{FacetValue, ImageMetadata};

    fn img(id: &str) -> ImageMetadata {
        ImageMetadata { image_id: id.to_string(), thumb_url: format!("https://img/{}", id), ..Default::default() }
    }

    fn rec(uuid: &str, images: &[&str]) -> RawRecord {
        RawRecord {
            uuid: uuid.to_string(),
            scientific_name: "Felis catus".to_string(),
            images: images.iter().map(|i| img(i)).collect(),
            ..Default::default()
        }
    }

    fn facet(key: &str, labels: &[&str]) -> FacetResult {
        FacetResult {
            facet_key: key.to_string(),
            values: labels
                .iter()
                .map(|l| FacetValue { label: l.to_string(), count: 1, filter_query: format!("{}:\"{}\"", key, l), facet_key: key.to_string() })
                .collect(),
        }
    }

    fn allow() -> Vec<String> { vec!["typeStatus".to_string(), "raw_sex".to_string()] }

    #[test]
    fn flatten_respects_first_image_only() {
        let recs = vec![rec("r1", &["a", "b", "c"])];
        assert_eq!(flatten(&recs, true).len(), 1);
        let all = flatten(&recs, false);
        assert_eq!(all.len(), 3);
        assert_eq!(all.iter().map(|i| i.image_index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(all[2].image_id, "c");
        assert!(flatten(&[rec("r2", &[])], false).is_empty());
    }

    #[test]
    fn first_page_replaces_and_captures_facets() {
        let mut acc = ResultAccumulator::new();
        acc.begin();
        assert_eq!(acc.status(), LoadStatus::Loading);
        let resp = SearchResponse {
            total_records: 250,
            facet_results: vec![facet("raw_sex", &["female", "male"]), facet("phylum", &["Chordata", "Arthropoda"]), facet("basisOfRecord", &["x"])],
            records: vec![rec("r1", &["a", "b"]), rec("r2", &["c"])],
        };
        acc.apply_first_page(&resp, Some(Rank::Phylum), &allow(), false);
        assert_eq!(acc.status(), LoadStatus::Done);
        assert_eq!(acc.images().len(), 3);
        assert_eq!(acc.total_records(), 250);
        assert_eq!(acc.categorical_facets().len(), 1);
        assert_eq!(acc.categorical_facets()[0].facet_key, "raw_sex");
        assert_eq!(acc.rank_values().unwrap().values.len(), 2);
        assert!(acc.has_more());

        // a second first page replaces rather than appends
        acc.apply_first_page(&resp, Some(Rank::Phylum), &allow(), true);
        assert_eq!(acc.images().len(), 2);
    }

    #[test]
    fn next_page_appends_without_touching_facets() {
        let mut acc = ResultAccumulator::new();
        let first = SearchResponse {
            total_records: 3,
            facet_results: vec![facet("typeStatus", &["holotype"])],
            records: vec![rec("r1", &["a"]), rec("r2", &["b"])],
        };
        acc.apply_first_page(&first, Some(Rank::Kingdom), &allow(), false);
        let facets_before = acc.categorical_facets().to_vec();
        let next = SearchResponse {
            total_records: 999,
            facet_results: vec![facet("typeStatus", &["paratype", "syntype"])],
            records: vec![rec("r3", &["c"])],
        };
        acc.apply_next_page(&next, false);
        let ids: Vec<&str> = acc.images().iter().map(|i| i.image_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(acc.total_records(), 3);
        assert_eq!(acc.categorical_facets(), facets_before.as_slice());
        assert!(!acc.has_more());
    }

    #[test]
    fn zero_records_is_empty() {
        let mut acc = ResultAccumulator::new();
        acc.apply_first_page(&SearchResponse::default(), Some(Rank::Kingdom), &allow(), false);
        assert_eq!(acc.status(), LoadStatus::Empty);
        assert!(acc.failure().is_none());
    }

    #[test]
    fn reset_and_fail() {
        let mut acc = ResultAccumulator::new();
        let resp = SearchResponse { total_records: 1, facet_results: vec![facet("raw_sex", &["female"])], records: vec![rec("r1", &["a"])] };
        acc.apply_first_page(&resp, None, &allow(), false);
        let e0 = acc.epoch();
        acc.reset();
        assert!(acc.epoch() > e0);
        assert!(acc.images().is_empty());
        assert!(acc.categorical_facets().is_empty());
        assert_eq!(acc.total_records(), 0);
        acc.begin();
        acc.fail(LoadStatus::Timeout, "timed out");
        assert_eq!(acc.status(), LoadStatus::Timeout);
        assert_eq!(acc.failure(), Some("timed out"));
        acc.begin();
        assert!(acc.failure().is_none());
    }

    #[test]
    fn serializes_for_inspection() {
        let acc = ResultAccumulator::new();
        let v = serde_json::to_value(&acc).unwrap();
        assert_eq!(v["status"], "idle");
    }
}
