//! Loupe core types: taxonomic ranks, facet values, search records and load status.
//!
//! Everything here is plain data shared by the query, store, persist and navigator
//! crates. The backend's JSON shape is decoded in [`SearchResponse::from_json`].

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod config;

pub use config::{ConfigError, NavigatorConfig, Scope, ScopeKind};

/// One level of the fixed taxonomic hierarchy, ancestor first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl Rank {
    pub const ALL: [Rank; 7] = [
        Rank::Kingdom,
        Rank::Phylum,
        Rank::Class,
        Rank::Order,
        Rank::Family,
        Rank::Genus,
        Rank::Species,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize { self as usize }

    pub fn from_index(i: usize) -> Option<Self> { Self::ALL.get(i).copied() }

    /// Backend field name, also used as the persisted slot name.
    pub fn name(self) -> &'static str {
        match self {
            Rank::Kingdom => "kingdom",
            Rank::Phylum => "phylum",
            Rank::Class => "class",
            Rank::Order => "order",
            Rank::Family => "family",
            Rank::Genus => "genus",
            Rank::Species => "species",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> { Self::ALL.iter().copied().find(|r| r.name() == s) }

    /// Next rank towards the leaves; `None` for species.
    pub fn next(self) -> Option<Self> { Self::from_index(self.index() + 1) }

    /// Ranks strictly below `self`.
    pub fn descendants(self) -> impl Iterator<Item = Rank> {
        Self::ALL.into_iter().skip(self.index() + 1)
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown rank: {0}")]
pub struct UnknownRank(pub String);

impl FromStr for Rank {
    type Err = UnknownRank;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| UnknownRank(s.to_string()))
    }
}

/// Key of a filterable facet: a taxonomic rank or an independent categorical field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FacetKey {
    Rank(Rank),
    Categorical(String),
}

impl FacetKey {
    /// Rank names map to [`FacetKey::Rank`]; anything else is categorical.
    pub fn parse(s: &str) -> Self {
        match Rank::from_name(s) {
            Some(r) => FacetKey::Rank(r),
            None => FacetKey::Categorical(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FacetKey::Rank(r) => r.name(),
            FacetKey::Categorical(k) => k.as_str(),
        }
    }
}

impl From<Rank> for FacetKey {
    fn from(r: Rank) -> Self { FacetKey::Rank(r) }
}

impl fmt::Display for FacetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// One bucket of a backend-computed facet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetValue {
    pub label: String,
    pub count: u64,
    /// Opaque filter query that selects this bucket, e.g. `family:"Felidae"`.
    pub filter_query: String,
    pub facet_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FacetResult {
    pub facet_key: String,
    pub values: Vec<FacetValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub image_id: String,
    #[serde(default)]
    pub thumb_width: u32,
    #[serde(default)]
    pub thumb_height: u32,
    #[serde(default)]
    pub rights_holder: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub thumb_url: String,
}

/// A search hit as returned by the backend; may own several images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub uuid: String,
    #[serde(default)]
    pub scientific_name: String,
    #[serde(default)]
    pub vernacular_name: Option<String>,
    #[serde(default)]
    pub type_status: Option<String>,
    #[serde(default, rename = "imageMetadata")]
    pub images: Vec<ImageMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SearchResponse {
    pub total_records: u64,
    pub facet_results: Vec<FacetResult>,
    pub records: Vec<RawRecord>,
}

// Wire shapes of the occurrence search endpoint.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    total_records: u64,
    #[serde(default)]
    facet_results: Vec<WireFacet>,
    #[serde(default)]
    occurrences: Vec<RawRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFacet {
    field_name: String,
    #[serde(default)]
    field_result: Vec<WireFacetValue>,
}

#[derive(Deserialize)]
struct WireFacetValue {
    #[serde(default)]
    label: String,
    #[serde(default)]
    count: u64,
    #[serde(default)]
    fq: String,
}

impl SearchResponse {
    /// Decode the backend JSON body.
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        let wire: WireResponse = serde_json::from_slice(bytes)?;
        let facet_results = wire
            .facet_results
            .into_iter()
            .map(|f| {
                let values = f
                    .field_result
                    .into_iter()
                    .map(|v| FacetValue { label: v.label, count: v.count, filter_query: v.fq, facet_key: f.field_name.clone() })
                    .collect();
                FacetResult { facet_key: f.field_name, values }
            })
            .collect();
        Ok(Self { total_records: wire.total_records, facet_results, records: wire.occurrences })
    }

    pub fn facet(&self, key: &str) -> Option<&FacetResult> {
        self.facet_results.iter().find(|f| f.facet_key == key)
    }

    pub fn image_count(&self) -> usize { self.records.iter().map(|r| r.images.len()).sum() }
}

/// A flattened (record, image) pair shown as one tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub record_uuid: String,
    pub scientific_name: String,
    pub vernacular_name: Option<String>,
    pub type_status: Option<String>,
    pub image_id: String,
    /// Position of the image within its record (0 = first).
    pub image_index: usize,
    pub thumb_width: u32,
    pub thumb_height: u32,
    pub rights_holder: Option<String>,
    pub license: Option<String>,
    pub thumb_url: String,
}

impl ImageRecord {
    pub fn new(record: &RawRecord, image: &ImageMetadata, image_index: usize) -> Self {
        Self {
            record_uuid: record.uuid.clone(),
            scientific_name: record.scientific_name.clone(),
            vernacular_name: record.vernacular_name.clone(),
            type_status: record.type_status.clone(),
            image_id: image.image_id.clone(),
            image_index,
            thumb_width: image.thumb_width,
            thumb_height: image.thumb_height,
            rights_holder: image.rights_holder.clone(),
            license: image.license.clone(),
            thumb_url: image.thumb_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    #[default]
    Idle,
    Loading,
    Done,
    Empty,
    Error,
    Timeout,
}

impl LoadStatus {
    /// Outcome states hold until the next trigger.
    pub fn is_terminal(self) -> bool {
        matches!(self, LoadStatus::Done | LoadStatus::Empty | LoadStatus::Error | LoadStatus::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoadStatus::Idle => "idle",
            LoadStatus::Loading => "loading",
            LoadStatus::Done => "done",
            LoadStatus::Empty => "empty",
            LoadStatus::Error => "error",
            LoadStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Human label for a filter query: `family:"Felidae"` -> `Felidae`.
pub fn filter_label(filter_query: &str) -> &str {
    let value = match filter_query.split_once(':') {
        Some((_, v)) => v,
        None => filter_query,
    };
    value.trim_matches('"')
}

pub mod prelude {
    pub use super::{
        FacetKey, FacetResult, FacetValue, ImageMetadata, ImageRecord, LoadStatus, NavigatorConfig, Rank,
        RawRecord, Scope, ScopeKind, SearchResponse,
    };
}
