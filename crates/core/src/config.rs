//! Navigator configuration: backend endpoint, paging, facet allow-list and
//! the scope-id prefix table.
//!
//! Values are passed explicitly to the navigator. [`NavigatorConfig::from_env`]
//! overlays `LOUPE_*` environment variables on the defaults for binaries.

#![forbid(unsafe_code)]

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Rank;

/// Entity kinds a browsing session can be scoped to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ScopeKind {
    Collection,
    DataResource,
    Institution,
}

impl ScopeKind {
    /// Backend field the scope id is matched against.
    pub fn filter_key(self) -> &'static str {
        match self {
            ScopeKind::Collection => "collectionUid",
            ScopeKind::DataResource => "dataResourceUid",
            ScopeKind::Institution => "institutionUid",
        }
    }
}

/// A resolved entity scope, e.g. `co123` -> collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub id: String,
    pub kind: ScopeKind,
}

impl Scope {
    pub fn filter_query(&self) -> String { format!("{}:{}", self.kind.filter_key(), self.id) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown scope prefix for id {0:?}")]
    UnknownScope(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigatorConfig {
    /// Base of the occurrence web service, without trailing slash.
    pub base_url: String,
    /// Fixed media/availability predicate sent as `q`.
    pub base_query: String,
    pub page_size: u64,
    /// Categorical facets requested with every first page, in request order.
    pub categorical_facets: Vec<String>,
    /// Scope-id prefixes (1-2 chars); longest match wins.
    pub scope_prefixes: Vec<(String, ScopeKind)>,
    pub request_timeout: Duration,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://biocache-ws.ala.org.au/ws".to_string(),
            base_query: "multimedia:Image".to_string(),
            page_size: 100,
            categorical_facets: vec!["typeStatus".to_string(), "raw_sex".to_string()],
            scope_prefixes: vec![
                ("co".to_string(), ScopeKind::Collection),
                ("dr".to_string(), ScopeKind::DataResource),
                ("in".to_string(), ScopeKind::Institution),
            ],
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl NavigatorConfig {
    pub fn from_env() -> Self { Self::from_vars(|k| std::env::var(k).ok()) }

    /// Overlay `LOUPE_*` values from `get` on the defaults; invalid values are ignored.
    pub fn from_vars<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = get("LOUPE_BASE_URL") {
            cfg.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("LOUPE_BASE_QUERY") {
            cfg.base_query = v;
        }
        if let Some(v) = get("LOUPE_PAGE_SIZE") {
            match v.parse::<u64>() {
                Ok(n) if n > 0 => cfg.page_size = n,
                _ => warn!(value = %v, "invalid LOUPE_PAGE_SIZE; keeping default"),
            }
        }
        if let Some(v) = get("LOUPE_FACETS") {
            cfg.categorical_facets = parse_facet_list(&v);
        }
        if let Some(v) = get("LOUPE_TIMEOUT_SECS") {
            match v.parse::<u64>() {
                Ok(n) if n > 0 => cfg.request_timeout = Duration::from_secs(n),
                _ => warn!(value = %v, "invalid LOUPE_TIMEOUT_SECS; keeping default"),
            }
        }
        cfg
    }

    /// Map a scope id to its kind via the prefix table.
    pub fn resolve_scope(&self, id: &str) -> Result<Scope, ConfigError> {
        self.scope_prefixes
            .iter()
            .filter(|(p, _)| !p.is_empty() && id.len() > p.len() && id.starts_with(p.as_str()))
            .max_by_key(|(p, _)| p.len())
            .map(|(_, kind)| Scope { id: id.to_string(), kind: *kind })
            .ok_or_else(|| ConfigError::UnknownScope(id.to_string()))
    }

    pub fn is_categorical(&self, key: &str) -> bool { self.categorical_facets.iter().any(|k| k == key) }
}

/// Comma-separated categorical facet names. Blanks, rank names and repeats are dropped;
/// ranks are always faceted through the rank chain.
pub fn parse_facet_list(s: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in s.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if Rank::from_name(name).is_some() {
            warn!(facet = name, "rank names are not categorical facets; ignored");
        } else if !out.iter().any(|k| k == name) {
            out.push(name.to_string());
        }
    }
    out
}
