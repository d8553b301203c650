//! Loupe search client façade.
//!
//! Defines the [`SearchClient`] trait the navigator depends on, the error taxonomy
//! every failure is mapped into, an HTTP implementation for the occurrence search
//! web service and a scripted mock for tests.

#![forbid(unsafe_code)]

use std::sync::Mutex;
use std::time::{Duration, Instant};

use loupe_core::{ConfigError, LoadStatus, NavigatorConfig, SearchResponse};
use loupe_search::{FilterError, SearchRequest};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Failures surfaced to the view layer. None of them is retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum LoupeError {
    /// Backend reports no such scope/records (HTTP 404).
    #[error("not_found: {0}")]
    NotFound(String),
    /// Non-2xx status, malformed body or connection failure.
    #[error("transport: {0}")]
    Transport(String),
    #[error("timeout: {0}")]
    Timeout(String),
    /// Rejected input: unknown scope prefix, rank gap, facet not on the allow-list.
    #[error("validation: {0}")]
    Validation(String),
}

pub type LoupeResult<T> = Result<T, LoupeError>;

impl LoupeError {
    /// Terminal load status this failure puts the view in.
    pub fn load_status(&self) -> LoadStatus {
        match self {
            LoupeError::NotFound(_) => LoadStatus::Empty,
            LoupeError::Timeout(_) => LoadStatus::Timeout,
            LoupeError::Transport(_) | LoupeError::Validation(_) => LoadStatus::Error,
        }
    }

    /// Message shown in place of results.
    pub fn user_message(&self) -> &'static str {
        match self {
            LoupeError::NotFound(_) => "Nothing was found for this selection.",
            LoupeError::Transport(_) => "The image search service could not be reached or returned an error.",
            LoupeError::Timeout(_) => "The image search took too long to respond.",
            LoupeError::Validation(_) => "That filter could not be applied.",
        }
    }
}

impl From<ConfigError> for LoupeError {
    fn from(e: ConfigError) -> Self { LoupeError::Validation(e.to_string()) }
}

impl From<FilterError> for LoupeError {
    fn from(e: FilterError) -> Self { LoupeError::Validation(e.to_string()) }
}

/// Executes search requests. Implementations report timeouts as [`LoupeError::Timeout`].
#[async_trait::async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> LoupeResult<SearchResponse>;
}

// ----------------- HTTP implementation -----------------

const USER_AGENT: &str = concat!("loupe/", env!("CARGO_PKG_VERSION"));

/// Client for `GET {base_url}/occurrences/search`.
#[derive(Debug, Clone)]
pub struct HttpSearchClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSearchClient {
    pub fn new(cfg: &NavigatorConfig) -> LoupeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| LoupeError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, base_url: cfg.base_url.trim_end_matches('/').to_string() })
    }

    pub fn base_url(&self) -> &str { &self.base_url }

    pub fn url_for(&self, request: &SearchRequest) -> LoupeResult<reqwest::Url> {
        let mut url = reqwest::Url::parse(&format!("{}/occurrences/search", self.base_url))
            .map_err(|e| LoupeError::Validation(format!("invalid base url {:?}: {e}", self.base_url)))?;
        {
            let mut q = url.query_pairs_mut();
            for (k, v) in request.query_pairs() {
                q.append_pair(k, &v);
            }
        }
        Ok(url)
    }

    fn map_reqwest(e: reqwest::Error) -> LoupeError {
        if e.is_timeout() {
            LoupeError::Timeout(e.to_string())
        } else {
            LoupeError::Transport(e.to_string())
        }
    }
}

#[async_trait::async_trait]
impl SearchClient for HttpSearchClient {
    async fn search(&self, request: &SearchRequest) -> LoupeResult<SearchResponse> {
        let t0 = Instant::now();
        let url = self.url_for(request)?;
        info!(url = %url, start = request.start, "http: search start");
        let res: LoupeResult<SearchResponse> = async {
            let resp = self.client.get(url).send().await.map_err(Self::map_reqwest)?;
            let status = resp.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(LoupeError::NotFound(format!("HTTP {status}")));
            }
            if !status.is_success() {
                return Err(LoupeError::Transport(format!("HTTP {status}")));
            }
            let body = resp.bytes().await.map_err(Self::map_reqwest)?;
            SearchResponse::from_json(&body).map_err(|e| LoupeError::Transport(format!("malformed response: {e}")))
        }
        .await;
        let took_ms = t0.elapsed().as_secs_f64() * 1_000.0;
        metrics::histogram!("search_request_ms", took_ms);
        match &res {
            Ok(r) => {
                metrics::counter!("search_requests_total", 1u64, "outcome" => "ok");
                info!(total = r.total_records, records = r.records.len(), took_ms = %t0.elapsed().as_millis(), "http: search ok");
            }
            Err(e) => {
                metrics::counter!("search_requests_total", 1u64, "outcome" => e.load_status().as_str());
                warn!(error = %e, took_ms = %t0.elapsed().as_millis(), "http: search failed");
            }
        }
        res
    }
}

// ----------------- Mock implementation -----------------

type Handler = dyn Fn(&SearchRequest) -> LoupeResult<SearchResponse> + Send + Sync;
type Latency = dyn Fn(&SearchRequest) -> Duration + Send + Sync;

/// Scripted in-memory client for tests. Records every request it receives.
pub struct MockClient {
    handler: Box<Handler>,
    latency: Box<Latency>,
    seen: Mutex<Vec<SearchRequest>>,
}

impl MockClient {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&SearchRequest) -> LoupeResult<SearchResponse> + Send + Sync + 'static,
    {
        Self { handler: Box::new(handler), latency: Box::new(|_: &SearchRequest| Duration::ZERO), seen: Mutex::new(Vec::new()) }
    }

    /// Same response for every request.
    pub fn fixed(resp: SearchResponse) -> Self { Self::new(move |_| Ok(resp.clone())) }

    /// Delay each response by `f(request)` (tokio time, so paused clocks work).
    pub fn with_latency<F>(mut self, f: F) -> Self
    where
        F: Fn(&SearchRequest) -> Duration + Send + Sync + 'static,
    {
        self.latency = Box::new(f);
        self
    }

    pub fn requests(&self) -> Vec<SearchRequest> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn request_count(&self) -> usize { self.seen.lock().unwrap_or_else(|e| e.into_inner()).len() }
}

#[async_trait::async_trait]
impl SearchClient for MockClient {
    async fn search(&self, request: &SearchRequest) -> LoupeResult<SearchResponse> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).push(request.clone());
        let delay = (self.latency)(request);
        let out = (self.handler)(request);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        out
    }
}
