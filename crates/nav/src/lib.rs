//! Loupe navigator: the single-writer session controller.
//!
//! Every trigger (filter change, page request, external location change) mutates the
//! [`FilterState`], marks the accumulator as loading and spawns one search task.
//! Completions come back over a channel tagged with the request sequence number;
//! anything but the latest is dropped. First pages go through the auto-drill
//! policy before they reach the accumulator.
//!
//! All mutators spawn onto the ambient tokio runtime.

#![forbid(unsafe_code)]

use std::sync::Arc;

use loupe_api::{LoupeError, LoupeResult, SearchClient};
use loupe_core::{FacetKey, LoadStatus, NavigatorConfig, Rank, Scope, SearchResponse};
use loupe_persist::{to_fragment, Codec, Location, LocationWatch};
use loupe_search::{build_request, FilterState, SearchRequest};
use loupe_store::ResultAccumulator;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub mod drill;
pub mod view;

pub use drill::{decide, Drill};
pub use view::{Breadcrumb, NavigatorView};

#[derive(Debug)]
struct Completion {
    seq: u64,
    start: u64,
    outcome: LoupeResult<SearchResponse>,
}

pub struct Navigator {
    client: Arc<dyn SearchClient>,
    cfg: NavigatorConfig,
    codec: Codec,
    state: FilterState,
    acc: ResultAccumulator,
    seq: u64,
    drill_steps: usize,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
    location: Option<LocationWatch>,
}

impl Navigator {
    pub fn new(client: Arc<dyn SearchClient>, cfg: NavigatorConfig, scope: Option<Scope>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            client,
            codec: Codec::from_config(&cfg),
            cfg,
            state: FilterState::with_scope(scope),
            acc: ResultAccumulator::new(),
            seq: 0,
            drill_steps: 0,
            tx,
            rx,
            location: None,
        }
    }

    /// Hydrate the filter selection from `location` and keep it in sync from now on.
    pub fn with_location(mut self, location: &Location) -> Self {
        let watch = location.subscribe();
        let filters = self.codec.decode(&location.current());
        self.state.restore(filters);
        self.location = Some(watch);
        self.persist();
        self
    }

    /// Issue the initial request.
    pub fn mount(&mut self) {
        info!(scope = ?self.state.scope(), rank = ?self.state.current_rank(), "nav: mount");
        self.refetch("mount");
    }

    /// Drill down on a rank or select a categorical value.
    pub fn apply_filter(&mut self, key: &FacetKey, filter_query: impl Into<String>) -> LoupeResult<()> {
        let external = self.absorb_external();
        let res = self.try_apply(key, filter_query.into());
        if external || matches!(res, Ok(true)) {
            self.after_change("apply_filter");
        }
        res.map(|_| ())
    }

    pub fn clear_filter(&mut self, key: &FacetKey) {
        let external = self.absorb_external();
        if self.state.clear_filter(key) || external {
            self.after_change("clear_filter");
        }
    }

    /// Returns false (and issues nothing) when no filter was set.
    pub fn clear_all_filters(&mut self) -> bool {
        let external = self.absorb_external();
        let changed = self.state.clear_all_filters();
        if changed || external {
            self.after_change("clear_all");
        } else {
            debug!("nav: clear_all on clear state ignored");
        }
        changed
    }

    /// Drill up: keep `rank` and its ancestors.
    pub fn remove_ranks_below(&mut self, rank: Rank) {
        let external = self.absorb_external();
        if self.state.remove_ranks_below(rank) || external {
            self.after_change("drill_up");
        }
    }

    /// Request the next page. Refused while a request is outstanding or when
    /// everything has been loaded. A pending external location change wins over
    /// the page request.
    pub fn advance_page(&mut self) -> bool {
        if self.absorb_external() {
            self.after_change("location");
            return false;
        }
        if self.acc.status() == LoadStatus::Loading || !self.acc.has_more() {
            debug!(status = %self.acc.status(), has_more = self.acc.has_more(), "nav: page request refused");
            return false;
        }
        self.state.advance_page(self.cfg.page_size);
        self.issue("page");
        true
    }

    /// Switch to another collection, data resource or institution; starts over.
    pub fn set_entity_scope(&mut self, id: &str) -> LoupeResult<()> {
        let scope = self.cfg.resolve_scope(id)?;
        self.absorb_external();
        if self.state.set_entity_scope(Some(scope)) {
            self.after_change("scope");
        }
        Ok(())
    }

    pub fn set_first_image_only(&mut self, flag: bool) {
        let external = self.absorb_external();
        if self.state.set_first_image_only(flag) || external {
            self.after_change("first_image_only");
        }
    }

    /// Handle finished requests and external location changes without waiting.
    /// Returns the number of completions processed.
    pub fn poll(&mut self) -> usize {
        if self.absorb_external() {
            self.after_change("location");
        }
        let mut handled = 0;
        while let Ok(c) = self.rx.try_recv() {
            self.handle(c);
            handled += 1;
        }
        handled
    }

    /// Wait until no request is outstanding, auto-drill chains included.
    pub async fn settle(&mut self) -> LoadStatus {
        loop {
            self.poll();
            if self.acc.status() != LoadStatus::Loading {
                return self.acc.status();
            }
            match self.rx.recv().await {
                Some(c) => self.handle(c),
                None => return self.acc.status(),
            }
        }
    }

    pub fn view(&self) -> NavigatorView { NavigatorView::build(&self.state, &self.acc) }
    pub fn state(&self) -> &FilterState { &self.state }
    pub fn status(&self) -> LoadStatus { self.acc.status() }
    pub fn config(&self) -> &NavigatorConfig { &self.cfg }

    /// The request the current state maps to.
    pub fn current_request(&self) -> SearchRequest { build_request(&self.state, &self.cfg) }

    /// Shareable fragment for the current filter selection.
    pub fn fragment(&self) -> String { to_fragment(&self.codec.encode(self.state.filters())) }

    fn after_change(&mut self, reason: &'static str) {
        self.drill_steps = 0;
        self.persist();
        self.refetch(reason);
    }

    fn try_apply(&mut self, key: &FacetKey, filter_query: String) -> LoupeResult<bool> {
        if let FacetKey::Categorical(k) = key {
            if !self.cfg.is_categorical(k) {
                return Err(LoupeError::Validation(format!("facet {} is not browsable", k)));
            }
        }
        Ok(self.state.apply_filter(key, filter_query)?)
    }

    /// Fold in a location change made by someone else since the last look.
    /// Runs before every local mutation so the next write cannot clobber it.
    fn absorb_external(&mut self) -> bool {
        let Some(slots) = self.location.as_mut().and_then(LocationWatch::take_external) else {
            return false;
        };
        let changed = self.state.restore(self.codec.decode(&slots));
        if changed {
            info!(slots = slots.len(), "nav: location changed externally");
        }
        changed
    }

    fn persist(&mut self) {
        if let Some(loc) = self.location.as_mut() {
            loc.replace(self.codec.encode(self.state.filters()));
        }
    }

    /// Results of the previous selection are dropped before the new request goes out.
    fn refetch(&mut self, reason: &'static str) {
        self.acc.reset();
        self.issue(reason);
    }

    fn issue(&mut self, reason: &'static str) {
        self.acc.begin();
        self.seq += 1;
        let seq = self.seq;
        let req = build_request(&self.state, &self.cfg);
        let start = req.start;
        metrics::counter!("nav_requests_total", 1u64, "reason" => reason);
        info!(seq, start, fq = req.fq.len(), facets = ?req.facets_param(), reason, "nav: refetch");
        let client = Arc::clone(&self.client);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            // A panicking client still has to end the request.
            let outcome = match tokio::spawn(async move { client.search(&req).await }).await {
                Ok(res) => res,
                Err(e) => Err(LoupeError::Transport(format!("search task failed: {e}"))),
            };
            let _ = tx.send(Completion { seq, start, outcome });
        });
    }

    fn handle(&mut self, c: Completion) {
        if c.seq != self.seq {
            debug!(seq = c.seq, latest = self.seq, "nav: stale response discarded");
            metrics::counter!("nav_stale_responses_total", 1u64);
            return;
        }
        let first_image_only = self.state.filters().first_image_only();
        match c.outcome {
            Ok(resp) if c.start == 0 => {
                let rank = self.state.current_rank();
                if self.drill_steps < Rank::COUNT {
                    if let Some(d) = decide(rank, &resp) {
                        self.auto_drill(d);
                        return;
                    }
                }
                self.acc.apply_first_page(&resp, rank, &self.cfg.categorical_facets, first_image_only);
            }
            Ok(resp) => self.acc.apply_next_page(&resp, first_image_only),
            Err(e) => {
                if c.start > 0 {
                    self.state.rewind_page(self.cfg.page_size);
                }
                warn!(error = %e, seq = c.seq, start = c.start, "nav: request failed");
                self.acc.fail(e.load_status(), e.to_string());
            }
        }
    }

    fn auto_drill(&mut self, d: Drill) {
        self.drill_steps += 1;
        info!(rank = %d.rank, fq = %d.filter_query, step = self.drill_steps, "nav: auto-drill");
        metrics::counter!("nav_autodrill_total", 1u64, "rank" => d.rank.name());
        match self.state.apply_filter(&FacetKey::Rank(d.rank), d.filter_query) {
            Ok(_) => {
                self.persist();
                self.refetch("auto_drill");
            }
            Err(e) => {
                warn!(error = %e, "nav: auto-drill refused");
                self.acc.fail(LoadStatus::Error, e.to_string());
            }
        }
    }
}
