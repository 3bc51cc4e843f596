//! Incremental and paging loaders.
//!
//! A loader owns the window (`LIMIT`/`OFFSET`) a subscription runs with and
//! the counters published in `info` events. It never talks to the database:
//! the subscription asks it for the window of the next run and feeds the
//! row count back afterwards. Window changes are computed on a copy and
//! committed only when the run they triggered succeeds.

use crate::event::LoadingInfo;
use crate::state::SubscriptionState;
use livesql_core::{Error, QueryDefinition, Result};
use serde::{Deserialize, Serialize};

/// How a subscription loads its rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingKind {
    /// Every matching row is live.
    #[default]
    Complete,
    /// A growing prefix of the result; `load_next` extends it by one page.
    Incremental,
    /// One page of the result at a time.
    Paging,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Loader {
    kind: LoadingKind,
    limit: Option<u64>,
    current_limit: Option<u64>,
    current_offset: Option<u64>,
    total_row_count: Option<u64>,
    current_page: Option<u64>,
    total_page_count: Option<u64>,
}

impl Loader {
    /// Builds the loader for `query`. Incremental and paging loaders own the
    /// window, so an explicit limit or offset on the query is rejected.
    pub fn new(kind: LoadingKind, page_size: u64, query: &QueryDefinition) -> Result<Self> {
        if kind == LoadingKind::Complete {
            return Ok(Self {
                kind,
                limit: query.limit,
                current_limit: query.limit,
                current_offset: query.offset,
                total_row_count: None,
                current_page: None,
                total_page_count: None,
            });
        }
        if query.limit.is_some() || query.offset.is_some() {
            return Err(Error::definition(
                "limit and offset cannot be combined with a loading mode",
            ));
        }
        if page_size == 0 {
            return Err(Error::definition("page size must be greater than zero"));
        }
        Ok(Self {
            kind,
            limit: Some(page_size),
            current_limit: Some(page_size),
            current_offset: Some(0),
            total_row_count: None,
            current_page: (kind == LoadingKind::Paging).then_some(1),
            total_page_count: None,
        })
    }

    #[inline]
    pub fn kind(&self) -> LoadingKind {
        self.kind
    }

    /// Returns true if runs must also count the unwindowed result.
    #[inline]
    pub fn counts_rows(&self) -> bool {
        self.kind != LoadingKind::Complete
    }

    #[inline]
    pub fn total_row_count(&self) -> Option<u64> {
        self.total_row_count
    }

    #[inline]
    pub fn total_page_count(&self) -> Option<u64> {
        self.total_page_count
    }

    #[inline]
    pub fn current_page(&self) -> Option<u64> {
        self.current_page
    }

    #[inline]
    pub fn current_limit(&self) -> Option<u64> {
        self.current_limit
    }

    /// `(limit, offset)` of the next run.
    pub fn window(&self) -> (Option<u64>, Option<u64>) {
        match self.kind {
            LoadingKind::Complete => (self.current_limit, self.current_offset),
            LoadingKind::Incremental => (self.current_limit, None),
            LoadingKind::Paging => (self.limit, self.current_offset),
        }
    }

    /// Applies the window to `query`.
    pub fn windowed(&self, query: &QueryDefinition) -> QueryDefinition {
        let (limit, offset) = self.window();
        query.windowed(limit, offset)
    }

    /// Stores the row count of the latest run and recomputes the page count.
    pub fn record_total(&mut self, total: u64) {
        self.total_row_count = Some(total);
        if self.kind == LoadingKind::Paging {
            if let Some(page_size) = self.limit {
                self.total_page_count = Some(total.div_ceil(page_size));
            }
        }
    }

    /// The loader after `load_next`, or `None` when every row is loaded.
    pub fn next_increment(&self) -> Result<Option<Self>> {
        if self.kind != LoadingKind::Incremental {
            return Err(Error::invalid_state(
                "load_next is only available for incremental loading",
            ));
        }
        let (Some(page_size), Some(current)) = (self.limit, self.current_limit) else {
            return Ok(None);
        };
        if self.total_row_count.map_or(false, |total| total <= current) {
            return Ok(None);
        }
        Ok(Some(Self {
            current_limit: Some(current + page_size),
            ..self.clone()
        }))
    }

    /// The loader after `goto_page(page)`, or `None` when the page does not
    /// exist. Page 1 always exists.
    pub fn page(&self, page: u64) -> Result<Option<Self>> {
        if self.kind != LoadingKind::Paging {
            return Err(Error::invalid_state(
                "goto_page is only available for paging",
            ));
        }
        let Some(page_size) = self.limit else {
            return Ok(None);
        };
        let exists = page == 1
            || (page > 1 && self.total_page_count.map_or(false, |pages| page <= pages));
        if !exists {
            return Ok(None);
        }
        Ok(Some(Self {
            current_page: Some(page),
            current_offset: Some((page - 1) * page_size),
            ..self.clone()
        }))
    }

    /// Loading metadata for an `info` event.
    pub fn info(&self, state: SubscriptionState) -> LoadingInfo {
        LoadingInfo {
            kind: self.kind,
            limit: self.limit,
            current_limit: self.current_limit,
            current_offset: self.current_offset,
            total_row_count: self.total_row_count,
            current_page: self.current_page,
            total_page_count: self.total_page_count,
            ready: state == SubscriptionState::Ready,
            state,
        }
    }
}
