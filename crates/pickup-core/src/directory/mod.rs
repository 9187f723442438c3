//! Entity directory: typed read-through cache over paginated collections.

mod cache;
mod resolver;
mod tracker;

pub use cache::CachedData;
pub use resolver::{merge_pinned, PinFetch, PinResolver};
pub use tracker::{QueryTracker, Ticket};

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::api::{fetch_by_code, fetch_page, PickupApi};
use crate::error::{Error, Result};
use crate::models::{Entity, EntityKind, ListQuery, Page};

/// Default staleness threshold for loaded pages.
pub const DEFAULT_STALE_MINUTES: i64 = 5;

/// Loaded pages of one entity kind, keyed by the query that produced them.
pub struct Directory<T: Entity> {
    api: Arc<dyn PickupApi>,
    pages: HashMap<ListQuery, CachedData<Page<T>>>,
    stale_minutes: i64,
}

impl<T: Entity> Directory<T> {
    pub fn new(api: Arc<dyn PickupApi>) -> Self {
        Self::with_staleness(api, DEFAULT_STALE_MINUTES)
    }

    pub fn with_staleness(api: Arc<dyn PickupApi>, stale_minutes: i64) -> Self {
        Self {
            api,
            pages: HashMap::new(),
            stale_minutes,
        }
    }

    pub fn kind(&self) -> EntityKind {
        T::KIND
    }

    pub fn api(&self) -> Arc<dyn PickupApi> {
        Arc::clone(&self.api)
    }

    /// Page for the query, served from cache while fresh.
    pub async fn page(&mut self, query: &ListQuery) -> Result<Page<T>> {
        if let Some(page) = self.fresh(query) {
            debug!(kind = %T::KIND, page = query.page, "Directory cache hit");
            return Ok(page.clone());
        }
        debug!(kind = %T::KIND, page = query.page, search = %query.search, "Directory cache miss");
        let page = fetch_page::<T>(self.api.as_ref(), query).await?;
        self.insert(query.clone(), page.clone());
        Ok(page)
    }

    /// Cached entry regardless of age.
    pub fn cached(&self, query: &ListQuery) -> Option<&CachedData<Page<T>>> {
        self.pages.get(query)
    }

    /// Cached page if it is younger than the staleness threshold.
    pub fn fresh(&self, query: &ListQuery) -> Option<&Page<T>> {
        self.pages
            .get(query)
            .filter(|cached| !cached.is_stale(self.stale_minutes))
            .map(|cached| &cached.data)
    }

    /// Store a page fetched elsewhere (e.g. by a background task).
    pub fn insert(&mut self, query: ListQuery, page: Page<T>) {
        self.pages.insert(query, CachedData::new(page));
    }

    /// Forget every loaded page. Called after a mutation touching this kind.
    pub fn invalidate(&mut self) {
        if !self.pages.is_empty() {
            debug!(kind = %T::KIND, pages = self.pages.len(), "Directory invalidated");
        }
        self.pages.clear();
    }

    pub fn loaded_pages(&self) -> usize {
        self.pages.len()
    }

    /// Search every loaded page for a code.
    pub fn find_loaded(&self, code: &str) -> Option<&T> {
        self.pages
            .values()
            .flat_map(|cached| cached.data.items.iter())
            .find(|item| item.code() == code)
    }

    /// Record by code: loaded pages first, then a single-record fetch.
    pub async fn by_code(&self, code: &str) -> Result<T> {
        if code.trim().is_empty() {
            return Err(Error::Validation(format!("{} code must not be empty", T::KIND)));
        }
        if let Some(item) = self.find_loaded(code) {
            return Ok(item.clone());
        }
        fetch_by_code::<T>(self.api.as_ref(), code).await
    }
}

// ============================================================================
// Tests
// ============================================================================
