//! Keeping an already-chosen record selectable while paging through a search.

use tracing::{debug, warn};

use crate::api::{fetch_by_code, PickupApi};
use crate::error::{Error, Result};
use crate::models::Entity;

/// Merge a pinned record in front of a page.
///
/// The pinned record is prepended unless a record with the same code is
/// already on the page. The page itself is returned in order.
pub fn merge_pinned<'a, T>(
    page: &'a [T],
    pinned: Option<&'a T>,
    code_of: impl Fn(&T) -> &str,
) -> Vec<&'a T> {
    let mut merged = Vec::with_capacity(page.len() + 1);
    if let Some(pinned) = pinned {
        let code = code_of(pinned);
        if !page.iter().any(|item| code_of(item) == code) {
            merged.push(pinned);
        }
    }
    merged.extend(page.iter());
    merged
}

/// A single-record fetch requested by a resolver.
///
/// Tied to the pin it was issued for; completing it after the pin changed is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinFetch {
    pub code: String,
    generation: u64,
}

/// Pin state for one selection widget.
#[derive(Debug, Clone)]
pub struct PinResolver<T> {
    pinned: Option<String>,
    held: Option<T>,
    fetching: bool,
    stale: bool,
    generation: u64,
}

impl<T> Default for PinResolver<T> {
    fn default() -> Self {
        Self {
            pinned: None,
            held: None,
            fetching: false,
            stale: false,
            generation: 0,
        }
    }
}

impl<T: Entity> PinResolver<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear the pin. Blank codes clear it; re-pinning the same code keeps state.
    pub fn pin(&mut self, code: Option<String>) {
        let code = code
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if code == self.pinned {
            return;
        }
        self.generation += 1;
        self.pinned = code;
        self.held = None;
        self.fetching = false;
        self.stale = false;
    }

    pub fn clear_pin(&mut self) {
        self.pin(None);
    }

    pub fn pinned(&self) -> Option<&str> {
        self.pinned.as_deref()
    }

    pub fn held(&self) -> Option<&T> {
        self.held.as_ref()
    }

    /// Look at a freshly loaded page.
    ///
    /// Drops the held record once the page carries the pin itself, and asks for
    /// a single-record fetch when the pin is known nowhere. At most one fetch is
    /// outstanding per pin, and none after a failed one. A page carrying the pin
    /// also clears an earlier stale flag (the record was restored).
    pub fn observe(&mut self, page: &[T]) -> Option<PinFetch> {
        let code = self.pinned.as_deref()?;
        if page.iter().any(|item| item.code() == code) {
            if self.held.take().is_some() {
                debug!(kind = %T::KIND, code, "Pinned record now on page");
            }
            if std::mem::take(&mut self.stale) {
                debug!(kind = %T::KIND, code, "Stale pin is back on page");
            }
            return None;
        }
        if self.held.is_some() || self.fetching || self.stale {
            return None;
        }
        self.fetching = true;
        Some(PinFetch {
            code: code.to_string(),
            generation: self.generation,
        })
    }

    /// Apply the outcome of a fetch issued by `observe`.
    ///
    /// Returns false when the pin moved on in the meantime.
    pub fn complete_fetch(&mut self, fetch: PinFetch, result: Result<T>) -> bool {
        if fetch.generation != self.generation {
            debug!(kind = %T::KIND, code = %fetch.code, "Discarding fetch for a previous pin");
            return false;
        }
        self.fetching = false;
        match result {
            Ok(record) if record.code() == fetch.code => self.held = Some(record),
            Ok(record) => {
                warn!(kind = %T::KIND, expected = %fetch.code, got = %record.code(), "Pin fetch returned another record");
                self.stale = true;
            }
            Err(e) => {
                warn!(kind = %T::KIND, code = %fetch.code, error = %e, "Pinned record could not be loaded");
                self.stale = true;
            }
        }
        true
    }

    /// Set when the pinned record could not be loaded; the caller should clear the pin.
    pub fn stale_reference(&self) -> Option<Error> {
        match &self.pinned {
            Some(code) if self.stale => Some(Error::StaleReference {
                kind: T::KIND,
                code: code.clone(),
            }),
            _ => None,
        }
    }

    /// Selectable list: the pinned record if it is not already on the page, then the page.
    pub fn resolve<'a>(&'a self, page: &'a [T]) -> Vec<&'a T> {
        let pinned = self
            .held
            .as_ref()
            .filter(|held| Some(held.code()) == self.pinned.as_deref());
        merge_pinned(page, pinned, |item: &T| item.code())
    }

    /// `observe` followed by the fetch it asks for, awaited in place.
    pub async fn settle(&mut self, api: &dyn PickupApi, page: &[T]) {
        if let Some(fetch) = self.observe(page) {
            let result = fetch_by_code::<T>(api, &fetch.code).await;
            self.complete_fetch(fetch, result);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
