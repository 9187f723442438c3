//! Remote API contracts and their implementations.
//!
//! `PickupApi` is the request/response surface the core consumes. Two
//! implementations are provided:
//!
//! - `ApiClient`: JSON over HTTP against the school backend
//! - `MemoryApi`: an in-process authority holding the same rules, used for
//!   offline work and tests
//!
//! The trait works with kind-erased `EntityRecord`s so it can be used as a
//! trait object; `fetch_page` and `fetch_by_code` recover the typed view.

pub mod client;
pub mod error;
pub mod memory;

pub use client::ApiClient;
pub use error::ApiError;
pub use memory::MemoryApi;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{Error, Result};
use crate::models::{
    Entity, EntityKind, EntityRecord, ListQuery, Page, Parent, ProposedScan, ScanEvent, ScanReceipt,
};

#[async_trait]
pub trait PickupApi: Send + Sync {
    /// Paginated, searchable directory read.
    async fn list_entities(&self, query: &ListQuery) -> Result<Page<EntityRecord>>;

    /// Single record by code. Missing or tombstoned records are `Error::NotFound`.
    async fn get_entity_by_code(&self, kind: EntityKind, code: &str) -> Result<EntityRecord>;

    /// Submit a scan. Unauthorized exits come back as `Error::UnauthorizedPickup`.
    async fn submit_scan(&self, scan: &ProposedScan) -> Result<ScanReceipt>;

    /// One page of a child's scans, most recent first.
    async fn list_scans_for_child(&self, child_code: &str, page: u32) -> Result<Page<ScanEvent>>;

    /// Replace a recuperator's whole authorized-children set.
    async fn assign_authorized_children(
        &self,
        recuperator_code: &str,
        child_codes: &[String],
    ) -> Result<()>;

    /// Save a parent together with its children list.
    async fn save_parent(&self, parent: &Parent) -> Result<Parent>;

    /// Soft-remove a child.
    async fn remove_child(&self, child_code: &str) -> Result<()>;

    /// Restore a soft-removed child.
    async fn restore_child(&self, child_code: &str) -> Result<()>;
}

/// Typed directory read on top of `list_entities`.
pub async fn fetch_page<T: Entity>(api: &dyn PickupApi, query: &ListQuery) -> Result<Page<T>> {
    if query.kind != T::KIND {
        return Err(Error::Validation(format!(
            "query for {} used to read {}",
            query.kind,
            T::KIND
        )));
    }
    let page = api.list_entities(query).await?;
    let mut mismatched = 0usize;
    let items = page
        .items
        .into_iter()
        .filter_map(|record| {
            let entity = record.into_entity::<T>();
            if entity.is_none() {
                mismatched += 1;
            }
            entity
        })
        .collect();
    if mismatched > 0 {
        warn!(kind = %T::KIND, mismatched, "Dropped records of another kind from page");
    }
    Ok(Page {
        items,
        page: page.page,
        last_page: page.last_page,
        total: page.total,
        counts: page.counts,
    })
}

/// Typed single-record read on top of `get_entity_by_code`.
pub async fn fetch_by_code<T: Entity>(api: &dyn PickupApi, code: &str) -> Result<T> {
    api.get_entity_by_code(T::KIND, code)
        .await?
        .into_entity::<T>()
        .ok_or_else(|| Error::not_found(T::KIND, code))
}
