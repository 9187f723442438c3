//! Console state coordinator.
//!
//! Owns the backend handle, one directory and pin resolver per entity kind,
//! and the dashboard cohort. Reads run as background tasks that report back
//! through an mpsc channel; `check_background_tasks` applies results whose
//! ticket is still current and drops the rest. Mutations are awaited directly
//! and invalidate the collections they affect.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::{fetch_by_code, fetch_page, PickupApi};
use crate::config::Config;
use crate::directory::{Directory, PinFetch, PinResolver, QueryTracker, Ticket};
use crate::error::{Error, Result};
use crate::ledger::fetch_tail;
use crate::models::{
    Agent, Child, Entity, EntityKind, EntityRecord, ListQuery, Page, Parent, ProposedScan,
    Recuperator, ScanReceipt, ScanType,
};
use crate::presence::{
    activity_of, assess_scan, stats_of, ChildActivity, ChildTail, CohortStats, LedgerView,
    ScanVerdict,
};

// ============================================================================
// Constants
// ============================================================================

/// Buffer size for the background result channel.
const CHANNEL_BUFFER_SIZE: usize = 32;

/// Maximum concurrent scan-history fetches during a cohort refresh.
const MAX_CONCURRENT_REQUESTS: usize = 10;

// ============================================================================
// Background results
// ============================================================================

/// Logical query slots for last-request-wins tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuerySlot {
    Page(EntityKind),
    Cohort,
}

/// Children of a cohort and their fetched ledger tails.
#[derive(Debug, Clone, Default)]
pub struct CohortSnapshot {
    pub query: Option<ListQuery>,
    pub children: Vec<String>,
    pub tails: HashMap<String, ChildTail>,
}

/// Results sent from background tasks to the console
#[derive(Debug)]
pub enum ConsoleUpdate {
    Parents(Ticket<QuerySlot>, ListQuery, Result<Page<Parent>>),
    Children(Ticket<QuerySlot>, ListQuery, Result<Page<Child>>),
    Recuperators(Ticket<QuerySlot>, ListQuery, Result<Page<Recuperator>>),
    Agents(Ticket<QuerySlot>, ListQuery, Result<Page<Agent>>),
    PinnedParent(PinFetch, Result<Parent>),
    PinnedChild(PinFetch, Result<Child>),
    PinnedRecuperator(PinFetch, Result<Recuperator>),
    PinnedAgent(PinFetch, Result<Agent>),
    Cohort(Ticket<QuerySlot>, Result<CohortSnapshot>),
}

// ============================================================================
// Per-kind slots
// ============================================================================

/// Directory, current page and pin state for one entity kind.
pub struct Slot<T: Entity> {
    pub directory: Directory<T>,
    pub resolver: PinResolver<T>,
    query: ListQuery,
    page: Page<T>,
}

impl<T: Entity> Slot<T> {
    fn new(api: Arc<dyn PickupApi>, stale_minutes: i64) -> Self {
        Self {
            directory: Directory::with_staleness(api, stale_minutes),
            resolver: PinResolver::new(),
            query: ListQuery::new(T::KIND),
            page: Page::empty(),
        }
    }

    pub fn query(&self) -> &ListQuery {
        &self.query
    }

    /// Page currently shown for the latest query.
    pub fn page(&self) -> &Page<T> {
        &self.page
    }

    /// Pinned record (when off-page) followed by the current page.
    pub fn selection_list(&self) -> Vec<&T> {
        self.resolver.resolve(&self.page.items)
    }

    fn show(&mut self, page: Page<T>) -> Option<PinFetch> {
        self.page = page;
        self.observe_pin()
    }

    /// Ask the resolver about the current page; answer from loaded pages when possible.
    fn observe_pin(&mut self) -> Option<PinFetch> {
        let fetch = self.resolver.observe(&self.page.items)?;
        match self.directory.find_loaded(&fetch.code).cloned() {
            Some(found) => {
                self.resolver.complete_fetch(fetch, Ok(found));
                None
            }
            None => Some(fetch),
        }
    }
}

/// Entity kinds the console keeps a slot for.
pub trait Tracked: Entity {
    fn slot(console: &Console) -> &Slot<Self>;
    fn slot_mut(console: &mut Console) -> &mut Slot<Self>;
    fn page_update(ticket: Ticket<QuerySlot>, query: ListQuery, result: Result<Page<Self>>) -> ConsoleUpdate;
    fn pin_update(fetch: PinFetch, result: Result<Self>) -> ConsoleUpdate;
}

macro_rules! tracked {
    ($ty:ty, $field:ident, $page:ident, $pinned:ident) => {
        impl Tracked for $ty {
            fn slot(console: &Console) -> &Slot<Self> {
                &console.$field
            }

            fn slot_mut(console: &mut Console) -> &mut Slot<Self> {
                &mut console.$field
            }

            fn page_update(
                ticket: Ticket<QuerySlot>,
                query: ListQuery,
                result: Result<Page<Self>>,
            ) -> ConsoleUpdate {
                ConsoleUpdate::$page(ticket, query, result)
            }

            fn pin_update(fetch: PinFetch, result: Result<Self>) -> ConsoleUpdate {
                ConsoleUpdate::$pinned(fetch, result)
            }
        }
    };
}

tracked!(Parent, parents, Parents, PinnedParent);
tracked!(Child, children, Children, PinnedChild);
tracked!(Recuperator, recuperators, Recuperators, PinnedRecuperator);
tracked!(Agent, agents, Agents, PinnedAgent);

// ============================================================================
// Console
// ============================================================================

pub struct Console {
    api: Arc<dyn PickupApi>,
    agent_code: Option<String>,

    parents: Slot<Parent>,
    children: Slot<Child>,
    recuperators: Slot<Recuperator>,
    agents: Slot<Agent>,

    // Dashboard cohort; stats are derived on demand from the tails
    cohort_query: Option<ListQuery>,
    cohort: Vec<String>,
    cohort_tails: HashMap<String, ChildTail>,

    // Background task channel
    tracker: QueryTracker<QuerySlot>,
    updates_rx: mpsc::Receiver<ConsoleUpdate>,
    updates_tx: mpsc::Sender<ConsoleUpdate>,
    pending: usize,

    pub status_message: Option<String>,
}

impl Console {
    pub fn new(api: Arc<dyn PickupApi>, config: &Config) -> Self {
        let stale_minutes = config.cache_stale_minutes();
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        Self {
            parents: Slot::new(Arc::clone(&api), stale_minutes),
            children: Slot::new(Arc::clone(&api), stale_minutes),
            recuperators: Slot::new(Arc::clone(&api), stale_minutes),
            agents: Slot::new(Arc::clone(&api), stale_minutes),
            api,
            agent_code: config.agent_code(),
            cohort_query: None,
            cohort: Vec::new(),
            cohort_tails: HashMap::new(),
            tracker: QueryTracker::new(),
            updates_rx: rx,
            updates_tx: tx,
            pending: 0,
            status_message: None,
        }
    }

    pub fn api(&self) -> Arc<dyn PickupApi> {
        Arc::clone(&self.api)
    }

    /// Default scanning agent from configuration.
    pub fn agent_code(&self) -> Option<&str> {
        self.agent_code.as_deref()
    }

    pub fn slot<T: Tracked>(&self) -> &Slot<T> {
        T::slot(self)
    }

    pub fn slot_mut<T: Tracked>(&mut self) -> &mut Slot<T> {
        T::slot_mut(self)
    }

    /// Number of background tasks whose results have not been processed yet.
    pub fn pending_tasks(&self) -> usize {
        self.pending
    }

    // ===== Directory reads =====

    /// Start loading a page. Supersedes any earlier request for the same kind.
    pub fn search(&mut self, query: ListQuery) {
        match query.kind {
            EntityKind::Parent => self.search_typed::<Parent>(query),
            EntityKind::Child => self.search_typed::<Child>(query),
            EntityKind::Recuperator => self.search_typed::<Recuperator>(query),
            EntityKind::Agent => self.search_typed::<Agent>(query),
        }
    }

    /// Reload the current query of a kind.
    pub fn refresh(&mut self, kind: EntityKind) {
        let query = match kind {
            EntityKind::Parent => self.parents.query.clone(),
            EntityKind::Child => self.children.query.clone(),
            EntityKind::Recuperator => self.recuperators.query.clone(),
            EntityKind::Agent => self.agents.query.clone(),
        };
        self.search(query);
    }

    fn search_typed<T: Tracked>(&mut self, query: ListQuery) {
        let ticket = self.tracker.begin(QuerySlot::Page(T::KIND));
        let slot = T::slot_mut(self);
        slot.query = query.clone();

        let cached = slot.directory.fresh(&query).cloned();
        if let Some(page) = cached {
            debug!(kind = %T::KIND, page = query.page, "Serving page from cache");
            // Consume the ticket so an older in-flight result is discarded
            self.tracker.accept(&ticket);
            let fetch = T::slot_mut(self).show(page);
            if let Some(fetch) = fetch {
                self.spawn_pin_fetch::<T>(fetch);
            }
            return;
        }

        let api = Arc::clone(&self.api);
        let tx = self.updates_tx.clone();
        self.pending += 1;
        tokio::spawn(async move {
            let result = fetch_page::<T>(api.as_ref(), &query).await;
            Self::send_update(&tx, T::page_update(ticket, query, result)).await;
        });
    }

    // ===== Pins =====

    /// Pin a record in the selection list of its kind, or clear it with `None`.
    pub fn pin(&mut self, kind: EntityKind, code: Option<String>) {
        match kind {
            EntityKind::Parent => self.pin_typed::<Parent>(code),
            EntityKind::Child => self.pin_typed::<Child>(code),
            EntityKind::Recuperator => self.pin_typed::<Recuperator>(code),
            EntityKind::Agent => self.pin_typed::<Agent>(code),
        }
    }

    fn pin_typed<T: Tracked>(&mut self, code: Option<String>) {
        let slot = T::slot_mut(self);
        slot.resolver.pin(code);
        let fetch = slot.observe_pin();
        if let Some(fetch) = fetch {
            self.spawn_pin_fetch::<T>(fetch);
        }
    }

    fn spawn_pin_fetch<T: Tracked>(&mut self, fetch: PinFetch) {
        let api = Arc::clone(&self.api);
        let tx = self.updates_tx.clone();
        self.pending += 1;
        tokio::spawn(async move {
            let result = fetch_by_code::<T>(api.as_ref(), &fetch.code).await;
            Self::send_update(&tx, T::pin_update(fetch, result)).await;
        });
    }

    /// Kind-erased selection list for front-ends that do not know the type.
    pub fn selection_list(&self, kind: EntityKind) -> Vec<EntityRecord> {
        fn erase<T: Entity>(items: Vec<&T>) -> Vec<EntityRecord> {
            items.into_iter().cloned().map(Entity::into_record).collect()
        }
        match kind {
            EntityKind::Parent => erase(self.parents.selection_list()),
            EntityKind::Child => erase(self.children.selection_list()),
            EntityKind::Recuperator => erase(self.recuperators.selection_list()),
            EntityKind::Agent => erase(self.agents.selection_list()),
        }
    }

    /// Stale-reference flag of a kind's pin, if its record could not be loaded.
    pub fn stale_reference(&self, kind: EntityKind) -> Option<Error> {
        match kind {
            EntityKind::Parent => self.parents.resolver.stale_reference(),
            EntityKind::Child => self.children.resolver.stale_reference(),
            EntityKind::Recuperator => self.recuperators.resolver.stale_reference(),
            EntityKind::Agent => self.agents.resolver.stale_reference(),
        }
    }

    // ===== Cohort =====

    /// Load a children page as the dashboard cohort and fetch every tail.
    pub fn refresh_cohort(&mut self, query: ListQuery) -> Result<()> {
        if query.kind != EntityKind::Child {
            return Err(Error::Validation(format!("cohort must list children, not {}", query.kind)));
        }
        let ticket = self.tracker.begin(QuerySlot::Cohort);
        self.cohort_query = Some(query.clone());

        let api = Arc::clone(&self.api);
        let tx = self.updates_tx.clone();
        self.pending += 1;
        tokio::spawn(async move {
            let result = Self::load_cohort(api, query).await;
            Self::send_update(&tx, ConsoleUpdate::Cohort(ticket, result)).await;
        });
        Ok(())
    }

    async fn load_cohort(api: Arc<dyn PickupApi>, query: ListQuery) -> Result<CohortSnapshot> {
        let page = fetch_page::<Child>(api.as_ref(), &query).await?;
        let children: Vec<String> = page.items.into_iter().map(|c| c.code).collect();

        let fetched: Vec<Result<(String, ChildTail)>> = stream::iter(children.clone())
            .map(|code| {
                let api = Arc::clone(&api);
                async move {
                    let tail = fetch_tail(api, &code).await?;
                    Ok((code, tail))
                }
            })
            .buffer_unordered(MAX_CONCURRENT_REQUESTS)
            .collect()
            .await;

        // A partial cohort would report failed children as "no activity"
        let tails = fetched.into_iter().collect::<Result<HashMap<_, _>>>()?;
        debug!(children = children.len(), "Cohort tails fetched");
        Ok(CohortSnapshot {
            query: Some(query),
            children,
            tails,
        })
    }

    pub fn cohort(&self) -> &[String] {
        &self.cohort
    }

    /// Statistics over the current cohort, recomputed on every call.
    pub fn cohort_stats(&self) -> CohortStats {
        stats_of(self.cohort.iter().map(String::as_str), &self.cohort_tails)
    }

    pub fn activity(&self, child_code: &str) -> ChildActivity {
        activity_of(&self.cohort_tails, child_code)
    }

    // ===== Mutations =====

    /// Submit a scan.
    ///
    /// Exits naming a recuperator are first checked against a freshly fetched
    /// recuperator record; the backend stays the final authority.
    pub async fn submit_scan(&mut self, scan: ProposedScan) -> Result<ScanReceipt> {
        if scan.scan_type == ScanType::Exit {
            if let Some(code) = scan.recuperator_code.as_deref().filter(|c| !c.trim().is_empty()) {
                let fresh = fetch_by_code::<Recuperator>(self.api.as_ref(), code).await?;
                let latest = self.cohort_tails.latest_for(&scan.child_code);
                let verdict = assess_scan(&scan, latest, |_, child| {
                    fresh.is_active() && fresh.may_collect(child)
                });
                if let ScanVerdict::UnauthorizedPickup { child, recuperator } = verdict {
                    warn!(child = %child, recuperator = %recuperator, "Exit blocked before submission");
                    return Err(Error::UnauthorizedPickup { child, recuperator });
                }
            }
        }

        let receipt = self.api.submit_scan(&scan).await?;
        info!(child = %receipt.event.child_code, scan_type = %receipt.event.scan_type, "Scan accepted");

        let child = &receipt.event.child_code;
        if self.cohort.iter().any(|c| c == child) {
            self.cohort_tails
                .entry(child.clone())
                .or_default()
                .record(&receipt.event);
        }
        // A cohort load started before this scan may miss it
        if self.tracker.in_flight(&QuerySlot::Cohort) {
            if let Some(query) = self.cohort_query.clone() {
                self.refresh_cohort(query)?;
            }
        }

        self.status_message = Some(if receipt.warnings.is_empty() {
            format!("{} recorded for {}", receipt.event.scan_type, child)
        } else {
            let warnings: Vec<String> = receipt.warnings.iter().map(|w| w.to_string()).collect();
            format!("{} recorded for {} ({})", receipt.event.scan_type, child, warnings.join(", "))
        });
        Ok(receipt)
    }

    /// Replace a recuperator's authorized children, then reload recuperators.
    pub async fn assign_authorized_children(
        &mut self,
        recuperator_code: &str,
        child_codes: &[String],
    ) -> Result<()> {
        self.api
            .assign_authorized_children(recuperator_code, child_codes)
            .await?;
        info!(recuperator = %recuperator_code, count = child_codes.len(), "Authorized children assigned");
        self.invalidate(&[EntityKind::Recuperator]);
        Ok(())
    }

    /// Save a parent with its children; may move children and prune grants.
    pub async fn save_parent(&mut self, parent: &Parent) -> Result<Parent> {
        let saved = self.api.save_parent(parent).await?;
        self.invalidate(&[EntityKind::Parent, EntityKind::Child, EntityKind::Recuperator]);
        Ok(saved)
    }

    pub async fn remove_child(&mut self, child_code: &str) -> Result<()> {
        self.api.remove_child(child_code).await?;
        self.invalidate(&[EntityKind::Parent, EntityKind::Child, EntityKind::Recuperator]);
        Ok(())
    }

    pub async fn restore_child(&mut self, child_code: &str) -> Result<()> {
        self.api.restore_child(child_code).await?;
        self.invalidate(&[EntityKind::Parent, EntityKind::Child, EntityKind::Recuperator]);
        Ok(())
    }

    /// Drop cached pages of the kinds and refetch their current queries.
    pub fn invalidate(&mut self, kinds: &[EntityKind]) {
        for kind in kinds {
            match kind {
                EntityKind::Parent => self.parents.directory.invalidate(),
                EntityKind::Child => self.children.directory.invalidate(),
                EntityKind::Recuperator => self.recuperators.directory.invalidate(),
                EntityKind::Agent => self.agents.directory.invalidate(),
            }
            self.refresh(*kind);
        }
    }

    // ===== Background results =====

    /// Helper to send background results, logging any channel errors
    async fn send_update(tx: &mpsc::Sender<ConsoleUpdate>, update: ConsoleUpdate) {
        if let Err(e) = tx.send(update).await {
            error!(error = %e, "Failed to send console update - channel closed");
        }
    }

    /// Check for completed background tasks and process results.
    /// Returns the number of results received.
    pub fn check_background_tasks(&mut self) -> usize {
        let mut updates = Vec::new();
        while let Ok(update) = self.updates_rx.try_recv() {
            updates.push(update);
        }
        let count = updates.len();
        for update in updates {
            self.process_update(update);
        }
        count
    }

    /// Wait until every spawned task has reported back.
    pub async fn settle(&mut self) {
        while self.pending > 0 {
            match self.updates_rx.recv().await {
                Some(update) => self.process_update(update),
                None => break,
            }
        }
    }

    fn process_update(&mut self, update: ConsoleUpdate) {
        self.pending = self.pending.saturating_sub(1);
        match update {
            ConsoleUpdate::Parents(ticket, query, result) => self.apply_page::<Parent>(ticket, query, result),
            ConsoleUpdate::Children(ticket, query, result) => self.apply_page::<Child>(ticket, query, result),
            ConsoleUpdate::Recuperators(ticket, query, result) => {
                self.apply_page::<Recuperator>(ticket, query, result)
            }
            ConsoleUpdate::Agents(ticket, query, result) => self.apply_page::<Agent>(ticket, query, result),
            ConsoleUpdate::PinnedParent(fetch, result) => self.apply_pin::<Parent>(fetch, result),
            ConsoleUpdate::PinnedChild(fetch, result) => self.apply_pin::<Child>(fetch, result),
            ConsoleUpdate::PinnedRecuperator(fetch, result) => self.apply_pin::<Recuperator>(fetch, result),
            ConsoleUpdate::PinnedAgent(fetch, result) => self.apply_pin::<Agent>(fetch, result),
            ConsoleUpdate::Cohort(ticket, result) => self.apply_cohort(ticket, result),
        }
    }

    fn apply_page<T: Tracked>(&mut self, ticket: Ticket<QuerySlot>, query: ListQuery, result: Result<Page<T>>) {
        if !self.tracker.accept(&ticket) {
            return;
        }
        match result {
            Ok(page) => {
                debug!(kind = %T::KIND, page = page.page, items = page.items.len(), "Page loaded");
                let slot = T::slot_mut(self);
                slot.directory.insert(query, page.clone());
                let fetch = slot.show(page);
                if let Some(fetch) = fetch {
                    self.spawn_pin_fetch::<T>(fetch);
                }
            }
            Err(e) => {
                warn!(kind = %T::KIND, error = %e, "Failed to load page");
                self.status_message = Some(format!("Failed to load {}: {}", T::KIND.collection(), e));
            }
        }
    }

    fn apply_pin<T: Tracked>(&mut self, fetch: PinFetch, result: Result<T>) {
        let slot = T::slot_mut(self);
        if slot.resolver.complete_fetch(fetch, result) {
            if let Some(e) = slot.resolver.stale_reference() {
                self.status_message = Some(e.to_string());
            }
        }
    }

    fn apply_cohort(&mut self, ticket: Ticket<QuerySlot>, result: Result<CohortSnapshot>) {
        if !self.tracker.accept(&ticket) {
            return;
        }
        match result {
            Ok(snapshot) => {
                self.cohort = snapshot.children;
                self.cohort_tails = snapshot.tails;
            }
            Err(e) => {
                warn!(error = %e, "Failed to refresh cohort");
                self.status_message = Some(format!("Failed to refresh statistics: {}", e));
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryApi;
    use crate::models::{RelationType, ScanWarning};
    use crate::presence::PresenceState;

    async fn seeded() -> Arc<MemoryApi> {
        let api = Arc::new(MemoryApi::new(2));
        api.save_parent(
            &Parent::new("PAR-001", "Nadia", "Benali")
                .with_child(Child::new("CHD-001", "Yanis", "Benali", ""))
                .with_child(Child::new("CHD-002", "Lina", "Benali", "")),
        )
        .await
        .expect("seed");
        api.save_parent(&Parent::new("PAR-002", "Omar", "Haddad")).await.expect("seed");
        api.save_parent(&Parent::new("PAR-003", "Ines", "Amrani")).await.expect("seed");

        let mut rec = Recuperator::new("REC-001", "Karim", "Saidi", RelationType::UncleAunt, "PAR-001");
        rec.authorized_children = vec!["CHD-001".to_string()];
        api.save_recuperator(&rec).await.expect("seed");
        api.save_recuperator(&Recuperator::new("REC-002", "Hana", "Tazi", RelationType::Nanny, "PAR-001"))
            .await
            .expect("seed");
        api.save_agent(&Agent::new("AGT-001", "Samir", "Khelifi")).await.expect("seed");
        api
    }

    fn console(api: Arc<MemoryApi>) -> Console {
        Console::new(api, &Config::default())
    }

    fn codes<T: Entity>(items: &[&T]) -> Vec<String> {
        items.iter().map(|i| i.code().to_string()).collect()
    }

    // ===== Directory reads =====

    #[tokio::test]
    async fn test_search_loads_page_in_background() {
        let mut console = console(seeded().await);
        console.search(ListQuery::new(EntityKind::Parent));
        assert_eq!(console.pending_tasks(), 1);
        console.settle().await;

        let slot = console.slot::<Parent>();
        assert_eq!(slot.page().items.len(), 2);
        assert_eq!(slot.page().total, 3);
    }

    #[tokio::test]
    async fn test_superseded_search_is_discarded() {
        let mut console = console(seeded().await);
        console.search(ListQuery::new(EntityKind::Parent).search("benali"));
        console.search(ListQuery::new(EntityKind::Parent).search("haddad"));
        console.settle().await;

        let page = console.slot::<Parent>().page();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].code, "PAR-002");
        assert_eq!(console.slot::<Parent>().query().search, "haddad");
    }

    #[tokio::test]
    async fn test_polling_applies_only_newest_search() {
        let mut console = console(seeded().await);
        console.search(ListQuery::new(EntityKind::Parent).search("benali"));
        console.search(ListQuery::new(EntityKind::Parent).search("haddad"));
        assert_eq!(console.pending_tasks(), 2);

        let mut received = 0;
        for _ in 0..200 {
            received += console.check_background_tasks();
            if console.pending_tasks() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert_eq!(received, 2);
        assert_eq!(console.pending_tasks(), 0);
        assert_eq!(codes(&console.slot::<Parent>().page().items.iter().collect::<Vec<_>>()), vec!["PAR-002"]);
        assert_eq!(console.slot::<Parent>().query().search, "haddad");
        // Nothing left behind for a later poll
        assert_eq!(console.check_background_tasks(), 0);
    }

    #[tokio::test]
    async fn test_cached_page_served_without_task() {
        let mut console = console(seeded().await);
        console.search(ListQuery::new(EntityKind::Parent));
        console.settle().await;
        console.search(ListQuery::new(EntityKind::Parent).page(2));
        console.settle().await;

        console.search(ListQuery::new(EntityKind::Parent));
        assert_eq!(console.pending_tasks(), 0);
        assert_eq!(console.slot::<Parent>().page().page, 1);
    }

    // ===== Pins =====

    #[tokio::test]
    async fn test_pin_off_page_is_fetched_and_prepended() {
        let mut console = console(seeded().await);
        console.search(ListQuery::new(EntityKind::Parent).page(2));
        console.settle().await;
        console.pin(EntityKind::Parent, Some("PAR-003".to_string()));
        console.settle().await;

        let list = console.slot::<Parent>().selection_list();
        assert_eq!(codes(&list), vec!["PAR-003", "PAR-002"]);
        let erased = console.selection_list(EntityKind::Parent);
        assert_eq!(erased[0].code(), "PAR-003");
    }

    #[tokio::test]
    async fn test_pin_of_missing_record_degrades_to_page() {
        let mut console = console(seeded().await);
        console.search(ListQuery::new(EntityKind::Parent).page(2));
        console.settle().await;
        console.pin(EntityKind::Parent, Some("PAR-404".to_string()));
        console.settle().await;

        assert_eq!(codes(&console.slot::<Parent>().selection_list()), vec!["PAR-002"]);
        assert!(console.stale_reference(EntityKind::Parent).is_some());
        assert!(console.status_message.is_some());
    }

    // ===== Scans =====

    #[tokio::test]
    async fn test_submit_scan_blocks_unauthorized_exit() {
        let api = seeded().await;
        let mut console = console(api.clone());
        console
            .submit_scan(ProposedScan::entry("CHD-002", "AGT-001"))
            .await
            .expect("entry");

        let err = console
            .submit_scan(ProposedScan::exit("CHD-002", "AGT-001", Some("REC-001".to_string())))
            .await
            .expect_err("not authorized for CHD-002");
        assert!(matches!(err, Error::UnauthorizedPickup { .. }));
        assert_eq!(api.scan_count_for("CHD-002").await, 1);
    }

    #[tokio::test]
    async fn test_precheck_uses_fresh_grants() {
        let api = seeded().await;
        let mut console = console(api.clone());
        console.search(ListQuery::new(EntityKind::Recuperator));
        console.settle().await;

        // Grant changes behind the cached recuperator page
        api.assign_authorized_children("REC-002", &["CHD-002".to_string()])
            .await
            .expect("assign");
        let receipt = console
            .submit_scan(ProposedScan::exit("CHD-002", "AGT-001", Some("REC-002".to_string())))
            .await
            .expect("fresh grant honored");
        assert!(receipt.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_unattributed_exit_sets_warning_status() {
        let mut console = console(seeded().await);
        let receipt = console
            .submit_scan(ProposedScan::exit("CHD-001", "AGT-001", None))
            .await
            .expect("accepted");
        assert!(receipt.has_warning(ScanWarning::UnattributedExit));
        assert!(console.status_message.is_some());
    }

    // ===== Cohort =====

    #[tokio::test]
    async fn test_cohort_stats_follow_scans() {
        let mut console = console(seeded().await);
        console
            .refresh_cohort(ListQuery::new(EntityKind::Child))
            .expect("children query");
        console.settle().await;
        assert_eq!(console.cohort().len(), 2);
        assert_eq!(console.cohort_stats().no_activity, 2);

        console
            .submit_scan(ProposedScan::entry("CHD-001", "AGT-001"))
            .await
            .expect("entry");
        let stats = console.cohort_stats();
        assert_eq!(stats.present, 1);
        assert_eq!(stats.no_activity, 1);
        assert_eq!(stats.present + stats.exited + stats.no_activity, 2);
        assert_eq!(console.activity("CHD-001").state, PresenceState::Present);
    }

    #[tokio::test]
    async fn test_cohort_requires_children_query() {
        let mut console = console(seeded().await);
        assert!(console.refresh_cohort(ListQuery::new(EntityKind::Parent)).is_err());
        assert_eq!(console.pending_tasks(), 0);
    }

    // ===== Mutations =====

    #[tokio::test]
    async fn test_assign_invalidates_recuperators() {
        let mut console = console(seeded().await);
        console.search(ListQuery::new(EntityKind::Recuperator));
        console.settle().await;

        console
            .assign_authorized_children("REC-002", &["CHD-001".to_string(), "CHD-002".to_string()])
            .await
            .expect("assign");
        console.settle().await;

        let rec = console
            .slot::<Recuperator>()
            .page()
            .items
            .iter()
            .find(|r| r.code == "REC-002")
            .cloned()
            .expect("listed");
        assert_eq!(rec.authorized_children, vec!["CHD-001", "CHD-002"]);
    }

    #[tokio::test]
    async fn test_assign_outside_family_is_hard_failure() {
        let mut console = console(seeded().await);
        let err = console
            .assign_authorized_children("REC-001", &["CHD-999".to_string()])
            .await
            .expect_err("unknown child");
        assert!(matches!(err, Error::ReferentialViolation { .. }));
    }
}
