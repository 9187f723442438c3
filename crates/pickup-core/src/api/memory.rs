//! In-process implementation of the pickup API.
//!
//! `MemoryApi` keeps parents (with their children), recuperators, agents, the
//! authorization set and the scan ledger behind one lock, and applies the
//! same rules the backend does. Recuperator records are always served with
//! `authorized_children` read from the authorization set.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::PickupApi;
use crate::authorization::AuthorizationSet;
use crate::error::{Error, Result};
use crate::ledger::ScanLedger;
use crate::models::{
    Agent, Child, Entity, EntityKind, EntityRecord, ListQuery, Page, PageCounts, Parent,
    ProposedScan, Recuperator, ScanEvent, ScanReceipt, ScanType,
};
use crate::utils::cmp_ignore_case;

const DEFAULT_PER_PAGE: u32 = 15;

#[derive(Debug, Default)]
struct State {
    parents: Vec<Parent>,
    recuperators: Vec<Recuperator>,
    agents: Vec<Agent>,
    authorizations: AuthorizationSet,
    ledger: ScanLedger,
    last_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    /// (parent index, child index) of a child, tombstoned or not
    fn locate_child(&self, code: &str) -> Option<(usize, usize)> {
        self.parents.iter().enumerate().find_map(|(pi, p)| {
            p.children
                .iter()
                .position(|c| c.code == code)
                .map(|ci| (pi, ci))
        })
    }

    fn child(&self, code: &str) -> Option<&Child> {
        self.locate_child(code)
            .map(|(pi, ci)| &self.parents[pi].children[ci])
    }

    fn recuperator(&self, code: &str) -> Option<&Recuperator> {
        self.recuperators.iter().find(|r| r.code == code)
    }

    fn agent(&self, code: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.code == code)
    }

    /// Recuperator as served: grants come from the authorization set.
    fn serve_recuperator(&self, rec: &Recuperator) -> Recuperator {
        let mut served = rec.clone();
        served.authorized_children = self
            .authorizations
            .authorized_children(&rec.code)
            .into_iter()
            .map(String::from)
            .collect();
        served
    }

    fn records(&self, kind: EntityKind) -> Vec<EntityRecord> {
        match kind {
            EntityKind::Parent => self.parents.iter().cloned().map(EntityRecord::Parent).collect(),
            EntityKind::Child => self
                .parents
                .iter()
                .flat_map(|p| p.children.iter().cloned())
                .map(EntityRecord::Child)
                .collect(),
            EntityKind::Recuperator => self
                .recuperators
                .iter()
                .map(|r| EntityRecord::Recuperator(self.serve_recuperator(r)))
                .collect(),
            EntityKind::Agent => self.agents.iter().cloned().map(EntityRecord::Agent).collect(),
        }
    }
}

fn record_flags(record: &EntityRecord) -> (bool, bool) {
    match record {
        EntityRecord::Parent(p) => (p.is_active(), p.is_deleted()),
        EntityRecord::Child(c) => (c.is_active(), c.is_deleted()),
        EntityRecord::Recuperator(r) => (r.is_active(), r.is_deleted()),
        EntityRecord::Agent(a) => (a.is_active(), a.is_deleted()),
    }
}

fn record_matches(record: &EntityRecord, query: &str) -> bool {
    match record {
        EntityRecord::Parent(p) => p.matches_search(query),
        EntityRecord::Child(c) => c.matches_search(query),
        EntityRecord::Recuperator(r) => r.matches_search(query),
        EntityRecord::Agent(a) => a.matches_search(query),
    }
}

fn record_sort_name(record: &EntityRecord) -> (&str, &str) {
    match record {
        EntityRecord::Parent(p) => (&p.last_name, &p.first_name),
        EntityRecord::Child(c) => (&c.last_name, &c.first_name),
        EntityRecord::Recuperator(r) => (&r.last_name, &r.first_name),
        EntityRecord::Agent(a) => (&a.last_name, &a.first_name),
    }
}

fn require_code(kind: EntityKind, code: &str) -> Result<()> {
    if code.trim().is_empty() {
        Err(Error::Validation(format!("{} code must not be empty", kind)))
    } else {
        Ok(())
    }
}

pub struct MemoryApi {
    state: RwLock<State>,
    per_page: u32,
}

impl Default for MemoryApi {
    fn default() -> Self {
        Self::new(DEFAULT_PER_PAGE)
    }
}

impl MemoryApi {
    pub fn new(per_page: u32) -> Self {
        Self {
            state: RwLock::new(State::default()),
            per_page: per_page.max(1),
        }
    }

    /// Register a recuperator and apply its `authorized_children` selection.
    pub async fn save_recuperator(&self, recuperator: &Recuperator) -> Result<Recuperator> {
        require_code(EntityKind::Recuperator, &recuperator.code)?;
        let mut state = self.state.write().await;
        let parent_exists = state
            .parents
            .iter()
            .any(|p| p.code == recuperator.parent_code && p.deleted_at.is_none());
        if !parent_exists {
            return Err(Error::not_found(EntityKind::Parent, &recuperator.parent_code));
        }

        // Validate the selection before touching anything
        let mut staged = state.authorizations.clone();
        staged.link_recuperator(&recuperator.code, &recuperator.parent_code);
        staged.assign(&recuperator.code, &recuperator.authorized_children)?;
        state.authorizations = staged;

        let mut stored = recuperator.clone();
        match state.recuperators.iter().position(|r| r.code == recuperator.code) {
            Some(i) => {
                stored.id = state.recuperators[i].id;
                state.recuperators[i] = stored.clone();
            }
            None => {
                stored.id = state.next_id();
                state.recuperators.push(stored.clone());
            }
        }
        debug!(recuperator = %stored.code, parent = %stored.parent_code, "Recuperator saved");
        Ok(state.serve_recuperator(&stored))
    }

    pub async fn set_recuperator_active(&self, code: &str, active: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let rec = state
            .recuperators
            .iter_mut()
            .find(|r| r.code == code && r.deleted_at.is_none())
            .ok_or_else(|| Error::not_found(EntityKind::Recuperator, code))?;
        rec.active = active;
        Ok(())
    }

    /// Soft-delete a recuperator; its grants are dropped and not restored later.
    pub async fn remove_recuperator(&self, code: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let rec = state
            .recuperators
            .iter_mut()
            .find(|r| r.code == code && r.deleted_at.is_none())
            .ok_or_else(|| Error::not_found(EntityKind::Recuperator, code))?;
        rec.deleted_at = Some(Utc::now());
        state.authorizations.remove_recuperator(code);
        Ok(())
    }

    pub async fn save_agent(&self, agent: &Agent) -> Result<Agent> {
        require_code(EntityKind::Agent, &agent.code)?;
        let mut state = self.state.write().await;
        let mut stored = agent.clone();
        match state.agents.iter().position(|a| a.code == agent.code) {
            Some(i) => {
                stored.id = state.agents[i].id;
                state.agents[i] = stored.clone();
            }
            None => {
                stored.id = state.next_id();
                state.agents.push(stored.clone());
            }
        }
        Ok(stored)
    }

    /// Submit a scan with an explicit server time.
    pub async fn submit_scan_at(&self, scan: &ProposedScan, at: DateTime<Utc>) -> Result<ScanReceipt> {
        let mut state = self.state.write().await;

        if state.child(&scan.child_code).map(|c| c.is_deleted()).unwrap_or(true) {
            return Err(Error::not_found(EntityKind::Child, &scan.child_code));
        }
        if !state.agent(&scan.agent_code).map(|a| a.is_active()).unwrap_or(false) {
            return Err(Error::not_found(EntityKind::Agent, &scan.agent_code));
        }
        if scan.scan_type == ScanType::Exit {
            if let Some(code) = scan.recuperator_code.as_deref().filter(|c| !c.trim().is_empty()) {
                if state.recuperator(code).map(|r| r.is_deleted()).unwrap_or(true) {
                    return Err(Error::not_found(EntityKind::Recuperator, code));
                }
            }
        }

        let State {
            recuperators,
            authorizations,
            ledger,
            ..
        } = &mut *state;
        // Inactive recuperators keep their grants but may not collect
        ledger.submit_checked(scan, at, |rec, child| {
            authorizations.is_authorized(rec, child)
                && recuperators.iter().any(|r| r.code == rec && r.is_active())
        })
    }

    pub async fn scan_count_for(&self, child_code: &str) -> usize {
        self.state.read().await.ledger.len_for(child_code)
    }
}

#[async_trait]
impl PickupApi for MemoryApi {
    async fn list_entities(&self, query: &ListQuery) -> Result<Page<EntityRecord>> {
        let state = self.state.read().await;
        let search = query.search.to_lowercase();

        let matching: Vec<EntityRecord> = state
            .records(query.kind)
            .into_iter()
            .filter(|r| record_matches(r, &search))
            .collect();

        let mut counts = PageCounts::default();
        for record in &matching {
            match record_flags(record) {
                (_, true) => counts.deleted += 1,
                (true, false) => counts.active += 1,
                (false, false) => counts.inactive += 1,
            }
        }

        let mut filtered: Vec<EntityRecord> = matching
            .into_iter()
            .filter(|r| {
                let (active, deleted) = record_flags(r);
                query.status.admits(active, deleted)
            })
            .collect();
        filtered.sort_by(|a, b| {
            let (a_last, a_first) = record_sort_name(a);
            let (b_last, b_first) = record_sort_name(b);
            cmp_ignore_case(a_last, b_last)
                .then_with(|| cmp_ignore_case(a_first, b_first))
                .then_with(|| a.code().cmp(b.code()))
        });

        Ok(Page::paginate(filtered, query.page, self.per_page, counts))
    }

    async fn get_entity_by_code(&self, kind: EntityKind, code: &str) -> Result<EntityRecord> {
        require_code(kind, code)?;
        let state = self.state.read().await;
        let record = match kind {
            EntityKind::Parent => state
                .parents
                .iter()
                .find(|p| p.code == code)
                .filter(|p| !p.is_deleted())
                .cloned()
                .map(EntityRecord::Parent),
            EntityKind::Child => state
                .child(code)
                .filter(|c| !c.is_deleted())
                .cloned()
                .map(EntityRecord::Child),
            EntityKind::Recuperator => state
                .recuperator(code)
                .filter(|r| !r.is_deleted())
                .map(|r| EntityRecord::Recuperator(state.serve_recuperator(r))),
            EntityKind::Agent => state
                .agent(code)
                .filter(|a| !a.is_deleted())
                .cloned()
                .map(EntityRecord::Agent),
        };
        record.ok_or_else(|| Error::not_found(kind, code))
    }

    async fn submit_scan(&self, scan: &ProposedScan) -> Result<ScanReceipt> {
        self.submit_scan_at(scan, Utc::now()).await
    }

    async fn list_scans_for_child(&self, child_code: &str, page: u32) -> Result<Page<ScanEvent>> {
        let state = self.state.read().await;
        if state.child(child_code).is_none() {
            return Err(Error::not_found(EntityKind::Child, child_code));
        }
        Ok(state.ledger.page_for(child_code, page, self.per_page))
    }

    async fn assign_authorized_children(
        &self,
        recuperator_code: &str,
        child_codes: &[String],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if state
            .recuperator(recuperator_code)
            .map(|r| r.is_deleted())
            .unwrap_or(true)
        {
            return Err(Error::not_found(EntityKind::Recuperator, recuperator_code));
        }
        state.authorizations.assign(recuperator_code, child_codes)
    }

    async fn save_parent(&self, parent: &Parent) -> Result<Parent> {
        require_code(EntityKind::Parent, &parent.code)?;
        let mut seen = HashSet::new();
        for child in &parent.children {
            require_code(EntityKind::Child, &child.code)?;
            if !seen.insert(child.code.as_str()) {
                return Err(Error::Validation(format!("child {} listed twice", child.code)));
            }
        }

        let mut state = self.state.write().await;
        let existing = state.parents.iter().position(|p| p.code == parent.code);

        // Children dropped from the form are tombstoned
        if let Some(pi) = existing {
            let dropped: Vec<String> = state.parents[pi]
                .children
                .iter()
                .filter(|c| c.deleted_at.is_none() && !seen.contains(c.code.as_str()))
                .map(|c| c.code.clone())
                .collect();
            for code in dropped {
                if let Some(child) = state.parents[pi].children.iter_mut().find(|c| c.code == code) {
                    child.deleted_at = Some(Utc::now());
                }
                state.authorizations.remove_child(&code);
            }
        }

        let mut saved_children = Vec::with_capacity(parent.children.len());
        for child in &parent.children {
            let mut stored = child.clone();
            stored.parent_code = parent.code.clone();

            match state.locate_child(&child.code) {
                Some((pi, ci)) if state.parents[pi].code != parent.code => {
                    // Moving between families: detach from the previous owner
                    let previous = state.parents[pi].children.remove(ci);
                    stored.id = previous.id;
                    info!(child = %child.code, from = %previous.parent_code, to = %parent.code, "Child moved");
                }
                Some((pi, ci)) => stored.id = state.parents[pi].children[ci].id,
                None => stored.id = state.next_id(),
            }

            if stored.deleted_at.is_some() {
                state.authorizations.remove_child(&stored.code);
            } else {
                state.authorizations.set_owner(&stored.code, &parent.code);
            }
            saved_children.push(stored);
        }

        let mut saved = parent.clone();
        saved.children = saved_children;
        match existing {
            Some(pi) => {
                saved.id = state.parents[pi].id;
                // Keep tombstones of children that are no longer on the form
                let tombstones: Vec<Child> = state.parents[pi]
                    .children
                    .iter()
                    .filter(|c| !seen.contains(c.code.as_str()))
                    .cloned()
                    .collect();
                saved.children.extend(tombstones);
                state.parents[pi] = saved.clone();
            }
            None => {
                saved.id = state.next_id();
                state.parents.push(saved.clone());
            }
        }
        debug!(parent = %saved.code, children = saved.children.len(), "Parent saved");
        Ok(saved)
    }

    async fn remove_child(&self, child_code: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let (pi, ci) = state
            .locate_child(child_code)
            .filter(|&(pi, ci)| state.parents[pi].children[ci].deleted_at.is_none())
            .ok_or_else(|| Error::not_found(EntityKind::Child, child_code))?;
        state.parents[pi].children[ci].deleted_at = Some(Utc::now());
        let pruned = state.authorizations.remove_child(child_code);
        info!(child = %child_code, pruned = pruned.len(), "Child removed");
        Ok(())
    }

    async fn restore_child(&self, child_code: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let (pi, ci) = state
            .locate_child(child_code)
            .ok_or_else(|| Error::not_found(EntityKind::Child, child_code))?;
        let parent_code = state.parents[pi].code.clone();
        state.parents[pi].children[ci].deleted_at = None;
        // Restoring ownership only; previous grants stay revoked
        state.authorizations.set_owner(child_code, &parent_code);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RelationType, ScanWarning, StatusFilter};
    use chrono::TimeZone;

    async fn seeded() -> MemoryApi {
        let api = MemoryApi::new(2);
        api.save_parent(
            &Parent::new("PAR-001", "Nadia", "Benali")
                .with_child(Child::new("CHD-001", "Yanis", "Benali", ""))
                .with_child(Child::new("CHD-002", "Lina", "Benali", "")),
        )
        .await
        .expect("parent 1");
        api.save_parent(
            &Parent::new("PAR-002", "Omar", "Haddad").with_child(Child::new("CHD-010", "Sara", "Haddad", "")),
        )
        .await
        .expect("parent 2");
        api.save_parent(&Parent::new("PAR-003", "Ines", "Amrani")).await.expect("parent 3");

        let mut rec = Recuperator::new("REC-001", "Karim", "Saidi", RelationType::UncleAunt, "PAR-001");
        rec.authorized_children = vec!["CHD-001".to_string()];
        api.save_recuperator(&rec).await.expect("recuperator");
        api.save_agent(&Agent::new("AGT-001", "Samir", "Khelifi")).await.expect("agent");
        api
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_list_paginates_sorted_by_name() {
        let api = seeded().await;
        let page1 = api.list_entities(&ListQuery::new(EntityKind::Parent)).await.expect("page 1");
        let codes: Vec<&str> = page1.items.iter().map(|r| r.code()).collect();
        assert_eq!(codes, vec!["PAR-003", "PAR-001"]); // Amrani, Benali
        assert_eq!(page1.last_page, 2);
        assert_eq!(page1.total, 3);

        let page2 = api
            .list_entities(&ListQuery::new(EntityKind::Parent).page(2))
            .await
            .expect("page 2");
        assert_eq!(page2.items.len(), 1);
        assert_eq!(page2.items[0].code(), "PAR-002");
    }

    #[tokio::test]
    async fn test_list_search_and_status_counts() {
        let api = seeded().await;
        api.remove_child("CHD-002").await.expect("remove");

        let active = api
            .list_entities(&ListQuery::new(EntityKind::Child).search("benali"))
            .await
            .expect("search");
        assert_eq!(active.total, 1);
        assert_eq!(active.counts, PageCounts { active: 1, inactive: 0, deleted: 1 });

        let deleted = api
            .list_entities(&ListQuery::new(EntityKind::Child).status(StatusFilter::Deleted))
            .await
            .expect("deleted");
        assert_eq!(deleted.items.len(), 1);
        assert_eq!(deleted.items[0].code(), "CHD-002");
    }

    #[tokio::test]
    async fn test_get_by_code_hides_tombstones() {
        let api = seeded().await;
        assert!(api.get_entity_by_code(EntityKind::Child, "CHD-002").await.is_ok());
        api.remove_child("CHD-002").await.expect("remove");
        let err = api
            .get_entity_by_code(EntityKind::Child, "CHD-002")
            .await
            .expect_err("tombstoned");
        assert!(matches!(err, Error::NotFound { kind: EntityKind::Child, .. }));

        api.restore_child("CHD-002").await.expect("restore");
        assert!(api.get_entity_by_code(EntityKind::Child, "CHD-002").await.is_ok());
    }

    #[tokio::test]
    async fn test_recuperator_served_with_current_grants() {
        let api = seeded().await;
        api.assign_authorized_children("REC-001", &["CHD-001".to_string(), "CHD-002".to_string()])
            .await
            .expect("assign");
        let record = api
            .get_entity_by_code(EntityKind::Recuperator, "REC-001")
            .await
            .expect("recuperator");
        let rec: Recuperator = record.into_entity().expect("kind");
        assert_eq!(rec.authorized_children, vec!["CHD-001", "CHD-002"]);
    }

    #[tokio::test]
    async fn test_assign_rejects_children_of_other_parent() {
        let api = seeded().await;
        let err = api
            .assign_authorized_children("REC-001", &["CHD-010".to_string()])
            .await
            .expect_err("other family");
        assert!(err.is_hard_failure());
    }

    #[tokio::test]
    async fn test_save_recuperator_validates_selection() {
        let api = seeded().await;
        let mut rec = Recuperator::new("REC-002", "Hana", "Tazi", RelationType::Nanny, "PAR-001");
        rec.authorized_children = vec!["CHD-010".to_string()];
        assert!(matches!(
            api.save_recuperator(&rec).await,
            Err(Error::ReferentialViolation { .. })
        ));
        // Nothing registered on failure
        assert!(api.get_entity_by_code(EntityKind::Recuperator, "REC-002").await.is_err());

        rec.parent_code = "PAR-404".to_string();
        assert!(matches!(api.save_recuperator(&rec).await, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_scan_rules() {
        let api = seeded().await;
        api.submit_scan_at(&ProposedScan::entry("CHD-001", "AGT-001"), t(0))
            .await
            .expect("entry");

        let unknown_agent = api
            .submit_scan_at(&ProposedScan::entry("CHD-001", "AGT-404"), t(1))
            .await
            .expect_err("unknown agent");
        assert!(matches!(unknown_agent, Error::NotFound { kind: EntityKind::Agent, .. }));

        let unknown_rec = api
            .submit_scan_at(&ProposedScan::exit("CHD-001", "AGT-001", Some("REC-404".to_string())), t(2))
            .await
            .expect_err("unknown recuperator");
        assert!(matches!(unknown_rec, Error::NotFound { kind: EntityKind::Recuperator, .. }));

        api.set_recuperator_active("REC-001", false).await.expect("deactivate");
        let inactive = api
            .submit_scan_at(&ProposedScan::exit("CHD-001", "AGT-001", Some("REC-001".to_string())), t(3))
            .await
            .expect_err("inactive recuperator");
        assert!(matches!(inactive, Error::UnauthorizedPickup { .. }));
        assert_eq!(api.scan_count_for("CHD-001").await, 1);

        api.set_recuperator_active("REC-001", true).await.expect("reactivate");
        let receipt = api
            .submit_scan_at(&ProposedScan::exit("CHD-001", "AGT-001", Some("REC-001".to_string())), t(4))
            .await
            .expect("authorized exit");
        assert!(receipt.warnings.is_empty());

        let unattributed = api
            .submit_scan_at(&ProposedScan::exit("CHD-002", "AGT-001", None), t(5))
            .await
            .expect("unattributed exit");
        assert!(unattributed.has_warning(ScanWarning::UnattributedExit));
    }

    #[tokio::test]
    async fn test_save_parent_moves_child_and_prunes() {
        let api = seeded().await;
        let moved = Parent::new("PAR-002", "Omar", "Haddad")
            .with_child(Child::new("CHD-010", "Sara", "Haddad", ""))
            .with_child(Child::new("CHD-001", "Yanis", "Benali", ""));
        let saved = api.save_parent(&moved).await.expect("save");
        assert_eq!(saved.children.len(), 2);

        let rec: Recuperator = api
            .get_entity_by_code(EntityKind::Recuperator, "REC-001")
            .await
            .expect("recuperator")
            .into_entity()
            .expect("kind");
        assert!(rec.authorized_children.is_empty());

        let old: Parent = api
            .get_entity_by_code(EntityKind::Parent, "PAR-001")
            .await
            .expect("old parent")
            .into_entity()
            .expect("kind");
        assert_eq!(old.children.iter().map(|c| c.code.as_str()).collect::<Vec<_>>(), vec!["CHD-002"]);
    }

    #[tokio::test]
    async fn test_save_parent_tombstones_dropped_children() {
        let api = seeded().await;
        let edited = Parent::new("PAR-001", "Nadia", "Benali").with_child(Child::new("CHD-001", "Yanis", "Benali", ""));
        let saved = api.save_parent(&edited).await.expect("save");
        let dropped = saved.children.iter().find(|c| c.code == "CHD-002").expect("tombstone kept");
        assert!(dropped.is_deleted());

        let duplicate = Parent::new("PAR-001", "Nadia", "Benali")
            .with_child(Child::new("CHD-001", "Yanis", "Benali", ""))
            .with_child(Child::new("CHD-001", "Yanis", "Benali", ""));
        assert!(matches!(api.save_parent(&duplicate).await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_removed_recuperator_cannot_collect() {
        let api = seeded().await;
        api.remove_recuperator("REC-001").await.expect("remove");
        let err = api
            .submit_scan_at(&ProposedScan::exit("CHD-001", "AGT-001", Some("REC-001".to_string())), t(0))
            .await
            .expect_err("deleted recuperator");
        assert!(matches!(err, Error::NotFound { kind: EntityKind::Recuperator, .. }));
    }
}
