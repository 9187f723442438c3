//! Append-only scan event ledger.
//!
//! Events are totally ordered by `(scanned_at, id)`. Ids are assigned from a
//! monotonic counter and timestamps are clamped so they never go backwards,
//! which keeps append order and ledger order identical.
//!
//! The ledger does not deduplicate repeated scans; it only reports them as
//! `RepeatedScan` warnings and leaves suppression to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use tracing::{info, warn};

use crate::api::PickupApi;
use crate::authorization::AuthorizationSet;
use crate::error::{Error, Result};
use crate::models::{Page, PageCounts, ProposedScan, ScanEvent, ScanReceipt};
use crate::presence::{assess_scan, ChildTail, LedgerView, ScanCounts, ScanVerdict};

#[derive(Debug, Clone, Default)]
pub struct ScanLedger {
    events: Vec<ScanEvent>,
    /// child code -> positions in `events`, oldest first
    positions: HashMap<String, Vec<usize>>,
    tails: HashMap<String, ChildTail>,
    last_id: u64,
}

impl ScanLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a scan, validating exits against the authorization set.
    pub fn submit(
        &mut self,
        scan: &ProposedScan,
        authorizations: &AuthorizationSet,
        at: DateTime<Utc>,
    ) -> Result<ScanReceipt> {
        self.submit_checked(scan, at, |rec, child| authorizations.is_authorized(rec, child))
    }

    /// Submit with a caller-supplied authorization predicate.
    ///
    /// A rejected scan leaves the ledger untouched.
    pub fn submit_checked(
        &mut self,
        scan: &ProposedScan,
        at: DateTime<Utc>,
        is_authorized: impl Fn(&str, &str) -> bool,
    ) -> Result<ScanReceipt> {
        if scan.child_code.trim().is_empty() || scan.agent_code.trim().is_empty() {
            return Err(Error::Validation("scan needs a child and an agent".to_string()));
        }

        match assess_scan(scan, self.latest_for(&scan.child_code), is_authorized) {
            ScanVerdict::UnauthorizedPickup { child, recuperator } => {
                warn!(child = %child, recuperator = %recuperator, "Unauthorized pickup rejected");
                Err(Error::UnauthorizedPickup { child, recuperator })
            }
            ScanVerdict::Accept(warnings) => {
                let event = self.append(scan, at);
                info!(
                    id = event.id,
                    child = %event.child_code,
                    scan_type = %event.scan_type,
                    warnings = ?warnings,
                    "Scan appended"
                );
                Ok(ScanReceipt { event, warnings })
            }
        }
    }

    fn append(&mut self, scan: &ProposedScan, at: DateTime<Utc>) -> ScanEvent {
        self.last_id += 1;
        let scanned_at = match self.events.last() {
            Some(last) if last.scanned_at > at => last.scanned_at,
            _ => at,
        };
        let event = ScanEvent {
            id: self.last_id,
            child_code: scan.child_code.clone(),
            recuperator_code: scan
                .recuperator_code
                .clone()
                .filter(|r| !r.trim().is_empty()),
            agent_code: scan.agent_code.clone(),
            scan_type: scan.scan_type,
            scanned_at,
        };

        self.positions
            .entry(event.child_code.clone())
            .or_default()
            .push(self.events.len());
        self.tails
            .entry(event.child_code.clone())
            .or_default()
            .record(&event);
        self.events.push(event.clone());
        event
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len_for(&self, child_code: &str) -> usize {
        self.positions.get(child_code).map(Vec::len).unwrap_or(0)
    }

    /// All events in ledger order.
    pub fn iter(&self) -> impl Iterator<Item = &ScanEvent> {
        self.events.iter()
    }

    /// The child's events, most recent first.
    pub fn events_for<'a>(&'a self, child_code: &str) -> impl Iterator<Item = &'a ScanEvent> + 'a {
        self.positions
            .get(child_code)
            .into_iter()
            .flat_map(|positions| positions.iter().rev())
            .map(move |&i| &self.events[i])
    }

    /// One page of the child's events, most recent first.
    pub fn page_for(&self, child_code: &str, page: u32, per_page: u32) -> Page<ScanEvent> {
        let events: Vec<ScanEvent> = self.events_for(child_code).cloned().collect();
        Page::paginate(events, page, per_page, PageCounts::default())
    }

    pub fn tail(&self, child_code: &str) -> ChildTail {
        self.tails.get(child_code).cloned().unwrap_or_default()
    }
}

impl LedgerView for ScanLedger {
    fn latest_for(&self, child_code: &str) -> Option<&ScanEvent> {
        self.tails.get(child_code).and_then(|t| t.latest.as_ref())
    }

    fn counts_for(&self, child_code: &str) -> ScanCounts {
        self.tails.get(child_code).map(|t| t.counts).unwrap_or_default()
    }
}

/// Lazily page through a child's scan history, most recent first.
/// Pages are only requested as the stream is polled.
pub fn scan_history(
    api: Arc<dyn PickupApi>,
    child_code: String,
) -> impl Stream<Item = Result<ScanEvent>> + Send {
    struct Cursor {
        api: Arc<dyn PickupApi>,
        child_code: String,
        next_page: Option<u32>,
    }

    let cursor = Cursor {
        api,
        child_code,
        next_page: Some(1),
    };

    stream::unfold(cursor, |mut cursor| async move {
        let page_no = cursor.next_page?;
        match cursor.api.list_scans_for_child(&cursor.child_code, page_no).await {
            Ok(page) => {
                cursor.next_page = (page.has_next() && !page.items.is_empty()).then(|| page_no + 1);
                let items: Vec<Result<ScanEvent>> = page.items.into_iter().map(Ok).collect();
                Some((stream::iter(items), cursor))
            }
            Err(e) => {
                cursor.next_page = None;
                Some((stream::iter(vec![Err(e)]), cursor))
            }
        }
    })
    .flatten()
}

/// Fetch a child's full history and summarize it.
pub async fn fetch_tail(api: Arc<dyn PickupApi>, child_code: &str) -> Result<ChildTail> {
    let events: Vec<ScanEvent> = scan_history(api, child_code.to_string()).try_collect().await?;
    Ok(ChildTail::from_events(&events))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Child, Parent, Recuperator, RelationType, ScanWarning};
    use crate::presence::{presence_of, PresenceState};
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn authorizations() -> AuthorizationSet {
        let parent = Parent::new("PAR-001", "Nadia", "Benali")
            .with_child(Child::new("CHD-001", "Yanis", "Benali", ""));
        let mut r1 = Recuperator::new("REC-001", "Karim", "Saidi", RelationType::UncleAunt, "PAR-001");
        r1.authorized_children = vec!["CHD-001".to_string()];
        let r2 = Recuperator::new("REC-002", "Hana", "Tazi", RelationType::Nanny, "PAR-001");
        AuthorizationSet::from_directory([&parent], [&r1, &r2])
    }

    #[test]
    fn test_entry_without_recuperator_accepted() {
        let mut ledger = ScanLedger::new();
        let receipt = ledger
            .submit(&ProposedScan::entry("CHD-001", "AGT-001"), &authorizations(), t(0))
            .expect("entry accepted");
        assert_eq!(receipt.event.id, 1);
        assert!(receipt.warnings.is_empty());
        assert_eq!(presence_of(ledger.latest_for("CHD-001")), PresenceState::Present);
    }

    #[test]
    fn test_unauthorized_exit_leaves_ledger_unchanged() {
        let auth = authorizations();
        let mut ledger = ScanLedger::new();
        ledger.submit(&ProposedScan::entry("CHD-001", "AGT-001"), &auth, t(0)).expect("entry");

        let before = ledger.len_for("CHD-001");
        let exit = ProposedScan::exit("CHD-001", "AGT-001", Some("REC-002".to_string()));
        let err = ledger.submit(&exit, &auth, t(60)).expect_err("must reject");
        assert!(matches!(err, Error::UnauthorizedPickup { ref recuperator, .. } if recuperator == "REC-002"));
        assert_eq!(ledger.len_for("CHD-001"), before);
        assert_eq!(presence_of(ledger.latest_for("CHD-001")), PresenceState::Present);
    }

    #[test]
    fn test_authorized_exit_and_unattributed_warning() {
        let auth = authorizations();
        let mut ledger = ScanLedger::new();
        ledger.submit(&ProposedScan::entry("CHD-001", "AGT-001"), &auth, t(0)).expect("entry");

        let exit = ProposedScan::exit("CHD-001", "AGT-001", Some("REC-001".to_string()));
        let receipt = ledger.submit(&exit, &auth, t(60)).expect("authorized exit");
        assert_eq!(receipt.event.recuperator_code.as_deref(), Some("REC-001"));
        assert!(receipt.warnings.is_empty());

        let again = ledger
            .submit(&ProposedScan::exit("CHD-001", "AGT-001", None), &auth, t(120))
            .expect("unattributed exit still accepted");
        assert!(again.has_warning(ScanWarning::UnattributedExit));
        assert!(again.has_warning(ScanWarning::RepeatedScan));
        assert_eq!(ledger.len_for("CHD-001"), 3);
    }

    #[test]
    fn test_repeated_scans_are_not_deduplicated() {
        let auth = authorizations();
        let mut ledger = ScanLedger::new();
        let scan = ProposedScan::entry("CHD-001", "AGT-001");
        ledger.submit(&scan, &auth, t(0)).expect("first");
        let second = ledger.submit(&scan, &auth, t(1)).expect("second");
        assert_eq!(second.warnings, vec![ScanWarning::RepeatedScan]);
        assert_eq!(ledger.counts_for("CHD-001").entries, 2);
    }

    #[test]
    fn test_clock_going_backwards_keeps_order() {
        let auth = authorizations();
        let mut ledger = ScanLedger::new();
        ledger.submit(&ProposedScan::entry("CHD-001", "AGT-001"), &auth, t(100)).expect("entry");
        let exit = ledger
            .submit(&ProposedScan::exit("CHD-001", "AGT-001", None), &auth, t(100) - Duration::seconds(30))
            .expect("exit");
        // Clamped to the previous timestamp; id breaks the tie
        assert_eq!(exit.event.scanned_at, t(100));
        assert_eq!(presence_of(ledger.latest_for("CHD-001")), PresenceState::Exited);

        let ordered: Vec<_> = ledger.iter().map(|e| e.order_key()).collect();
        let mut sorted = ordered.clone();
        sorted.sort();
        assert_eq!(ordered, sorted);
    }

    #[test]
    fn test_events_for_and_paging_most_recent_first() {
        let auth = authorizations();
        let mut ledger = ScanLedger::new();
        for i in 0..5 {
            let scan = if i % 2 == 0 {
                ProposedScan::entry("CHD-001", "AGT-001")
            } else {
                ProposedScan::exit("CHD-001", "AGT-001", Some("REC-001".to_string()))
            };
            ledger.submit(&scan, &auth, t(i * 60)).expect("accepted");
        }
        ledger.submit(&ProposedScan::entry("CHD-002", "AGT-001"), &auth, t(500)).expect("other child");

        let ids: Vec<u64> = ledger.events_for("CHD-001").map(|e| e.id).collect();
        assert_eq!(ids, vec![5, 4, 3, 2, 1]);

        let page = ledger.page_for("CHD-001", 2, 2);
        assert_eq!(page.items.iter().map(|e| e.id).collect::<Vec<_>>(), vec![3, 2]);
        assert_eq!(page.last_page, 3);

        assert_eq!(ledger.tail("CHD-001").counts, ScanCounts { entries: 3, exits: 2 });
        assert_eq!(ledger.len(), 6);
        assert_eq!(ledger.events_for("CHD-404").count(), 0);
    }

    #[test]
    fn test_scan_requires_child_and_agent() {
        let mut ledger = ScanLedger::new();
        let err = ledger
            .submit(&ProposedScan::entry("", "AGT-001"), &authorizations(), t(0))
            .expect_err("empty child");
        assert!(matches!(err, Error::Validation(_)));
        assert!(ledger.is_empty());
    }
}
