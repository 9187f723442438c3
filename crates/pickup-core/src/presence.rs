//! Presence projection.
//!
//! Presence is never stored: it is recomputed from the scan log on every call.
//! Everything here is a pure function of its inputs, so calling it again after
//! the ledger grows always reflects the latest tail.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{ProposedScan, ScanEvent, ScanType, ScanWarning};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum PresenceState {
    NoActivity,
    Present,
    Exited,
}

impl std::fmt::Display for PresenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresenceState::NoActivity => write!(f, "No activity"),
            PresenceState::Present => write!(f, "Present"),
            PresenceState::Exited => write!(f, "Picked up"),
        }
    }
}

/// Number of scans of each type recorded for one child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ScanCounts {
    pub entries: u64,
    pub exits: u64,
}

impl ScanCounts {
    pub fn record(&mut self, scan_type: ScanType) {
        match scan_type {
            ScanType::Entry => self.entries += 1,
            ScanType::Exit => self.exits += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.entries + self.exits
    }
}

/// Summary of one child's ledger: the most recent event plus per-type counts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChildTail {
    pub latest: Option<ScanEvent>,
    pub counts: ScanCounts,
}

impl ChildTail {
    /// Summarize events in any order; recency is decided by `(timestamp, id)`.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a ScanEvent>) -> Self {
        let events: Vec<&ScanEvent> = events.into_iter().collect();
        let mut counts = ScanCounts::default();
        for event in &events {
            counts.record(event.scan_type);
        }
        Self {
            latest: latest_of(events).cloned(),
            counts,
        }
    }

    pub fn record(&mut self, event: &ScanEvent) {
        self.counts.record(event.scan_type);
        let newer = self
            .latest
            .as_ref()
            .map(|current| event.is_newer_than(current))
            .unwrap_or(true);
        if newer {
            self.latest = Some(event.clone());
        }
    }

    pub fn state(&self) -> PresenceState {
        presence_of(self.latest.as_ref())
    }
}

/// Read access to per-child ledger tails.
pub trait LedgerView {
    /// Most recent event for the child, without scanning the full history.
    fn latest_for(&self, child_code: &str) -> Option<&ScanEvent>;

    fn counts_for(&self, child_code: &str) -> ScanCounts;
}

impl LedgerView for HashMap<String, ChildTail> {
    fn latest_for(&self, child_code: &str) -> Option<&ScanEvent> {
        self.get(child_code).and_then(|t| t.latest.as_ref())
    }

    fn counts_for(&self, child_code: &str) -> ScanCounts {
        self.get(child_code).map(|t| t.counts).unwrap_or_default()
    }
}

/// Presence from the most recent event alone.
pub fn presence_of(latest: Option<&ScanEvent>) -> PresenceState {
    match latest.map(|e| e.scan_type) {
        None => PresenceState::NoActivity,
        Some(ScanType::Entry) => PresenceState::Present,
        Some(ScanType::Exit) => PresenceState::Exited,
    }
}

/// Most recent event of a sequence. Equal timestamps fall back to the higher id.
pub fn latest_of<'a>(events: impl IntoIterator<Item = &'a ScanEvent>) -> Option<&'a ScanEvent> {
    events.into_iter().max_by_key(|e| e.order_key())
}

/// One dashboard row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildActivity {
    pub child_code: String,
    pub state: PresenceState,
    pub counts: ScanCounts,
    pub last_event: Option<ScanEvent>,
}

pub fn activity_of(view: &impl LedgerView, child_code: &str) -> ChildActivity {
    let last_event = view.latest_for(child_code).cloned();
    ChildActivity {
        child_code: child_code.to_string(),
        state: presence_of(last_event.as_ref()),
        counts: view.counts_for(child_code),
        last_event,
    }
}

/// Aggregate counts over a cohort, always summed from per-child derivations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct CohortStats {
    pub present: u64,
    pub exited: u64,
    #[serde(rename = "noActivity")]
    pub no_activity: u64,
    #[serde(rename = "totalEntries")]
    pub total_entries: u64,
    #[serde(rename = "totalExits")]
    pub total_exits: u64,
}

impl CohortStats {
    pub fn children(&self) -> u64 {
        self.present + self.exited + self.no_activity
    }

    fn add(&mut self, state: PresenceState, counts: ScanCounts) {
        match state {
            PresenceState::NoActivity => self.no_activity += 1,
            PresenceState::Present => self.present += 1,
            PresenceState::Exited => self.exited += 1,
        }
        self.total_entries += counts.entries;
        self.total_exits += counts.exits;
    }
}

/// Statistics for the given cohort. Each listed child contributes exactly one
/// presence state, so `present + exited + no_activity` equals the list length.
pub fn stats_of<'a>(children: impl IntoIterator<Item = &'a str>, view: &impl LedgerView) -> CohortStats {
    let mut stats = CohortStats::default();
    for child in children {
        stats.add(presence_of(view.latest_for(child)), view.counts_for(child));
    }
    stats
}

/// Outcome of checking a proposed scan against the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Accept(Vec<ScanWarning>),
    UnauthorizedPickup { child: String, recuperator: String },
}

impl ScanVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ScanVerdict::Accept(_))
    }
}

/// Decide whether a scan may be appended.
///
/// Entries are always accepted. An exit naming a recuperator needs
/// `is_authorized(recuperator, child)`; an exit naming nobody is accepted with
/// `UnattributedExit`. A scan repeating the type of `latest` is accepted with
/// `RepeatedScan`.
pub fn assess_scan(
    scan: &ProposedScan,
    latest: Option<&ScanEvent>,
    is_authorized: impl Fn(&str, &str) -> bool,
) -> ScanVerdict {
    let mut warnings = Vec::new();

    if scan.scan_type == ScanType::Exit {
        match scan.recuperator_code.as_deref().filter(|r| !r.trim().is_empty()) {
            Some(recuperator) if !is_authorized(recuperator, &scan.child_code) => {
                return ScanVerdict::UnauthorizedPickup {
                    child: scan.child_code.clone(),
                    recuperator: recuperator.to_string(),
                };
            }
            Some(_) => {}
            None => warnings.push(ScanWarning::UnattributedExit),
        }
    }

    if latest.map(|e| e.scan_type) == Some(scan.scan_type) {
        warnings.push(ScanWarning::RepeatedScan);
    }

    ScanVerdict::Accept(warnings)
}

// ============================================================================
// Tests
// ============================================================================
