use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Entry,
    Exit,
}

impl std::fmt::Display for ScanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanType::Entry => write!(f, "Entry"),
            ScanType::Exit => write!(f, "Exit"),
        }
    }
}

/// One accepted scan. Events are appended, never edited or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ScanEvent {
    pub id: u64,
    #[serde(rename = "childCode")]
    pub child_code: String,
    #[serde(rename = "recuperatorCode", default)]
    pub recuperator_code: Option<String>,
    #[serde(rename = "agentCode")]
    pub agent_code: String,
    #[serde(rename = "type")]
    pub scan_type: ScanType,
    #[serde(rename = "scannedAt")]
    pub scanned_at: DateTime<Utc>,
}

impl ScanEvent {
    /// Ledger order: timestamp first, then id for events sharing a timestamp.
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.scanned_at, self.id)
    }

    pub fn is_newer_than(&self, other: &ScanEvent) -> bool {
        self.order_key() > other.order_key()
    }

    pub fn formatted_time(&self) -> String {
        self.scanned_at.format("%d/%m/%Y %H:%M").to_string()
    }
}

/// A scan submitted for acceptance. Id and timestamp are assigned on append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ProposedScan {
    #[serde(rename = "childCode")]
    pub child_code: String,
    #[serde(rename = "agentCode")]
    pub agent_code: String,
    #[serde(rename = "recuperatorCode", default, skip_serializing_if = "Option::is_none")]
    pub recuperator_code: Option<String>,
    #[serde(rename = "type")]
    pub scan_type: ScanType,
}

impl ProposedScan {
    pub fn entry(child_code: impl Into<String>, agent_code: impl Into<String>) -> Self {
        Self {
            child_code: child_code.into(),
            agent_code: agent_code.into(),
            recuperator_code: None,
            scan_type: ScanType::Entry,
        }
    }

    pub fn exit(
        child_code: impl Into<String>,
        agent_code: impl Into<String>,
        recuperator_code: Option<String>,
    ) -> Self {
        Self {
            child_code: child_code.into(),
            agent_code: agent_code.into(),
            recuperator_code,
            scan_type: ScanType::Exit,
        }
    }

    pub fn with_recuperator(mut self, recuperator_code: impl Into<String>) -> Self {
        self.recuperator_code = Some(recuperator_code.into());
        self
    }
}

/// Non-blocking observations attached to an accepted scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum ScanWarning {
    /// Exit recorded without a recuperator, so nobody is accountable for the pickup.
    UnattributedExit,
    /// Same type as the child's latest event. Kept; suppression is up to the caller.
    RepeatedScan,
}

impl std::fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanWarning::UnattributedExit => write!(f, "Exit recorded without a recuperator"),
            ScanWarning::RepeatedScan => write!(f, "Same scan type as the previous event"),
        }
    }
}

/// Result of an accepted scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ScanReceipt {
    pub event: ScanEvent,
    #[serde(default)]
    pub warnings: Vec<ScanWarning>,
}

impl ScanReceipt {
    pub fn has_warning(&self, warning: ScanWarning) -> bool {
        self.warnings.contains(&warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(id: u64, secs: i64) -> ScanEvent {
        ScanEvent {
            id,
            child_code: "CHD-001".to_string(),
            recuperator_code: None,
            agent_code: "AGT-001".to_string(),
            scan_type: ScanType::Entry,
            scanned_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_newer_uses_id_on_timestamp_tie() {
        let a = event(7, 1_000);
        let b = event(8, 1_000);
        assert!(b.is_newer_than(&a));
        assert!(!a.is_newer_than(&b));

        // Later timestamp wins regardless of id
        let c = event(3, 2_000);
        assert!(c.is_newer_than(&b));
    }

    #[test]
    fn test_proposed_scan_serializes_without_empty_recuperator() {
        let scan = ProposedScan::entry("CHD-001", "AGT-001");
        let json = serde_json::to_value(&scan).expect("serialize");
        assert_eq!(json["type"], "entry");
        assert!(json.get("recuperatorCode").is_none());

        let exit = ProposedScan::exit("CHD-001", "AGT-001", None).with_recuperator("REC-001");
        let json = serde_json::to_value(&exit).expect("serialize");
        assert_eq!(json["recuperatorCode"], "REC-001");
    }

    #[test]
    fn test_parse_scan_event() {
        let json = r#"{"id": 55, "childCode": "CHD-001", "agentCode": "AGT-002",
            "type": "exit", "recuperatorCode": "REC-004", "scannedAt": "2024-05-02T16:31:00Z"}"#;
        let ev: ScanEvent = serde_json::from_str(json).expect("Failed to parse scan JSON");
        assert_eq!(ev.scan_type, ScanType::Exit);
        assert_eq!(ev.recuperator_code.as_deref(), Some("REC-004"));
        assert_eq!(ev.formatted_time(), "02/05/2024 16:31");
    }
}
