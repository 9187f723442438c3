//! Data models for the pickup console.
//!
//! This module contains the records exchanged with the remote API:
//!
//! - `Parent`, `Child`: families, edited together as one unit
//! - `Recuperator`: a person allowed to collect specific children
//! - `Agent`: staff member operating a scanner
//! - `ScanEvent`, `ProposedScan`, `ScanReceipt`: the entry/exit log
//! - `Page`, `ListQuery`: paginated, searchable directory reads

pub mod agent;
pub mod page;
pub mod person;
pub mod recuperator;
pub mod scan;

pub use agent::Agent;
pub use page::{Entity, EntityKind, EntityRecord, ListQuery, Page, PageCounts, StatusFilter};
pub use person::{Child, Gender, Parent};
pub use recuperator::{Recuperator, RelationType};
pub use scan::{ProposedScan, ScanEvent, ScanReceipt, ScanType, ScanWarning};
