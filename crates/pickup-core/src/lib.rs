//! Core library for the school pickup console.
//!
//! The console lets staff browse parents, children, recuperators (authorized
//! pickup persons) and agents held by a remote API, and records QR-code scans
//! of children entering and leaving the facility. This crate holds the logic
//! that must stay correct regardless of the front-end:
//!
//! - `directory`: typed read-through cache of paginated, searchable lists,
//!   plus the pinned-entity resolver used by selection widgets
//! - `authorization`: per-recuperator sets of children they may pick up
//! - `ledger`: append-only scan event log with exit-scan validation
//! - `presence`: presence state and cohort statistics derived from the ledger
//! - `console`: background fetch coordination with last-request-wins semantics
//!
//! The remote API is reached through the `PickupApi` trait; `ApiClient` speaks
//! HTTP and `MemoryApi` is an in-process authority with the same contract.

pub mod api;
pub mod authorization;
pub mod config;
pub mod console;
pub mod directory;
pub mod error;
pub mod ledger;
pub mod models;
pub mod presence;
pub mod utils;

pub use api::{ApiClient, ApiError, MemoryApi, PickupApi};
pub use authorization::AuthorizationSet;
pub use config::Config;
pub use console::Console;
pub use directory::{Directory, PinResolver};
pub use error::{Error, Result};
pub use ledger::ScanLedger;
pub use presence::{CohortStats, PresenceState};
