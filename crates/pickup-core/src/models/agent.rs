use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Entity, EntityKind, EntityRecord};
use crate::utils::contains_ignore_case;

fn default_active() -> bool {
    true
}

/// Staff member who operates a scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Agent {
    #[serde(default)]
    pub id: i64,
    pub code: String,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(rename = "deletedAt", default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(code: impl Into<String>, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id: 0,
            code: code.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            phone: None,
            active: true,
            deleted_at: None,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl Entity for Agent {
    const KIND: EntityKind = EntityKind::Agent;

    fn code(&self) -> &str {
        &self.code
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    fn is_active(&self) -> bool {
        self.active && self.deleted_at.is_none()
    }

    fn matches_search(&self, query: &str) -> bool {
        contains_ignore_case(&self.code, query)
            || contains_ignore_case(&self.first_name, query)
            || contains_ignore_case(&self.last_name, query)
    }

    fn from_record(record: EntityRecord) -> Option<Self> {
        match record {
            EntityRecord::Agent(a) => Some(a),
            _ => None,
        }
    }

    fn into_record(self) -> EntityRecord {
        EntityRecord::Agent(self)
    }
}
