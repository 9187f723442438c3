use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Entity, EntityKind, EntityRecord};
use crate::utils::{contains_ignore_case, format_phone};

/// How a recuperator is related to the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Grandparent,
    UncleAunt,
    Sibling,
    Nanny,
    Driver,
    Neighbor,
    FamilyFriend,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelationType::Grandparent => write!(f, "Grandparent"),
            RelationType::UncleAunt => write!(f, "Uncle/Aunt"),
            RelationType::Sibling => write!(f, "Sibling"),
            RelationType::Nanny => write!(f, "Nanny"),
            RelationType::Driver => write!(f, "Driver"),
            RelationType::Neighbor => write!(f, "Neighbor"),
            RelationType::FamilyFriend => write!(f, "Family friend"),
            RelationType::Other => write!(f, "Other"),
        }
    }
}

fn default_active() -> bool {
    true
}

/// A person a parent has designated to collect some of their children.
///
/// `authorized_children` is an explicit selection: being linked to a parent
/// grants nothing on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Recuperator {
    #[serde(default)]
    pub id: i64,
    pub code: String,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(rename = "relationType", alias = "relation")]
    pub relation: RelationType,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(rename = "parentCode")]
    pub parent_code: String,
    #[serde(rename = "authorizedChildren", default)]
    pub authorized_children: Vec<String>,
    #[serde(rename = "deletedAt", default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Recuperator {
    pub fn new(
        code: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        relation: RelationType,
        parent_code: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            code: code.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            phone: None,
            relation,
            active: true,
            parent_code: parent_code.into(),
            authorized_children: Vec::new(),
            deleted_at: None,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }

    pub fn phone(&self) -> Option<String> {
        self.phone.as_deref().filter(|p| !p.trim().is_empty()).map(format_phone)
    }

    pub fn may_collect(&self, child_code: &str) -> bool {
        self.active
            && self.deleted_at.is_none()
            && self.authorized_children.iter().any(|c| c == child_code)
    }
}

impl Entity for Recuperator {
    const KIND: EntityKind = EntityKind::Recuperator;

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
            || contains_ignore_case(&self.parent_code, query)
            || self
                .phone
                .as_ref()
                .map(|p| contains_ignore_case(p, query))
                .unwrap_or(false)
    }

    fn from_record(record: EntityRecord) -> Option<Self> {
        match record {
            EntityRecord::Recuperator(r) => Some(r),
            _ => None,
        }
    }

    fn into_record(self) -> EntityRecord {
        EntityRecord::Recuperator(self)
    }
}
