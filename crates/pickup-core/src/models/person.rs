use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{Entity, EntityKind, EntityRecord};
use crate::utils::{contains_ignore_case, format_phone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gender::Male => write!(f, "Male"),
            Gender::Female => write!(f, "Female"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Child {
    #[serde(default)]
    pub id: i64,
    pub code: String,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(rename = "birthDate", default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(rename = "className", default)]
    pub class_name: Option<String>,
    #[serde(rename = "enrolledOn", default)]
    pub enrolled_on: Option<NaiveDate>,
    #[serde(rename = "parentCode")]
    pub parent_code: String,
    #[serde(rename = "deletedAt", default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Child {
    pub fn new(
        code: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        parent_code: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            code: code.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            gender: None,
            birth_date: None,
            class_name: None,
            enrolled_on: None,
            parent_code: parent_code.into(),
            deleted_at: None,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }

    pub fn age(&self) -> Option<i32> {
        self.birth_date.map(|dob| {
            let today = Utc::now().date_naive();
            let mut age = today.year() - dob.year();
            if today.ordinal() < dob.ordinal() {
                age -= 1;
            }
            age
        })
    }

    pub fn age_str(&self) -> String {
        self.age().map(|a| a.to_string()).unwrap_or_else(|| "-".to_string())
    }

    pub fn class_str(&self) -> String {
        self.class_name.clone().unwrap_or_else(|| "-".to_string())
    }
}

impl Entity for Child {
    const KIND: EntityKind = EntityKind::Child;

    fn code(&self) -> &str {
        &self.code
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    fn matches_search(&self, query: &str) -> bool {
        contains_ignore_case(&self.code, query)
            || contains_ignore_case(&self.first_name, query)
            || contains_ignore_case(&self.last_name, query)
            || self
                .class_name
                .as_ref()
                .map(|c| contains_ignore_case(c, query))
                .unwrap_or(false)
    }

    fn from_record(record: EntityRecord) -> Option<Self> {
        match record {
            EntityRecord::Child(c) => Some(c),
            _ => None,
        }
    }

    fn into_record(self) -> EntityRecord {
        EntityRecord::Child(self)
    }
}

/// A parent owns its children list; the two are edited and saved together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Parent {
    #[serde(default)]
    pub id: i64,
    pub code: String,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub children: Vec<Child>,
    #[serde(rename = "deletedAt", default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Parent {
    pub fn new(
        code: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            code: code.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            phone: None,
            email: None,
            address: None,
            children: Vec::new(),
            deleted_at: None,
        }
    }

    /// Attach a child, rewriting its parent code to this parent.
    pub fn with_child(mut self, mut child: Child) -> Self {
        child.parent_code = self.code.clone();
        self.children.push(child);
        self
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

    /// Codes of the children that are not tombstoned.
    pub fn current_child_codes(&self) -> impl Iterator<Item = &str> {
        self.children
            .iter()
            .filter(|c| c.deleted_at.is_none())
            .map(|c| c.code.as_str())
    }

    pub fn owns_child(&self, child_code: &str) -> bool {
        self.current_child_codes().any(|c| c == child_code)
    }
}

impl Entity for Parent {
    const KIND: EntityKind = EntityKind::Parent;

    fn code(&self) -> &str {
        &self.code
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    fn matches_search(&self, query: &str) -> bool {
        contains_ignore_case(&self.code, query)
            || contains_ignore_case(&self.first_name, query)
            || contains_ignore_case(&self.last_name, query)
            || self
                .phone
                .as_ref()
                .map(|p| contains_ignore_case(p, query))
                .unwrap_or(false)
            || self
                .email
                .as_ref()
                .map(|e| contains_ignore_case(e, query))
                .unwrap_or(false)
    }

    fn from_record(record: EntityRecord) -> Option<Self> {
        match record {
            EntityRecord::Parent(p) => Some(p),
            _ => None,
        }
    }

    fn into_record(self) -> EntityRecord {
        EntityRecord::Parent(self)
    }
}
