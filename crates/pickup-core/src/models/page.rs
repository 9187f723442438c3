use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Agent, Child, Parent, Recuperator};

/// The kinds of records the directory can list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Parent,
    Child,
    Recuperator,
    Agent,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Parent,
        EntityKind::Child,
        EntityKind::Recuperator,
        EntityKind::Agent,
    ];

    /// Collection name used in API paths
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Parent => "parents",
            EntityKind::Child => "children",
            EntityKind::Recuperator => "recuperators",
            EntityKind::Agent => "agents",
        }
    }

    /// Parse a collection or singular name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        EntityKind::ALL
            .into_iter()
            .find(|k| lower == k.collection() || lower == k.to_string().to_ascii_lowercase())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Parent => write!(f, "Parent"),
            EntityKind::Child => write!(f, "Child"),
            EntityKind::Recuperator => write!(f, "Recuperator"),
            EntityKind::Agent => write!(f, "Agent"),
        }
    }
}

/// Status filter applied to directory lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Inactive,
    Deleted,
}

impl StatusFilter {
    pub fn as_param(&self) -> &'static str {
        match self {
            StatusFilter::All => "all",
            StatusFilter::Active => "active",
            StatusFilter::Inactive => "inactive",
            StatusFilter::Deleted => "deleted",
        }
    }

    pub fn from_param(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "" => Some(StatusFilter::All),
            "active" => Some(StatusFilter::Active),
            "inactive" => Some(StatusFilter::Inactive),
            "deleted" | "trashed" => Some(StatusFilter::Deleted),
            _ => None,
        }
    }

    /// Whether a record with the given flags passes this filter.
    /// Tombstoned records only show up under `Deleted`.
    pub fn admits(&self, active: bool, deleted: bool) -> bool {
        match self {
            StatusFilter::All => !deleted,
            StatusFilter::Active => !deleted && active,
            StatusFilter::Inactive => !deleted && !active,
            StatusFilter::Deleted => deleted,
        }
    }
}

/// Parameters of one paginated directory read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListQuery {
    pub kind: EntityKind,
    pub page: u32,
    pub search: String,
    pub status: StatusFilter,
}

impl ListQuery {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            page: 1,
            search: String::new(),
            status: StatusFilter::All,
        }
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into().trim().to_string();
        self
    }

    pub fn status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }
}

/// Aggregate counts the API returns alongside a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct PageCounts {
    #[serde(rename = "activeCount", default)]
    pub active: u64,
    #[serde(rename = "inactiveCount", default)]
    pub inactive: u64,
    #[serde(rename = "deletedCount", default)]
    pub deleted: u64,
}

fn first_page() -> u32 {
    1
}

/// One page of a paginated list response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(rename = "lastPage", default = "first_page")]
    pub last_page: u32,
    #[serde(default)]
    pub total: u64,
    #[serde(flatten)]
    pub counts: PageCounts,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            page: 1,
            last_page: 1,
            total: 0,
            counts: PageCounts::default(),
        }
    }

    /// Slice an already filtered, ordered list into the requested page.
    /// Pages past the end come back empty but keep the real `last_page`.
    pub fn paginate(all: Vec<T>, page: u32, per_page: u32, counts: PageCounts) -> Self {
        let per_page = per_page.max(1) as usize;
        let total = all.len();
        let last_page = total.div_ceil(per_page).max(1) as u32;
        let page = page.max(1);
        let start = (page as usize - 1).saturating_mul(per_page);
        let items = all.into_iter().skip(start).take(per_page).collect();
        Self {
            items,
            page,
            last_page,
            total: total as u64,
            counts,
        }
    }

    pub fn has_next(&self) -> bool {
        self.page < self.last_page
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            last_page: self.last_page,
            total: self.total,
            counts: self.counts,
        }
    }
}

/// A record of any kind, as returned by the kind-agnostic API calls.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityRecord {
    Parent(Parent),
    Child(Child),
    Recuperator(Recuperator),
    Agent(Agent),
}

impl EntityRecord {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRecord::Parent(_) => EntityKind::Parent,
            EntityRecord::Child(_) => EntityKind::Child,
            EntityRecord::Recuperator(_) => EntityKind::Recuperator,
            EntityRecord::Agent(_) => EntityKind::Agent,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            EntityRecord::Parent(p) => &p.code,
            EntityRecord::Child(c) => &c.code,
            EntityRecord::Recuperator(r) => &r.code,
            EntityRecord::Agent(a) => &a.code,
        }
    }

    pub fn into_entity<T: Entity>(self) -> Option<T> {
        T::from_record(self)
    }
}

/// A record type that lives in a directory collection.
///
/// `code` is the stable, human-facing identity used for selection and
/// de-duplication; the surrogate `id` never participates in equality of
/// identity.
pub trait Entity: Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn code(&self) -> &str;

    fn is_deleted(&self) -> bool;

    fn is_active(&self) -> bool {
        !self.is_deleted()
    }

    /// Query must already be lowercased.
    fn matches_search(&self, query: &str) -> bool;

    fn from_record(record: EntityRecord) -> Option<Self>;

    fn into_record(self) -> EntityRecord;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginate_middle_and_last_page() {
        let all: Vec<u32> = (1..=23).collect();
        let page = Page::paginate(all.clone(), 2, 10, PageCounts::default());
        assert_eq!(page.items, (11..=20).collect::<Vec<_>>());
        assert_eq!(page.last_page, 3);
        assert_eq!(page.total, 23);
        assert!(page.has_next());
        assert!(page.has_prev());

        let last = Page::paginate(all, 3, 10, PageCounts::default());
        assert_eq!(last.items, vec![21, 22, 23]);
        assert!(!last.has_next());
    }

    #[test]
    fn test_paginate_empty_and_out_of_range() {
        let empty: Page<u32> = Page::paginate(vec![], 1, 10, PageCounts::default());
        assert!(empty.items.is_empty());
        assert_eq!(empty.last_page, 1);

        let beyond = Page::paginate(vec![1, 2, 3], 5, 2, PageCounts::default());
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.last_page, 2);
        assert_eq!(beyond.total, 3);
    }

    #[test]
    fn test_status_filter_admits() {
        assert!(StatusFilter::All.admits(false, false));
        assert!(!StatusFilter::All.admits(true, true));
        assert!(StatusFilter::Active.admits(true, false));
        assert!(!StatusFilter::Active.admits(false, false));
        assert!(StatusFilter::Inactive.admits(false, false));
        assert!(StatusFilter::Deleted.admits(true, true));
        assert!(!StatusFilter::Deleted.admits(true, false));
    }

    #[test]
    fn test_entity_kind_from_name() {
        assert_eq!(EntityKind::from_name("parents"), Some(EntityKind::Parent));
        assert_eq!(EntityKind::from_name("Child"), Some(EntityKind::Child));
        assert_eq!(EntityKind::from_name(" RECUPERATORS "), Some(EntityKind::Recuperator));
        assert_eq!(EntityKind::from_name("teachers"), None);
    }

    #[test]
    fn test_parse_page_with_counts() {
        let json = r#"{"items":[1,2],"page":2,"lastPage":4,"total":8,"activeCount":6,"inactiveCount":1,"deletedCount":1}"#;
        let page: Page<u32> = serde_json::from_str(json).expect("Failed to parse page JSON");
        assert_eq!(page.items, vec![1, 2]);
        assert_eq!(page.page, 2);
        assert_eq!(page.last_page, 4);
        assert_eq!(page.counts.active, 6);
        assert_eq!(page.counts.deleted, 1);

        let bare: Page<u32> = serde_json::from_str(r#"{"items":[]}"#).expect("Failed to parse bare page");
        assert_eq!(bare.page, 1);
        assert_eq!(bare.counts, PageCounts::default());
    }

    #[test]
    fn test_list_query_builder_normalizes() {
        let q = ListQuery::new(EntityKind::Child).page(0).search("  Amina ").status(StatusFilter::Active);
        assert_eq!(q.page, 1);
        assert_eq!(q.search, "Amina");
        assert_eq!(q.status, StatusFilter::Active);
    }
}
