//! Per-recuperator pickup authorizations.
//!
//! Each recuperator is linked to one parent and holds an explicit set of that
//! parent's children. The set is only changed by `assign` (a whole-set
//! replacement) or pruned when the child or recuperator stops qualifying.
//!
//! Invariant: every granted child is a current child of the recuperator's
//! linked parent. `set_owner`, `remove_child` and `link_recuperator` prune in
//! the same call that breaks the relation, so no stale grant survives.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{EntityKind, Parent, Recuperator};

#[derive(Debug, Clone, Default, PartialEq)]
struct Grant {
    parent: String,
    children: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AuthorizationSet {
    /// child code -> owning parent code, current children only
    owners: HashMap<String, String>,
    /// recuperator code -> linked parent and granted children
    grants: HashMap<String, Grant>,
}

impl AuthorizationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from directory records. Tombstoned records are skipped and grants
    /// that break the ownership invariant are dropped with a warning.
    pub fn from_directory<'a>(
        parents: impl IntoIterator<Item = &'a Parent>,
        recuperators: impl IntoIterator<Item = &'a Recuperator>,
    ) -> Self {
        let mut set = Self::new();
        for parent in parents.into_iter().filter(|p| p.deleted_at.is_none()) {
            for child in parent.current_child_codes() {
                set.owners.insert(child.to_string(), parent.code.clone());
            }
        }

        for rec in recuperators.into_iter().filter(|r| r.deleted_at.is_none()) {
            set.link_recuperator(&rec.code, &rec.parent_code);
            let (valid, stale): (Vec<&String>, Vec<&String>) = rec
                .authorized_children
                .iter()
                .partition(|c| set.owner_of(c) == Some(rec.parent_code.as_str()));
            if !stale.is_empty() {
                warn!(recuperator = %rec.code, stale = ?stale, "Dropping grants outside the linked parent");
            }
            if let Some(grant) = set.grants.get_mut(&rec.code) {
                grant.children = valid.into_iter().cloned().collect();
            }
        }
        set
    }

    pub fn owner_of(&self, child_code: &str) -> Option<&str> {
        self.owners.get(child_code).map(String::as_str)
    }

    pub fn parent_of(&self, recuperator_code: &str) -> Option<&str> {
        self.grants.get(recuperator_code).map(|g| g.parent.as_str())
    }

    /// Record that `child_code` now belongs to `parent_code`.
    ///
    /// When this moves the child away from another parent, every grant held by
    /// a recuperator of a different parent is pruned. Returns the recuperators
    /// that lost the child.
    pub fn set_owner(&mut self, child_code: &str, parent_code: &str) -> Vec<String> {
        let previous = self
            .owners
            .insert(child_code.to_string(), parent_code.to_string());
        match previous {
            Some(ref old) if old != parent_code => {
                debug!(child = %child_code, from = %old, to = %parent_code, "Child moved to another parent");
                self.prune_child(child_code, |grant| grant.parent != parent_code)
            }
            _ => Vec::new(),
        }
    }

    /// Forget a child entirely (soft removal). Returns the recuperators that lost it.
    pub fn remove_child(&mut self, child_code: &str) -> Vec<String> {
        self.owners.remove(child_code);
        self.prune_child(child_code, |_| true)
    }

    fn prune_child(&mut self, child_code: &str, applies: impl Fn(&Grant) -> bool) -> Vec<String> {
        let mut pruned: Vec<String> = self
            .grants
            .iter_mut()
            .filter(|(_, grant)| applies(grant))
            .filter_map(|(code, grant)| grant.children.remove(child_code).then(|| code.clone()))
            .collect();
        pruned.sort();
        if !pruned.is_empty() {
            debug!(child = %child_code, recuperators = ?pruned, "Pruned authorizations");
        }
        pruned
    }

    /// Link a recuperator to a parent. Relinking to a different parent drops
    /// every grant, since none of them can satisfy the new owner.
    pub fn link_recuperator(&mut self, recuperator_code: &str, parent_code: &str) {
        let grant = self.grants.entry(recuperator_code.to_string()).or_default();
        if grant.parent != parent_code {
            if !grant.children.is_empty() {
                debug!(recuperator = %recuperator_code, parent = %parent_code, "Relinked recuperator, clearing grants");
            }
            grant.parent = parent_code.to_string();
            grant.children.clear();
        }
    }

    pub fn remove_recuperator(&mut self, recuperator_code: &str) -> bool {
        self.grants.remove(recuperator_code).is_some()
    }

    /// Replace the recuperator's whole authorized set.
    ///
    /// All-or-nothing: if any child is not a current child of the linked
    /// parent, nothing changes and `ReferentialViolation` lists the offenders.
    pub fn assign<I, S>(&mut self, recuperator_code: &str, child_codes: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parent = self
            .parent_of(recuperator_code)
            .ok_or_else(|| Error::not_found(EntityKind::Recuperator, recuperator_code))?
            .to_string();

        let requested: BTreeSet<String> = child_codes
            .into_iter()
            .map(|c| c.as_ref().trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        let invalid: Vec<String> = requested
            .iter()
            .filter(|c| self.owner_of(c) != Some(parent.as_str()))
            .cloned()
            .collect();

        if !invalid.is_empty() {
            warn!(recuperator = %recuperator_code, parent = %parent, invalid = ?invalid, "Rejected authorization assignment");
            return Err(Error::ReferentialViolation {
                recuperator: recuperator_code.to_string(),
                parent,
                children: invalid,
            });
        }

        if let Some(grant) = self.grants.get_mut(recuperator_code) {
            debug!(recuperator = %recuperator_code, count = requested.len(), "Assigned authorized children");
            grant.children = requested;
        }
        Ok(())
    }

    pub fn is_authorized(&self, recuperator_code: &str, child_code: &str) -> bool {
        self.grants
            .get(recuperator_code)
            .map(|g| g.children.contains(child_code))
            .unwrap_or(false)
    }

    /// Children the recuperator may collect, sorted.
    pub fn authorized_children(&self, recuperator_code: &str) -> Vec<&str> {
        self.grants
            .get(recuperator_code)
            .map(|g| g.children.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Recuperators allowed to collect the child, sorted.
    pub fn recuperators_for(&self, child_code: &str) -> Vec<&str> {
        let mut codes: Vec<&str> = self
            .grants
            .iter()
            .filter(|(_, g)| g.children.contains(child_code))
            .map(|(code, _)| code.as_str())
            .collect();
        codes.sort_unstable();
        codes
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Child, RelationType};

    fn family() -> AuthorizationSet {
        let p1 = Parent::new("PAR-001", "Nadia", "Benali")
            .with_child(Child::new("CHD-001", "Yanis", "Benali", ""))
            .with_child(Child::new("CHD-002", "Lina", "Benali", ""));
        let p2 = Parent::new("PAR-002", "Omar", "Haddad")
            .with_child(Child::new("CHD-010", "Sara", "Haddad", ""));

        let mut r1 = Recuperator::new("REC-001", "Karim", "Saidi", RelationType::UncleAunt, "PAR-001");
        r1.authorized_children = vec!["CHD-001".to_string()];
        let r2 = Recuperator::new("REC-002", "Hana", "Tazi", RelationType::Nanny, "PAR-001");
        let r3 = Recuperator::new("REC-010", "Ali", "Haddad", RelationType::Grandparent, "PAR-002");

        AuthorizationSet::from_directory([&p1, &p2], [&r1, &r2, &r3])
    }

    #[test]
    fn test_from_directory_loads_grants() {
        let set = family();
        assert!(set.is_authorized("REC-001", "CHD-001"));
        assert!(!set.is_authorized("REC-001", "CHD-002"));
        assert!(!set.is_authorized("REC-002", "CHD-001"));
        assert_eq!(set.owner_of("CHD-010"), Some("PAR-002"));
        assert_eq!(set.parent_of("REC-010"), Some("PAR-002"));
    }

    #[test]
    fn test_from_directory_drops_grants_outside_parent() {
        let p1 = Parent::new("PAR-001", "A", "B").with_child(Child::new("CHD-001", "C", "B", ""));
        let p2 = Parent::new("PAR-002", "D", "E").with_child(Child::new("CHD-010", "F", "E", ""));
        let mut rec = Recuperator::new("REC-001", "G", "H", RelationType::Driver, "PAR-001");
        rec.authorized_children = vec!["CHD-001".to_string(), "CHD-010".to_string()];

        let set = AuthorizationSet::from_directory([&p1, &p2], [&rec]);
        assert_eq!(set.authorized_children("REC-001"), vec!["CHD-001"]);
    }

    #[test]
    fn test_assign_is_exact_replacement() {
        let mut set = family();
        set.assign("REC-001", ["CHD-002"]).expect("valid assignment");
        // After assign(r, S), authorized iff in S
        assert!(!set.is_authorized("REC-001", "CHD-001"));
        assert!(set.is_authorized("REC-001", "CHD-002"));

        set.assign("REC-001", Vec::<String>::new()).expect("empty assignment");
        assert!(set.authorized_children("REC-001").is_empty());
    }

    #[test]
    fn test_assign_rejects_other_family_atomically() {
        let mut set = family();
        let err = set
            .assign("REC-001", ["CHD-002", "CHD-010", "CHD-404"])
            .expect_err("must reject");
        match err {
            Error::ReferentialViolation { recuperator, parent, children } => {
                assert_eq!(recuperator, "REC-001");
                assert_eq!(parent, "PAR-001");
                assert_eq!(children, vec!["CHD-010", "CHD-404"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Nothing changed
        assert_eq!(set.authorized_children("REC-001"), vec!["CHD-001"]);
    }

    #[test]
    fn test_assign_unknown_recuperator() {
        let mut set = family();
        let err = set.assign("REC-404", ["CHD-001"]).expect_err("unknown recuperator");
        assert!(matches!(err, Error::NotFound { kind: EntityKind::Recuperator, .. }));
    }

    #[test]
    fn test_moving_child_prunes_old_family_grants() {
        let mut set = family();
        assert!(set.is_authorized("REC-001", "CHD-001"));

        let pruned = set.set_owner("CHD-001", "PAR-002");
        assert_eq!(pruned, vec!["REC-001"]);
        assert!(!set.is_authorized("REC-001", "CHD-001"));
        assert_eq!(set.owner_of("CHD-001"), Some("PAR-002"));

        // The new family can now be granted the child
        set.assign("REC-010", ["CHD-001", "CHD-010"]).expect("valid after move");
        assert_eq!(set.recuperators_for("CHD-001"), vec!["REC-010"]);
    }

    #[test]
    fn test_same_owner_does_not_prune() {
        let mut set = family();
        assert!(set.set_owner("CHD-001", "PAR-001").is_empty());
        assert!(set.is_authorized("REC-001", "CHD-001"));
    }

    #[test]
    fn test_remove_child_prunes_everywhere() {
        let mut set = family();
        set.assign("REC-002", ["CHD-001", "CHD-002"]).expect("valid");
        let pruned = set.remove_child("CHD-001");
        assert_eq!(pruned, vec!["REC-001", "REC-002"]);
        assert!(set.recuperators_for("CHD-001").is_empty());
        assert_eq!(set.owner_of("CHD-001"), None);
        assert!(set.assign("REC-002", ["CHD-001"]).is_err());
    }

    #[test]
    fn test_relink_recuperator_clears_grants() {
        let mut set = family();
        set.link_recuperator("REC-001", "PAR-002");
        assert!(set.authorized_children("REC-001").is_empty());
        assert_eq!(set.parent_of("REC-001"), Some("PAR-002"));

        assert!(set.remove_recuperator("REC-001"));
        assert!(!set.remove_recuperator("REC-001"));
    }
}
