//! Account domain model
//!
//! An account is one organizational unit (head office, region, branch, ...)
//! in a tenant's tree. Its position is stored twice: as parent/children links
//! and as a materialized [`hierarchy_path`](Account::hierarchy_path). The
//! engine keeps both in step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::path;

/// Deepest level an account may occupy.
pub const MAX_LEVEL: u8 = 5;

/// Level of top-level accounts.
pub const ROOT_LEVEL: u8 = 1;

/// An account in a tenant's hierarchy.
///
/// # Examples
///
/// ```
/// use uuid::Uuid;
/// use fleet_hierarchy::Account;
///
/// let client_id = Uuid::now_v7();
/// let root = Account::new_root("Head Office", client_id, 1);
/// let branch = Account::new_child("North Branch", &root, 1);
///
/// assert_eq!(branch.level, 2);
/// assert_eq!(branch.hierarchy_path, "1.1");
/// assert_eq!(branch.parent_id, Some(root.id));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Unique identifier for the account
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// Tenant the account belongs to
    pub client_id: Uuid,

    /// Parent account, `None` for a root
    pub parent_id: Option<Uuid>,

    /// Depth in the tree, 1-based
    pub level: u8,

    /// Dot-separated sibling indices from the root down to this account
    pub hierarchy_path: String,

    /// Direct children, in insertion order
    #[serde(default)]
    pub child_ids: Vec<Uuid>,

    /// Write counter maintained by the store
    #[serde(default)]
    pub version: u64,

    /// When the account was created
    pub created_at: DateTime<Utc>,

    /// When the account was last updated
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Creates a top-level account for a tenant at the given sibling index.
    pub fn new_root(name: impl Into<String>, client_id: Uuid, index: u32) -> Self {
        Self::build(name.into(), client_id, None, ROOT_LEVEL, path::child_path("", index))
    }

    /// Creates an account directly below `parent` at the given sibling index.
    ///
    /// The tenant is inherited from the parent. Level bounds are not checked
    /// here; that is the engine's job.
    pub fn new_child(name: impl Into<String>, parent: &Account, index: u32) -> Self {
        Self::build(
            name.into(),
            parent.client_id,
            Some(parent.id),
            parent.level.saturating_add(1),
            path::child_path(&parent.hierarchy_path, index),
        )
    }

    fn build(
        name: String,
        client_id: Uuid,
        parent_id: Option<Uuid>,
        level: u8,
        hierarchy_path: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name,
            client_id,
            parent_id,
            level,
            hierarchy_path,
            child_ids: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this account is a tenant root.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether this account has no children.
    pub fn is_leaf(&self) -> bool {
        self.child_ids.is_empty()
    }

    /// Whether another level fits below this account.
    pub fn can_have_children(&self) -> bool {
        self.level < MAX_LEVEL
    }

    /// Prefix shared by the paths of all descendants.
    pub fn descendant_prefix(&self) -> String {
        path::descendant_prefix(&self.hierarchy_path)
    }

    /// Whether `other` lies strictly below this account in the same tenant.
    pub fn is_ancestor_of(&self, other: &Account) -> bool {
        self.client_id == other.client_id
            && path::is_descendant_path(&other.hierarchy_path, &self.hierarchy_path)
    }
}

/// Per-level account count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelCount {
    /// Hierarchy level
    pub level: u8,
    /// Accounts at that level
    pub count: u64,
}

/// Statistics for one branch (an account and everything below it).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BranchStats {
    /// Descendants at any depth, excluding the account itself
    pub total_descendants: u64,
    /// Accounts whose parent is this account
    pub direct_children: u64,
    /// Descendant counts per level, ascending
    pub level_breakdown: Vec<LevelCount>,
}

/// Statistics for one tenant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientStats {
    /// All accounts of the tenant
    pub total_accounts: u64,
    /// Account counts per level, ascending
    pub level_breakdown: Vec<LevelCount>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_account() {
        let client_id = Uuid::now_v7();
        let root = Account::new_root("Head Office", client_id, 3);

        assert!(root.is_root());
        assert!(root.is_leaf());
        assert_eq!(root.level, 1);
        assert_eq!(root.hierarchy_path, "3");
        assert_eq!(root.client_id, client_id);
    }

    #[test]
    fn test_child_inherits_tenant() {
        let root = Account::new_root("Head Office", Uuid::now_v7(), 1);
        let child = Account::new_child("Depot", &root, 2);

        assert_eq!(child.client_id, root.client_id);
        assert_eq!(child.level, 2);
        assert_eq!(child.hierarchy_path, "1.2");
        assert!(root.is_ancestor_of(&child));
        assert!(!child.is_ancestor_of(&root));
    }

    #[test]
    fn test_numeric_prefix_is_not_ancestry() {
        let client_id = Uuid::now_v7();
        let one = Account::new_root("One", client_id, 1);
        let ten = Account::new_root("Ten", client_id, 10);
        let under_ten = Account::new_child("Under Ten", &ten, 2);

        assert!(!one.is_ancestor_of(&under_ten));
        assert!(ten.is_ancestor_of(&under_ten));
    }

    #[test]
    fn test_can_have_children() {
        let mut account = Account::new_root("Deep", Uuid::now_v7(), 1);
        account.level = 4;
        assert!(account.can_have_children());
        account.level = MAX_LEVEL;
        assert!(!account.can_have_children());
    }

    #[test]
    fn test_serialization_uses_camel_case() {
        let account = Account::new_root("Head Office", Uuid::now_v7(), 1);
        let json = serde_json::to_value(&account).unwrap();

        assert_eq!(json["hierarchyPath"], "1");
        assert!(json["parentId"].is_null());
        assert!(json["childIds"].as_array().unwrap().is_empty());
        assert!(json.get("clientId").is_some());
    }
}
