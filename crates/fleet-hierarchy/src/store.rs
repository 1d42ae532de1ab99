//! Hierarchy store abstraction
//!
//! The engine never talks to a database directly. It goes through
//! [`HierarchyStore`], a document-store contract small enough to back with
//! MongoDB, Postgres JSONB or the bundled [`MemoryHierarchyStore`](crate::memory::MemoryHierarchyStore).

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::account::{Account, LevelCount};
use crate::error::{HierarchyError, HierarchyResult, StoreResult};

/// Query filter over accounts.
///
/// All set fields must match. An empty filter matches every account.
///
/// # Examples
///
/// ```
/// use uuid::Uuid;
/// use fleet_hierarchy::{Account, AccountFilter};
///
/// let client_id = Uuid::now_v7();
/// let root = Account::new_root("Head Office", client_id, 1);
///
/// let filter = AccountFilter::new().with_client(client_id).with_level(1);
/// assert!(filter.matches(&root));
///
/// let filter = AccountFilter::new().with_path_prefix("2");
/// assert!(!filter.matches(&root));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountFilter {
    /// Exact tenant match
    pub client_id: Option<Uuid>,
    /// Exact parent match; `Some(None)` selects roots
    pub parent_id: Option<Option<Uuid>>,
    /// Exact level match
    pub level: Option<u8>,
    /// Textual prefix of `hierarchy_path`
    pub path_prefix: Option<String>,
    /// Account to leave out of the result
    pub exclude_id: Option<Uuid>,
}

impl AccountFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one tenant.
    pub fn with_client(mut self, client_id: Uuid) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// Restrict to children of `parent_id` (`None` selects roots).
    pub fn with_parent(mut self, parent_id: Option<Uuid>) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Restrict to one level.
    pub fn with_level(mut self, level: u8) -> Self {
        self.level = Some(level);
        self
    }

    /// Restrict to paths starting with `prefix`.
    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    /// Leave one account out.
    pub fn excluding(mut self, id: Uuid) -> Self {
        self.exclude_id = Some(id);
        self
    }

    /// Evaluate the filter against one account.
    pub fn matches(&self, account: &Account) -> bool {
        if self.exclude_id == Some(account.id) {
            return false;
        }
        if let Some(client_id) = self.client_id {
            if account.client_id != client_id {
                return false;
            }
        }
        if let Some(parent_id) = self.parent_id {
            if account.parent_id != parent_id {
                return false;
            }
        }
        if let Some(level) = self.level {
            if account.level != level {
                return false;
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if !account.hierarchy_path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Partial update of an account.
///
/// Unset fields are left untouched. `parent_id` uses a double option so a
/// patch can clear the parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountPatch {
    /// New display name
    pub name: Option<String>,
    /// New parent (`Some(None)` detaches to root)
    pub parent_id: Option<Option<Uuid>>,
    /// New level
    pub level: Option<u8>,
    /// New materialized path
    pub hierarchy_path: Option<String>,
    /// Reject the write unless the stored version equals this
    pub expected_version: Option<u64>,
}

impl AccountPatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the display name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the parent.
    pub fn parent(mut self, parent_id: Option<Uuid>) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Set the level and path together.
    pub fn position(mut self, level: u8, hierarchy_path: impl Into<String>) -> Self {
        self.level = Some(level);
        self.hierarchy_path = Some(hierarchy_path.into());
        self
    }

    /// Guard the write with a version check.
    pub fn if_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.parent_id.is_none()
            && self.level.is_none()
            && self.hierarchy_path.is_none()
    }

    /// Apply the field changes to an account in place.
    ///
    /// Version checking and version bumping are the store's concern.
    pub fn apply_to(&self, account: &mut Account) {
        if let Some(name) = &self.name {
            account.name = name.clone();
        }
        if let Some(parent_id) = self.parent_id {
            account.parent_id = parent_id;
        }
        if let Some(level) = self.level {
            account.level = level;
        }
        if let Some(path) = &self.hierarchy_path {
            account.hierarchy_path = path.clone();
        }
    }
}

/// One entry of a bounded-depth traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct TraversedAccount {
    /// The account reached
    pub account: Account,
    /// Hops from the traversal root (root is `0`)
    pub depth: u8,
}

/// Document store contract for accounts.
///
/// Single calls are atomic per document; nothing spans calls. Multi-step
/// mutations are sequenced by the engine.
#[async_trait]
pub trait HierarchyStore: Send + Sync {
    /// Insert a new account and return its id.
    async fn insert(&self, account: Account) -> StoreResult<Uuid>;

    /// Fetch an account by id.
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Account>>;

    /// Fetch all accounts matching a filter, ordered by path.
    async fn find(&self, filter: &AccountFilter) -> StoreResult<Vec<Account>>;

    /// Count accounts matching a filter.
    async fn count(&self, filter: &AccountFilter) -> StoreResult<u64>;

    /// Apply a patch to one account.
    async fn update_by_id(&self, id: Uuid, patch: AccountPatch) -> StoreResult<Account>;

    /// Apply many patches in one call. Returns the number of accounts written.
    async fn bulk_update(&self, updates: Vec<(Uuid, AccountPatch)>) -> StoreResult<u64>;

    /// Delete an account. Returns whether it existed.
    async fn delete_by_id(&self, id: Uuid) -> StoreResult<bool>;

    /// Atomically append `child_id` to the parent's `child_ids` if absent.
    async fn push_child(&self, parent_id: Uuid, child_id: Uuid) -> StoreResult<()>;

    /// Atomically remove `child_id` from the parent's `child_ids`.
    async fn pull_child(&self, parent_id: Uuid, child_id: Uuid) -> StoreResult<()>;

    /// Traverse `child_ids` from `root_id`, at most `max_hops` deep.
    ///
    /// Returns the root (depth 0) followed by every reachable descendant, or
    /// an empty list if the root does not exist.
    async fn graph_lookup(&self, root_id: Uuid, max_hops: u8)
        -> StoreResult<Vec<TraversedAccount>>;

    /// Display label of a tenant, if the tenant is known.
    async fn client_label(&self, client_id: Uuid) -> StoreResult<Option<String>>;

    /// Group matching accounts by level.
    ///
    /// The default implementation aggregates client-side over [`find`](Self::find);
    /// backends with a native grouping query should override it.
    async fn level_breakdown(&self, filter: &AccountFilter) -> StoreResult<Vec<LevelCount>> {
        let accounts = self.find(filter).await?;
        let mut counts: BTreeMap<u8, u64> = BTreeMap::new();
        for account in &accounts {
            *counts.entry(account.level).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(level, count)| LevelCount { level, count })
            .collect())
    }
}

/// Run one store call under a deadline, converting its error.
pub(crate) async fn timed<T, F>(
    timeout: Duration,
    operation: &'static str,
    call: F,
) -> HierarchyResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(HierarchyError::from),
        Err(_) => {
            tracing::warn!(
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "Store call timed out"
            );
            Err(HierarchyError::Timeout { operation, timeout })
        }
    }
}
