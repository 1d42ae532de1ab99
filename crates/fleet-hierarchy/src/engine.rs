//! Account hierarchy engine
//!
//! [`HierarchyEngine`] owns every structural mutation of the account tree:
//! inserting accounts, re-parenting them (with the descendant cascade), and
//! removing leaves. It also answers the descendant, level and statistics
//! queries, and fronts the two tree builders.
//!
//! ## Write sequencing
//!
//! Each mutation is a sequence of independent store calls:
//!
//! ```text
//! create:  insert ─→ push_child(parent)
//! move:    update_by_id(node, if_version) ─→ pull_child(old) ─→ push_child(new) ─→ bulk_update(descendants)
//! remove:  pull_child(parent) ─→ delete_by_id
//! ```
//!
//! Within one process, mutations of a tenant hold that tenant's lock for
//! the whole sequence, and `move` writes the node with a version check before
//! touching anything else. Writers in other processes are not covered by the
//! lock. A store failure part-way through is returned as-is; nothing is
//! rolled back, and [`check_integrity`](HierarchyEngine::check_integrity)
//! reports the resulting inconsistencies.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use fleet_telemetry::{NoopTelemetrySink, Outcome, TelemetryEvent, TelemetrySink};
use serde_json::{json, Value};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::account::{Account, BranchStats, ClientStats, LevelCount, MAX_LEVEL, ROOT_LEVEL};
use crate::config::{HierarchyConfig, SiblingIndexing};
use crate::error::{HierarchyError, HierarchyResult, StoreResult};
use crate::integrity::{self, IntegrityReport};
use crate::path;
use crate::store::{self, AccountFilter, AccountPatch, HierarchyStore};
use crate::tree::{TreeBuilder, TreeNode};

/// Per-tenant mutation locks.
///
/// An entry lives only while some task holds or waits for it; idle entries
/// are dropped on the next acquisition.
#[derive(Default)]
struct TenantLocks {
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl TenantLocks {
    async fn acquire(&self, client_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Holders and waiters keep a clone, so a count of one means idle
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(client_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A completed move, kept for logging and telemetry.
struct MovedAccount {
    account: Account,
    old_path: String,
    descendants: usize,
}

impl MovedAccount {
    fn unchanged(account: Account) -> Self {
        Self {
            old_path: account.hierarchy_path.clone(),
            account,
            descendants: 0,
        }
    }

    fn metadata(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("old_path", json!(self.old_path)),
            ("new_path", json!(self.account.hierarchy_path)),
            ("level", json!(self.account.level)),
            ("descendants", json!(self.descendants)),
        ]
    }
}

/// The account hierarchy engine.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use uuid::Uuid;
/// use fleet_hierarchy::{HierarchyEngine, MemoryHierarchyStore};
///
/// async fn example() -> fleet_hierarchy::HierarchyResult<()> {
///     let engine = HierarchyEngine::new(Arc::new(MemoryHierarchyStore::new()));
///     let client_id = Uuid::now_v7();
///
///     let head_office = engine.create("Head Office", client_id, None).await?;
///     let branch = engine.create("North", client_id, Some(head_office.id)).await?;
///     assert_eq!(branch.hierarchy_path, "1.1");
///
///     // Promote the branch to a top-level account
///     let moved = engine.move_account(branch.id, None).await?;
///     assert_eq!(moved.hierarchy_path, "2");
///     Ok(())
/// }
/// ```
pub struct HierarchyEngine {
    store: Arc<dyn HierarchyStore>,
    telemetry: Arc<dyn TelemetrySink>,
    config: HierarchyConfig,
    locks: TenantLocks,
    trees: TreeBuilder,
}

impl std::fmt::Debug for HierarchyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchyEngine")
            .field("config", &self.config)
            .finish()
    }
}

impl HierarchyEngine {
    /// Create an engine with default configuration and no telemetry.
    pub fn new(store: Arc<dyn HierarchyStore>) -> Self {
        Self::with_config(store, HierarchyConfig::default())
    }

    /// Create an engine with explicit configuration.
    pub fn with_config(store: Arc<dyn HierarchyStore>, config: HierarchyConfig) -> Self {
        let trees = TreeBuilder::new(store.clone(), config.store_timeout());
        Self {
            store,
            telemetry: Arc::new(NoopTelemetrySink),
            config,
            locks: TenantLocks::default(),
            trees,
        }
    }

    /// Attach a telemetry sink.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &HierarchyConfig {
        &self.config
    }

    /// Tree builder sharing this engine's store.
    pub fn trees(&self) -> &TreeBuilder {
        &self.trees
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Create an account, either at the tenant root or below `parent_id`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if `parent_id` does not exist
    /// - `TenantMismatch` if the parent belongs to another client
    /// - `LevelLimitExceeded` if the parent is already at level 5
    #[instrument(skip(self, name), fields(name = %name.as_ref()))]
    pub async fn create(
        &self,
        name: impl AsRef<str> + Send,
        client_id: Uuid,
        parent_id: Option<Uuid>,
    ) -> HierarchyResult<Account> {
        let started = Instant::now();
        let result = self.create_inner(name.as_ref(), client_id, parent_id).await;
        let account_id = result.as_ref().ok().map(|a| a.id);
        let metadata = match &result {
            Ok(account) => vec![
                ("path", json!(account.hierarchy_path)),
                ("level", json!(account.level)),
            ],
            Err(_) => Vec::new(),
        };
        self.report_with(
            "account.create",
            started,
            Some(client_id),
            account_id,
            &result,
            metadata,
        )
        .await;
        result
    }

    async fn create_inner(
        &self,
        name: &str,
        client_id: Uuid,
        parent_id: Option<Uuid>,
    ) -> HierarchyResult<Account> {
        let _guard = self.lock_tenant(client_id).await;

        let account = match parent_id {
            Some(parent_id) => {
                let parent = self.fetch(parent_id).await?;
                if parent.client_id != client_id {
                    return Err(HierarchyError::TenantMismatch {
                        client_id,
                        parent_id,
                    });
                }
                if !parent.can_have_children() {
                    return Err(HierarchyError::LevelLimitExceeded {
                        level: parent.level + 1,
                    });
                }
                let index = self.sibling_index(client_id, Some(&parent), None).await?;
                Account::new_child(name, &parent, index)
            }
            None => {
                let index = self.sibling_index(client_id, None, None).await?;
                Account::new_root(name, client_id, index)
            }
        };

        let id = self.call("insert", self.store.insert(account)).await?;
        if let Some(parent_id) = parent_id {
            self.call("push_child", self.store.push_child(parent_id, id))
                .await?;
        }

        let created = self.fetch(id).await?;
        info!(
            account_id = %created.id,
            client_id = %client_id,
            level = created.level,
            path = %created.hierarchy_path,
            "Account created"
        );
        Ok(created)
    }

    /// Re-parent an account. `None` moves it to the tenant root.
    ///
    /// The account's own level and path are recomputed, and every descendant
    /// is rewritten in one bulk update: its path prefix is swapped and its
    /// level shifted by the same amount as the account's.
    ///
    /// Moving to the current parent is a no-op and returns the stored account.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the account or the named parent does not exist
    /// - `CycleDetected` if the parent is the account or one of its descendants
    /// - `TenantMismatch` if the parent belongs to another client
    /// - `LevelLimitExceeded` if the account or its deepest descendant would
    ///   land below level 5
    /// - `Conflict` if the account was modified concurrently
    #[instrument(skip(self))]
    pub async fn move_account(
        &self,
        id: Uuid,
        new_parent_id: Option<Uuid>,
    ) -> HierarchyResult<Account> {
        let started = Instant::now();
        let mut client_id = None;
        let outcome = match self.fetch(id).await {
            Ok(node) => {
                client_id = Some(node.client_id);
                self.move_inner(node, new_parent_id).await
            }
            Err(err) => Err(err),
        };
        let metadata = outcome
            .as_ref()
            .map(MovedAccount::metadata)
            .unwrap_or_default();
        let result = outcome.map(|moved| moved.account);
        self.report_with("account.move", started, client_id, Some(id), &result, metadata)
            .await;
        result
    }

    async fn move_inner(
        &self,
        node: Account,
        new_parent_id: Option<Uuid>,
    ) -> HierarchyResult<MovedAccount> {
        let id = node.id;
        if node.parent_id == new_parent_id {
            debug!(account_id = %id, "Move to current parent, nothing to do");
            return Ok(MovedAccount::unchanged(node));
        }

        let _guard = self.lock_tenant(node.client_id).await;
        // Re-read under the lock; the first read only located the tenant
        let node = self.fetch(id).await?;
        if node.parent_id == new_parent_id {
            return Ok(MovedAccount::unchanged(node));
        }

        let new_parent = match new_parent_id {
            Some(parent_id) => Some(self.resolve_new_parent(&node, parent_id).await?),
            None => None,
        };

        let old_level = node.level;
        let old_path = node.hierarchy_path.clone();
        let new_level = new_parent.as_ref().map_or(ROOT_LEVEL, |p| p.level + 1);
        let delta = i16::from(new_level) - i16::from(old_level);

        // Collected before any write so the scan sees the old prefix
        let candidates = self
            .call(
                "find",
                self.store.find(
                    &AccountFilter::new()
                        .with_client(node.client_id)
                        .with_path_prefix(node.descendant_prefix()),
                ),
            )
            .await?;
        let matched = candidates.len();
        let descendants = branch_members(node.id, candidates);
        if descendants.len() != matched {
            warn!(
                account_id = %id,
                path = %node.hierarchy_path,
                skipped = matched - descendants.len(),
                "Accounts under the moved path belong to another branch"
            );
        }

        let deepest = descendants
            .iter()
            .map(|d| d.level)
            .max()
            .unwrap_or(old_level);
        let deepest_after = i16::from(deepest) + delta;
        if deepest_after > i16::from(MAX_LEVEL) {
            return Err(HierarchyError::LevelLimitExceeded {
                level: u8::try_from(deepest_after).unwrap_or(u8::MAX),
            });
        }

        let index = self
            .sibling_index(node.client_id, new_parent.as_ref(), Some(node.id))
            .await?;
        let parent_path = new_parent
            .as_ref()
            .map_or("", |p| p.hierarchy_path.as_str());
        let new_path = path::child_path(parent_path, index);

        let patch = AccountPatch::new()
            .parent(new_parent_id)
            .position(new_level, new_path.clone())
            .if_version(node.version);
        let updated = self
            .call("update_by_id", self.store.update_by_id(node.id, patch))
            .await?;

        if let Some(old_parent_id) = node.parent_id {
            self.call("pull_child", self.store.pull_child(old_parent_id, node.id))
                .await?;
        }
        if let Some(parent) = &new_parent {
            self.call("push_child", self.store.push_child(parent.id, node.id))
                .await?;
        }

        if !descendants.is_empty() {
            let updates: Vec<(Uuid, AccountPatch)> = descendants
                .iter()
                .map(|d| {
                    let level = u8::try_from(i16::from(d.level) + delta).unwrap_or(MAX_LEVEL);
                    let rewritten = path::rewrite_prefix(&d.hierarchy_path, &old_path, &new_path);
                    (d.id, AccountPatch::new().position(level, rewritten))
                })
                .collect();
            let expected = updates.len() as u64;
            let written = self
                .call("bulk_update", self.store.bulk_update(updates))
                .await?;
            if written != expected {
                warn!(
                    account_id = %id,
                    expected,
                    written,
                    "Descendants changed during cascade"
                );
            }
        }

        info!(
            account_id = %id,
            old_path = %old_path,
            new_path = %new_path,
            descendants = descendants.len(),
            "Account moved"
        );
        Ok(MovedAccount {
            account: updated,
            old_path,
            descendants: descendants.len(),
        })
    }

    async fn resolve_new_parent(&self, node: &Account, parent_id: Uuid) -> HierarchyResult<Account> {
        if parent_id == node.id {
            return Err(HierarchyError::CycleDetected {
                id: node.id,
                new_parent_id: parent_id,
            });
        }

        let parent = self.fetch(parent_id).await?;
        if parent.client_id != node.client_id {
            return Err(HierarchyError::TenantMismatch {
                client_id: node.client_id,
                parent_id,
            });
        }
        if !parent.can_have_children() {
            return Err(HierarchyError::LevelLimitExceeded {
                level: parent.level + 1,
            });
        }

        // Paths are a cache; confirm by walking parent pointers as well
        if node.is_ancestor_of(&parent) || self.has_ancestor(&parent, node.id).await? {
            return Err(HierarchyError::CycleDetected {
                id: node.id,
                new_parent_id: parent_id,
            });
        }
        Ok(parent)
    }

    async fn has_ancestor(&self, start: &Account, ancestor_id: Uuid) -> HierarchyResult<bool> {
        let mut next = start.parent_id;
        let mut hops = 0;
        while let Some(id) = next {
            if id == ancestor_id {
                return Ok(true);
            }
            hops += 1;
            if hops > usize::from(MAX_LEVEL) {
                warn!(account_id = %start.id, "Parent chain longer than the level limit");
                break;
            }
            next = match self.call("find_by_id", self.store.find_by_id(id)).await? {
                Some(account) => account.parent_id,
                None => None,
            };
        }
        Ok(false)
    }

    /// Remove a leaf account.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the account does not exist
    /// - `HasChildren` if any child is linked to it, either through its
    ///   `child_ids` or through a child's `parent_id`
    #[instrument(skip(self))]
    pub async fn remove(&self, id: Uuid) -> HierarchyResult<()> {
        let started = Instant::now();
        let mut client_id = None;
        let result = match self.fetch(id).await {
            Ok(node) => {
                client_id = Some(node.client_id);
                self.remove_inner(node).await
            }
            Err(err) => Err(err),
        };
        self.report("account.remove", started, client_id, Some(id), &result)
            .await;
        result
    }

    async fn remove_inner(&self, node: Account) -> HierarchyResult<()> {
        let id = node.id;
        let _guard = self.lock_tenant(node.client_id).await;
        let node = self.fetch(id).await?;

        let pointing_back = self
            .call(
                "count",
                self.store.count(&AccountFilter::new().with_parent(Some(id))),
            )
            .await?;
        let children = node
            .child_ids
            .len()
            .max(usize::try_from(pointing_back).unwrap_or(usize::MAX));
        if children > 0 {
            return Err(HierarchyError::HasChildren { id, children });
        }

        if let Some(parent_id) = node.parent_id {
            self.call("pull_child", self.store.pull_child(parent_id, id))
                .await?;
        }
        if !self.call("delete_by_id", self.store.delete_by_id(id)).await? {
            return Err(HierarchyError::NotFound(id));
        }

        info!(account_id = %id, path = %node.hierarchy_path, "Account removed");
        Ok(())
    }

    /// Change an account's display name. Structure is untouched.
    #[instrument(skip(self, name), fields(name = %name.as_ref()))]
    pub async fn rename(&self, id: Uuid, name: impl AsRef<str> + Send) -> HierarchyResult<Account> {
        let started = Instant::now();
        let result = self
            .call(
                "update_by_id",
                self.store
                    .update_by_id(id, AccountPatch::new().name(name.as_ref())),
            )
            .await;
        let client_id = result.as_ref().ok().map(|a| a.client_id);
        self.report("account.rename", started, client_id, Some(id), &result)
            .await;
        result
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Fetch one account.
    pub async fn get(&self, id: Uuid) -> HierarchyResult<Account> {
        self.fetch(id).await
    }

    /// Direct children of an account, in `child_ids` order.
    ///
    /// Children that point at the account but are missing from its
    /// `child_ids` are appended after the listed ones.
    pub async fn children(&self, id: Uuid) -> HierarchyResult<Vec<Account>> {
        let node = self.fetch(id).await?;
        let mut children = self
            .call(
                "find",
                self.store.find(&AccountFilter::new().with_parent(Some(id))),
            )
            .await?;

        let position: HashMap<Uuid, usize> = node
            .child_ids
            .iter()
            .enumerate()
            .map(|(i, child_id)| (*child_id, i))
            .collect();
        children.sort_by_key(|c| position.get(&c.id).copied().unwrap_or(usize::MAX));
        Ok(children)
    }

    /// Ancestors of an account, root first. Empty for a root.
    pub async fn ancestors(&self, id: Uuid) -> HierarchyResult<Vec<Account>> {
        let node = self.fetch(id).await?;
        let mut chain = Vec::new();
        let mut next = node.parent_id;

        while let Some(parent_id) = next {
            if chain.len() >= usize::from(MAX_LEVEL) {
                warn!(account_id = %id, "Parent chain longer than the level limit");
                break;
            }
            let parent = self.fetch(parent_id).await?;
            next = parent.parent_id;
            chain.push(parent);
        }

        chain.reverse();
        Ok(chain)
    }

    /// Every account, in any tenant, whose path textually starts with this
    /// account's path, excluding the account itself.
    ///
    /// The match is not dot-qualified: for an account at `"1"` this also
    /// returns accounts under `"10"`, `"11"`, and so on. Use
    /// [`find_branch`](Self::find_branch) for the exact subtree.
    #[instrument(skip(self))]
    pub async fn find_descendants(&self, id: Uuid) -> HierarchyResult<Vec<Account>> {
        let started = Instant::now();
        let result: HierarchyResult<Vec<Account>> = async {
            let node = self.fetch(id).await?;
            let filter = AccountFilter::new()
                .with_path_prefix(node.hierarchy_path.clone())
                .excluding(node.id);
            self.call("find", self.store.find(&filter)).await
        }
        .await;
        self.report("account.find_descendants", started, None, Some(id), &result)
            .await;
        result
    }

    /// Strict descendants of an account within its tenant.
    pub async fn find_branch(&self, id: Uuid) -> HierarchyResult<Vec<Account>> {
        let node = self.fetch(id).await?;
        let filter = AccountFilter::new()
            .with_client(node.client_id)
            .with_path_prefix(node.descendant_prefix());
        self.call("find", self.store.find(&filter)).await
    }

    /// All accounts of a tenant at one level.
    ///
    /// # Errors
    ///
    /// `InvalidLevel` if `level` is outside `1..=5`.
    #[instrument(skip(self))]
    pub async fn find_by_level(&self, level: i64, client_id: Uuid) -> HierarchyResult<Vec<Account>> {
        let started = Instant::now();
        let result: HierarchyResult<Vec<Account>> = async {
            let level = validate_level(level)?;
            let filter = AccountFilter::new().with_client(client_id).with_level(level);
            self.call("find", self.store.find(&filter)).await
        }
        .await;
        self.report("account.find_by_level", started, Some(client_id), None, &result)
            .await;
        result
    }

    /// Descendant counts for one branch, scoped to the account's tenant.
    #[instrument(skip(self))]
    pub async fn branch_stats(&self, id: Uuid) -> HierarchyResult<BranchStats> {
        let started = Instant::now();
        let result: HierarchyResult<BranchStats> = async {
            let node = self.fetch(id).await?;
            let descendants = AccountFilter::new()
                .with_client(node.client_id)
                .with_path_prefix(node.descendant_prefix());
            let level_breakdown = self
                .call("level_breakdown", self.store.level_breakdown(&descendants))
                .await?;
            let direct_children = self
                .call(
                    "count",
                    self.store.count(&AccountFilter::new().with_parent(Some(id))),
                )
                .await?;

            Ok(BranchStats {
                total_descendants: total(&level_breakdown),
                direct_children,
                level_breakdown,
            })
        }
        .await;
        self.report("account.branch_stats", started, None, Some(id), &result)
            .await;
        result
    }

    /// Account counts for one tenant, per level.
    #[instrument(skip(self))]
    pub async fn client_stats(&self, client_id: Uuid) -> HierarchyResult<ClientStats> {
        let started = Instant::now();
        let result: HierarchyResult<ClientStats> = async {
            let filter = AccountFilter::new().with_client(client_id);
            let level_breakdown = self
                .call("level_breakdown", self.store.level_breakdown(&filter))
                .await?;
            Ok(ClientStats {
                total_accounts: total(&level_breakdown),
                level_breakdown,
            })
        }
        .await;
        self.report("account.client_stats", started, Some(client_id), None, &result)
            .await;
        result
    }

    // ------------------------------------------------------------------
    // Trees and integrity
    // ------------------------------------------------------------------

    /// Build the nested tree below `root_id` with one fetch per node.
    #[instrument(skip(self))]
    pub async fn build_tree(&self, root_id: Uuid) -> HierarchyResult<Option<TreeNode>> {
        let started = Instant::now();
        let result = self.trees.build_tree(root_id).await;
        self.report("tree.build", started, None, Some(root_id), &result)
            .await;
        result
    }

    /// Build the nested tree below `root_id` from a single traversal.
    #[instrument(skip(self))]
    pub async fn build_tree_optimized(&self, root_id: Uuid) -> HierarchyResult<TreeNode> {
        let started = Instant::now();
        let result = self.trees.build_tree_optimized(root_id).await;
        self.report("tree.build_optimized", started, None, Some(root_id), &result)
            .await;
        result
    }

    /// Scan one tenant and report every structural inconsistency.
    #[instrument(skip(self))]
    pub async fn check_integrity(&self, client_id: Uuid) -> HierarchyResult<IntegrityReport> {
        let started = Instant::now();
        let result =
            integrity::check_tenant(self.store.as_ref(), client_id, self.config.store_timeout())
                .await;
        if let Ok(report) = &result {
            if !report.is_consistent() {
                warn!(
                    client_id = %client_id,
                    issues = report.issues.len(),
                    "Hierarchy inconsistencies detected"
                );
            }
        }
        self.report("integrity.check", started, Some(client_id), None, &result)
            .await;
        result
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn lock_tenant(&self, client_id: Uuid) -> Option<OwnedMutexGuard<()>> {
        if self.config.serialize_mutations {
            Some(self.locks.acquire(client_id).await)
        } else {
            None
        }
    }

    async fn call<T, F>(&self, operation: &'static str, call: F) -> HierarchyResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        store::timed(self.config.store_timeout(), operation, call).await
    }

    async fn fetch(&self, id: Uuid) -> HierarchyResult<Account> {
        self.call("find_by_id", self.store.find_by_id(id))
            .await?
            .ok_or(HierarchyError::NotFound(id))
    }

    /// Sibling index for a new position under `parent` (tenant root if `None`).
    async fn sibling_index(
        &self,
        client_id: Uuid,
        parent: Option<&Account>,
        exclude: Option<Uuid>,
    ) -> HierarchyResult<u32> {
        let mut filter = match parent {
            Some(parent) => AccountFilter::new().with_parent(Some(parent.id)),
            None => AccountFilter::new()
                .with_client(client_id)
                .with_level(ROOT_LEVEL),
        };
        if let Some(id) = exclude {
            filter = filter.excluding(id);
        }

        let siblings = self.call("find", self.store.find(&filter)).await?;
        let paths: Vec<&str> = siblings.iter().map(|s| s.hierarchy_path.as_str()).collect();

        Ok(match self.config.sibling_indexing {
            SiblingIndexing::Count => {
                let start = u32::try_from(paths.len()).unwrap_or(u32::MAX).saturating_add(1);
                path::first_unused_index(start, &paths)
            }
            SiblingIndexing::NextFree => path::next_sibling_index(&paths),
        })
    }

    async fn report<T>(
        &self,
        operation: &'static str,
        started: Instant,
        client_id: Option<Uuid>,
        account_id: Option<Uuid>,
        result: &HierarchyResult<T>,
    ) {
        self.report_with(operation, started, client_id, account_id, result, Vec::new())
            .await;
    }

    async fn report_with<T>(
        &self,
        operation: &'static str,
        started: Instant,
        client_id: Option<Uuid>,
        account_id: Option<Uuid>,
        result: &HierarchyResult<T>,
        metadata: Vec<(&'static str, Value)>,
    ) {
        if let Err(err) = result {
            if err.is_server_error() {
                error!(operation, error = %err, "Hierarchy operation failed");
            } else {
                debug!(operation, error = %err, "Hierarchy operation rejected");
            }
        }

        if !self.config.telemetry_enabled {
            return;
        }

        let outcome = if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        };
        let mut event = TelemetryEvent::new(operation, outcome).with_duration(started.elapsed());
        if let Some(client_id) = client_id {
            event = event.with_client(client_id);
        }
        if let Some(account_id) = account_id {
            event = event.with_account(account_id);
        }
        if let Err(err) = result {
            event = event.with_error_code(err.error_code());
        }
        for (key, value) in metadata {
            event = event.with_metadata(key, value);
        }

        match tokio::time::timeout(self.config.telemetry_timeout(), self.telemetry.emit(event)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(operation, error = %e, "Failed to emit telemetry event"),
            Err(_) => warn!(operation, "Telemetry emit timed out"),
        }
    }
}

/// Keep the candidates whose parent chain reaches `root_id` through other
/// candidates.
///
/// A path prefix alone can also match the subtree of a sibling that shares
/// the root's path, so prefix matches are confirmed by ancestry.
fn branch_members(root_id: Uuid, candidates: Vec<Account>) -> Vec<Account> {
    let parents: HashMap<Uuid, Option<Uuid>> =
        candidates.iter().map(|a| (a.id, a.parent_id)).collect();

    candidates
        .into_iter()
        .filter(|account| {
            let mut next = account.parent_id;
            for _ in 0..MAX_LEVEL {
                match next {
                    Some(id) if id == root_id => return true,
                    Some(id) => next = parents.get(&id).copied().flatten(),
                    None => return false,
                }
            }
            false
        })
        .collect()
}

fn validate_level(level: i64) -> HierarchyResult<u8> {
    match u8::try_from(level) {
        Ok(l) if (ROOT_LEVEL..=MAX_LEVEL).contains(&l) => Ok(l),
        _ => Err(HierarchyError::InvalidLevel(level)),
    }
}

fn total(breakdown: &[LevelCount]) -> u64 {
    breakdown.iter().map(|lc| lc.count).sum()
}
