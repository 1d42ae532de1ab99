//! In-memory hierarchy store
//!
//! Reference [`HierarchyStore`] backend for tests and single-process
//! embedders. Each trait call takes the lock once, so every call is atomic on
//! its own, and nothing is atomic across calls, the same guarantees a
//! document database gives.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::account::Account;
use crate::error::{StoreError, StoreResult};
use crate::store::{AccountFilter, AccountPatch, HierarchyStore, TraversedAccount};

/// In-memory account store.
///
/// Besides the store contract it offers a couple of hooks used by tests:
/// a call counter, an artificial latency, and one-shot failure injection per
/// operation name.
pub struct MemoryHierarchyStore {
    /// Accounts by id
    accounts: Arc<RwLock<HashMap<Uuid, Account>>>,
    /// Tenant labels by client id
    clients: Arc<RwLock<HashMap<Uuid, String>>>,
    /// Number of trait calls served
    calls: AtomicU64,
    /// Delay applied before every call
    latency: Mutex<Option<Duration>>,
    /// Operations whose next call fails
    failures: Mutex<HashSet<&'static str>>,
}

impl std::fmt::Debug for MemoryHierarchyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHierarchyStore")
            .field("calls", &self.calls.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MemoryHierarchyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHierarchyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            accounts: Arc::new(RwLock::new(HashMap::new())),
            clients: Arc::new(RwLock::new(HashMap::new())),
            calls: AtomicU64::new(0),
            latency: Mutex::new(None),
            failures: Mutex::new(HashSet::new()),
        }
    }

    /// Register a tenant label used by tree enrichment.
    pub async fn register_client(&self, client_id: Uuid, label: impl Into<String>) {
        self.clients.write().await.insert(client_id, label.into());
    }

    /// Number of accounts stored.
    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    /// Whether the store holds no accounts.
    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }

    /// All accounts, ordered by tenant then path.
    pub async fn snapshot(&self) -> Vec<Account> {
        let mut all: Vec<Account> = self.accounts.read().await.values().cloned().collect();
        all.sort_by(|a, b| {
            a.client_id
                .cmp(&b.client_id)
                .then_with(|| a.hierarchy_path.cmp(&b.hierarchy_path))
        });
        all
    }

    /// Number of store calls served so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Delay every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut guard) = self.latency.lock() {
            *guard = latency;
        }
    }

    /// Make the next call of `operation` fail with a backend error.
    ///
    /// Operation names match the trait method names (`"bulk_update"`,
    /// `"push_child"`, ...).
    pub fn fail_next(&self, operation: &'static str) {
        if let Ok(mut guard) = self.failures.lock() {
            guard.insert(operation);
        }
    }

    async fn enter(&self, operation: &'static str) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let latency = self.latency.lock().ok().and_then(|guard| *guard);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let injected = self
            .failures
            .lock()
            .map(|mut guard| guard.remove(operation))
            .unwrap_or(false);
        if injected {
            return Err(StoreError::Backend(format!("injected failure in {}", operation)));
        }
        Ok(())
    }

    fn sorted(mut accounts: Vec<Account>) -> Vec<Account> {
        accounts.sort_by(|a, b| {
            a.hierarchy_path
                .cmp(&b.hierarchy_path)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        accounts
    }

    fn write_patch(account: &mut Account, patch: &AccountPatch) -> StoreResult<()> {
        if let Some(expected) = patch.expected_version {
            if account.version != expected {
                return Err(StoreError::VersionConflict {
                    id: account.id,
                    expected,
                    actual: account.version,
                });
            }
        }
        patch.apply_to(account);
        account.version += 1;
        account.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl HierarchyStore for MemoryHierarchyStore {
    async fn insert(&self, mut account: Account) -> StoreResult<Uuid> {
        self.enter("insert").await?;

        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.id) {
            return Err(StoreError::DuplicateId(account.id));
        }
        let id = account.id;
        account.version = 1;
        accounts.insert(id, account);
        Ok(id)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        self.enter("find_by_id").await?;
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn find(&self, filter: &AccountFilter) -> StoreResult<Vec<Account>> {
        self.enter("find").await?;

        let accounts = self.accounts.read().await;
        let matched = accounts
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        Ok(Self::sorted(matched))
    }

    async fn count(&self, filter: &AccountFilter) -> StoreResult<u64> {
        self.enter("count").await?;

        let accounts = self.accounts.read().await;
        Ok(accounts.values().filter(|a| filter.matches(a)).count() as u64)
    }

    async fn update_by_id(&self, id: Uuid, patch: AccountPatch) -> StoreResult<Account> {
        self.enter("update_by_id").await?;

        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&id)
            .ok_or(StoreError::DocumentNotFound(id))?;
        Self::write_patch(account, &patch)?;
        Ok(account.clone())
    }

    async fn bulk_update(&self, updates: Vec<(Uuid, AccountPatch)>) -> StoreResult<u64> {
        self.enter("bulk_update").await?;

        let mut accounts = self.accounts.write().await;
        let mut written = 0;
        for (id, patch) in &updates {
            // Unmatched ids are skipped, as an unordered bulk write would
            if let Some(account) = accounts.get_mut(id) {
                Self::write_patch(account, patch)?;
                written += 1;
            }
        }
        Ok(written)
    }

    async fn delete_by_id(&self, id: Uuid) -> StoreResult<bool> {
        self.enter("delete_by_id").await?;
        Ok(self.accounts.write().await.remove(&id).is_some())
    }

    async fn push_child(&self, parent_id: Uuid, child_id: Uuid) -> StoreResult<()> {
        self.enter("push_child").await?;

        let mut accounts = self.accounts.write().await;
        let parent = accounts
            .get_mut(&parent_id)
            .ok_or(StoreError::DocumentNotFound(parent_id))?;
        if !parent.child_ids.contains(&child_id) {
            parent.child_ids.push(child_id);
            parent.version += 1;
            parent.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn pull_child(&self, parent_id: Uuid, child_id: Uuid) -> StoreResult<()> {
        self.enter("pull_child").await?;

        let mut accounts = self.accounts.write().await;
        // Pulling from a vanished parent is a no-op
        if let Some(parent) = accounts.get_mut(&parent_id) {
            let before = parent.child_ids.len();
            parent.child_ids.retain(|id| *id != child_id);
            if parent.child_ids.len() != before {
                parent.version += 1;
                parent.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn graph_lookup(
        &self,
        root_id: Uuid,
        max_hops: u8,
    ) -> StoreResult<Vec<TraversedAccount>> {
        self.enter("graph_lookup").await?;

        let accounts = self.accounts.read().await;
        let Some(root) = accounts.get(&root_id) else {
            return Ok(Vec::new());
        };

        let mut visited = HashSet::from([root_id]);
        let mut out = vec![TraversedAccount {
            account: root.clone(),
            depth: 0,
        }];
        let mut queue = VecDeque::from([(root_id, 0u8)]);

        while let Some((id, depth)) = queue.pop_front() {
            if depth >= max_hops {
                continue;
            }
            let Some(node) = accounts.get(&id) else {
                continue;
            };
            for child_id in &node.child_ids {
                if !visited.insert(*child_id) {
                    continue;
                }
                if let Some(child) = accounts.get(child_id) {
                    out.push(TraversedAccount {
                        account: child.clone(),
                        depth: depth + 1,
                    });
                    queue.push_back((*child_id, depth + 1));
                }
            }
        }

        Ok(out)
    }

    async fn client_label(&self, client_id: Uuid) -> StoreResult<Option<String>> {
        self.enter("client_label").await?;
        Ok(self.clients.read().await.get(&client_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (MemoryHierarchyStore, Account, Account, Account) {
        let store = MemoryHierarchyStore::new();
        let client_id = Uuid::now_v7();

        let mut root = Account::new_root("Root", client_id, 1);
        let mut child = Account::new_child("Child", &root, 1);
        let grandchild = Account::new_child("Grandchild", &child, 1);
        child.child_ids.push(grandchild.id);
        root.child_ids.push(child.id);

        store.insert(root.clone()).await.unwrap();
        store.insert(child.clone()).await.unwrap();
        store.insert(grandchild.clone()).await.unwrap();
        (store, root, child, grandchild)
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_id() {
        let store = MemoryHierarchyStore::new();
        let root = Account::new_root("Root", Uuid::now_v7(), 1);

        store.insert(root.clone()).await.unwrap();
        let result = store.insert(root).await;
        assert!(matches!(result, Err(StoreError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn test_find_by_prefix_is_textual() {
        let store = MemoryHierarchyStore::new();
        let client_id = Uuid::now_v7();
        let one = Account::new_root("One", client_id, 1);
        let ten = Account::new_root("Ten", client_id, 10);
        store.insert(one).await.unwrap();
        store.insert(ten).await.unwrap();

        let found = store
            .find(&AccountFilter::new().with_path_prefix("1"))
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].hierarchy_path, "1");
        assert_eq!(found[1].hierarchy_path, "10");
    }

    #[tokio::test]
    async fn test_versioned_update() {
        let (store, root, _, _) = seeded().await;

        let updated = store
            .update_by_id(root.id, AccountPatch::new().name("Renamed").if_version(1))
            .await
            .unwrap();
        assert_eq!(updated.version, 2);

        let stale = store
            .update_by_id(root.id, AccountPatch::new().name("Again").if_version(1))
            .await;
        assert!(matches!(
            stale,
            Err(StoreError::VersionConflict { expected: 1, actual: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_update_missing_document() {
        let store = MemoryHierarchyStore::new();
        let result = store.update_by_id(Uuid::now_v7(), AccountPatch::new()).await;
        assert!(matches!(result, Err(StoreError::DocumentNotFound(_))));
    }

    #[tokio::test]
    async fn test_push_and_pull_child() {
        let (store, root, _, _) = seeded().await;
        let extra = Uuid::now_v7();

        store.push_child(root.id, extra).await.unwrap();
        store.push_child(root.id, extra).await.unwrap();
        let stored = store.find_by_id(root.id).await.unwrap().unwrap();
        assert_eq!(stored.child_ids.iter().filter(|id| **id == extra).count(), 1);

        store.pull_child(root.id, extra).await.unwrap();
        let stored = store.find_by_id(root.id).await.unwrap().unwrap();
        assert!(!stored.child_ids.contains(&extra));

        // Missing parent: push fails, pull is a no-op
        assert!(store.push_child(Uuid::now_v7(), extra).await.is_err());
        assert!(store.pull_child(Uuid::now_v7(), extra).await.is_ok());
    }

    #[tokio::test]
    async fn test_graph_lookup_depths() {
        let (store, root, child, grandchild) = seeded().await;

        let all = store.graph_lookup(root.id, 4).await.unwrap();
        let depths: Vec<(Uuid, u8)> = all.iter().map(|t| (t.account.id, t.depth)).collect();
        assert_eq!(depths, vec![(root.id, 0), (child.id, 1), (grandchild.id, 2)]);

        let shallow = store.graph_lookup(root.id, 1).await.unwrap();
        assert_eq!(shallow.len(), 2);

        let missing = store.graph_lookup(Uuid::now_v7(), 4).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_level_breakdown_default_impl() {
        let (store, root, _, _) = seeded().await;

        let breakdown = store
            .level_breakdown(&AccountFilter::new().with_client(root.client_id))
            .await
            .unwrap();
        assert_eq!(breakdown.len(), 3);
        assert!(breakdown.iter().all(|lc| lc.count == 1));
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let (store, root, _, _) = seeded().await;

        store.fail_next("find_by_id");
        assert!(store.find_by_id(root.id).await.is_err());
        assert!(store.find_by_id(root.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_bulk_update_skips_unknown_ids() {
        let (store, _, child, grandchild) = seeded().await;

        let written = store
            .bulk_update(vec![
                (child.id, AccountPatch::new().position(1, "2")),
                (grandchild.id, AccountPatch::new().position(2, "2.1")),
                (Uuid::now_v7(), AccountPatch::new().position(1, "9")),
            ])
            .await
            .unwrap();
        assert_eq!(written, 2);

        let moved = store.find_by_id(grandchild.id).await.unwrap().unwrap();
        assert_eq!(moved.hierarchy_path, "2.1");
        assert_eq!(moved.level, 2);
    }
}
