//! Nested tree views of an account branch
//!
//! Two builders produce the same [`TreeNode`] shape:
//!
//! - [`TreeBuilder::build_tree`] walks `child_ids` one fetch at a time.
//! - [`TreeBuilder::build_tree_optimized`] issues one bounded traversal plus
//!   one label lookup per tenant, then links the flat result in memory.
//!
//! For the same stored data both return identical trees except for
//! [`TreeNode::client_label`], which only the optimized builder fills.

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::account::{Account, MAX_LEVEL, ROOT_LEVEL};
use crate::error::{HierarchyError, HierarchyResult};
use crate::store::{self, HierarchyStore, TraversedAccount};

/// Deepest traversal below a root; a level-1 root reaches level 5.
pub const TRAVERSAL_HOPS: u8 = MAX_LEVEL - ROOT_LEVEL;

/// One node of a nested account tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    /// Account id
    pub id: Uuid,
    /// Account name
    pub name: String,
    /// Account level
    pub level: u8,
    /// Materialized path
    pub path: String,
    /// Tenant label, filled by the optimized builder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_label: Option<String>,
    /// Children in `child_ids` order
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    fn leaf(account: &Account, client_label: Option<String>) -> Self {
        Self {
            id: account.id,
            name: account.name.clone(),
            level: account.level,
            path: account.hierarchy_path.clone(),
            client_label,
            children: Vec::new(),
        }
    }

    /// Copy of the tree with every label cleared.
    pub fn without_labels(&self) -> Self {
        Self {
            client_label: None,
            children: self.children.iter().map(Self::without_labels).collect(),
            ..self.clone()
        }
    }

    /// Number of nodes in the tree, this one included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Self::node_count).sum::<usize>()
    }

    /// Find a node by id anywhere in the tree.
    pub fn find(&self, id: Uuid) -> Option<&TreeNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

/// Builds [`TreeNode`] views from a [`HierarchyStore`].
#[derive(Clone)]
pub struct TreeBuilder {
    store: Arc<dyn HierarchyStore>,
    timeout: Duration,
}

impl std::fmt::Debug for TreeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeBuilder")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TreeBuilder {
    /// Create a builder whose store calls are bounded by `timeout`.
    pub fn new(store: Arc<dyn HierarchyStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Build the tree below `root_id` with one fetch per node.
    ///
    /// Returns `None` if the root does not exist. Children listed in
    /// `child_ids` but missing from the store are skipped.
    pub async fn build_tree(&self, root_id: Uuid) -> HierarchyResult<Option<TreeNode>> {
        self.build_node(root_id, 0).await
    }

    fn build_node(&self, id: Uuid, depth: u8) -> BoxFuture<'_, HierarchyResult<Option<TreeNode>>> {
        async move {
            let Some(account) =
                store::timed(self.timeout, "find_by_id", self.store.find_by_id(id)).await?
            else {
                return Ok(None);
            };

            let mut node = TreeNode::leaf(&account, None);
            if depth >= TRAVERSAL_HOPS {
                return Ok(Some(node));
            }
            for child_id in &account.child_ids {
                if let Some(child) = self.build_node(*child_id, depth + 1).await? {
                    node.children.push(child);
                }
            }
            Ok(Some(node))
        }
        .boxed()
    }

    /// Build the tree below `root_id` from a single bounded traversal.
    ///
    /// # Errors
    ///
    /// `NotFound` if the root does not exist.
    pub async fn build_tree_optimized(&self, root_id: Uuid) -> HierarchyResult<TreeNode> {
        let entries = store::timed(
            self.timeout,
            "graph_lookup",
            self.store.graph_lookup(root_id, TRAVERSAL_HOPS),
        )
        .await?;
        if entries.is_empty() {
            return Err(HierarchyError::NotFound(root_id));
        }

        let tenants: BTreeSet<Uuid> = entries.iter().map(|e| e.account.client_id).collect();
        let mut labels = HashMap::with_capacity(tenants.len());
        for client_id in tenants {
            if let Some(label) = store::timed(
                self.timeout,
                "client_label",
                self.store.client_label(client_id),
            )
            .await?
            {
                labels.insert(client_id, label);
            }
        }

        debug!(
            root_id = %root_id,
            entries = entries.len(),
            tenants = labels.len(),
            "Assembling tree from traversal"
        );

        AccountArena::new(entries, &labels)
            .into_tree(root_id)
            .ok_or(HierarchyError::NotFound(root_id))
    }
}

/// Flat traversal result with index-based child links.
struct AccountArena {
    entries: Vec<TraversedAccount>,
    labels: Vec<Option<String>>,
    children: Vec<Vec<usize>>,
}

impl AccountArena {
    fn new(entries: Vec<TraversedAccount>, labels: &HashMap<Uuid, String>) -> Self {
        let index: HashMap<Uuid, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.account.id, i))
            .collect();

        let mut children = vec![Vec::new(); entries.len()];
        let mut attached = vec![false; entries.len()];
        for (parent, entry) in entries.iter().enumerate() {
            for child_id in &entry.account.child_ids {
                let Some(&child) = index.get(child_id) else {
                    continue;
                };
                // Each entry hangs under exactly one parent, one hop above it
                if attached[child] || entries[child].depth != entry.depth + 1 {
                    continue;
                }
                attached[child] = true;
                children[parent].push(child);
            }
        }

        let labels = entries
            .iter()
            .map(|e| labels.get(&e.account.client_id).cloned())
            .collect();

        Self {
            entries,
            labels,
            children,
        }
    }

    /// Assemble the nested tree bottom-up, deepest entries first.
    fn into_tree(self, root_id: Uuid) -> Option<TreeNode> {
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by(|a, b| self.entries[*b].depth.cmp(&self.entries[*a].depth));

        let mut built: Vec<Option<TreeNode>> = vec![None; self.entries.len()];
        let mut root = None;
        for i in order {
            let entry = &self.entries[i];
            let mut node = TreeNode::leaf(&entry.account, self.labels[i].clone());
            node.children = self.children[i]
                .iter()
                .filter_map(|child| built[*child].take())
                .collect();
            if entry.depth == 0 && entry.account.id == root_id {
                root = Some(node);
            } else {
                built[i] = Some(node);
            }
        }
        root
    }
}
