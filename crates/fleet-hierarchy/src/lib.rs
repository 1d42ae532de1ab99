//! # Fleet Hierarchy
//!
//! This crate manages multi-tenant account trees for the fleet platform:
//! head offices, regions, branches and depots, up to five levels deep per
//! client.
//!
//! ## Overview
//!
//! The fleet-hierarchy crate handles:
//! - **Accounts**: The [`Account`] document with parent/child links and a
//!   materialized path (`"1.3.2"`)
//! - **Paths**: Sibling indexing and prefix rewriting ([`path`])
//! - **Engine**: Create, move (with descendant cascade), remove, and
//!   descendant/level/statistics queries ([`HierarchyEngine`])
//! - **Trees**: Nested views built recursively or from one bulk traversal
//!   ([`TreeBuilder`])
//! - **Integrity**: Read-only consistency scans ([`integrity`])
//! - **Storage**: The [`HierarchyStore`] trait and an in-memory backend
//!
//! ## Features
//!
//! - `memory` (default): [`MemoryHierarchyStore`] for tests and single-process use
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use uuid::Uuid;
//! use fleet_hierarchy::{HierarchyConfig, HierarchyEngine, MemoryHierarchyStore};
//! use fleet_telemetry::TracingTelemetrySink;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryHierarchyStore::new());
//!     let engine = HierarchyEngine::with_config(store, HierarchyConfig::from_env()?)
//!         .with_telemetry(Arc::new(TracingTelemetrySink::new()));
//!
//!     let client_id = Uuid::now_v7();
//!     let head_office = engine.create("Head Office", client_id, None).await?;
//!     let region = engine.create("North", client_id, Some(head_office.id)).await?;
//!     engine.create("Depot 7", client_id, Some(region.id)).await?;
//!
//!     let stats = engine.client_stats(client_id).await?;
//!     assert_eq!(stats.total_accounts, 3);
//!
//!     let tree = engine.build_tree_optimized(head_office.id).await?;
//!     assert_eq!(tree.node_count(), 3);
//!     Ok(())
//! }
//! ```
//!
//! ## Paths
//!
//! A root's path is its sibling index (`"2"`); a child's path is the parent's
//! path plus `.` plus its own index (`"2.1"`). The level always equals the
//! number of segments.
//!
//! [`HierarchyEngine::find_descendants`] matches the path as a plain text
//! prefix across all tenants, so `"1"` also matches `"10.4"`.
//! [`HierarchyEngine::find_branch`], the move cascade and branch statistics use
//! the dot-qualified prefix (`"1."`) within the account's tenant.

pub mod account;
pub mod config;
pub mod engine;
pub mod error;
pub mod integrity;
pub mod path;
pub mod store;
pub mod tree;

#[cfg(feature = "memory")]
pub mod memory;

// Re-export main types
pub use account::{Account, BranchStats, ClientStats, LevelCount, MAX_LEVEL, ROOT_LEVEL};
pub use config::{ConfigError, HierarchyConfig, SiblingIndexing};
pub use engine::HierarchyEngine;
pub use error::{HierarchyError, HierarchyResult, StoreError, StoreResult};
pub use integrity::{IntegrityIssue, IntegrityReport};
pub use store::{AccountFilter, AccountPatch, HierarchyStore, TraversedAccount};
pub use tree::{TreeBuilder, TreeNode, TRAVERSAL_HOPS};

#[cfg(feature = "memory")]
pub use memory::MemoryHierarchyStore;
