//! Structural consistency checks
//!
//! Multi-step mutations are not transactional, so a failure between two
//! store calls can leave links and paths out of step. [`check_tenant`] scans
//! one tenant and reports every violation it finds; it never repairs.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use uuid::Uuid;

use crate::account::{Account, MAX_LEVEL, ROOT_LEVEL};
use crate::error::HierarchyResult;
use crate::path;
use crate::store::{self, AccountFilter, HierarchyStore};

/// One structural violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityIssue {
    /// Level is outside `1..=5`
    LevelOutOfRange { id: Uuid, level: u8 },
    /// Level differs from the number of path segments
    LevelPathMismatch { id: Uuid, level: u8, segments: usize },
    /// Root account not at level 1
    RootNotTopLevel { id: Uuid, level: u8 },
    /// `parent_id` names an account that does not exist
    MissingParent { id: Uuid, parent_id: Uuid },
    /// Parent belongs to another tenant
    ForeignParent { id: Uuid, parent_id: Uuid },
    /// Level is not the parent's level plus one
    LevelNotBelowParent { id: Uuid, level: u8, parent_level: u8 },
    /// Path does not extend the parent's path by one segment
    PathNotUnderParent {
        id: Uuid,
        path: String,
        parent_path: String,
    },
    /// Parent does not list the account in `child_ids`
    ChildNotListed { parent_id: Uuid, child_id: Uuid },
    /// `child_ids` entry that does not exist
    MissingChild { parent_id: Uuid, child_id: Uuid },
    /// `child_ids` entry whose `parent_id` points elsewhere
    ChildNotPointingBack { parent_id: Uuid, child_id: Uuid },
    /// Several accounts share one path
    DuplicatePath { path: String, ids: Vec<Uuid> },
}

/// Result of scanning one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    /// Tenant scanned
    pub client_id: Uuid,
    /// Accounts examined
    pub accounts_checked: usize,
    /// Violations found, in scan order
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    /// Whether the scan found nothing.
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Scan every account of a tenant.
///
/// Accounts of other tenants are only fetched when a link points at them.
pub async fn check_tenant(
    store: &dyn HierarchyStore,
    client_id: Uuid,
    timeout: Duration,
) -> HierarchyResult<IntegrityReport> {
    let accounts = store::timed(
        timeout,
        "find",
        store.find(&AccountFilter::new().with_client(client_id)),
    )
    .await?;

    let mut known: HashMap<Uuid, Account> =
        accounts.iter().map(|a| (a.id, a.clone())).collect();
    let mut issues = Vec::new();
    let mut by_path: BTreeMap<&str, Vec<Uuid>> = BTreeMap::new();

    for account in &accounts {
        by_path
            .entry(account.hierarchy_path.as_str())
            .or_default()
            .push(account.id);

        if !(ROOT_LEVEL..=MAX_LEVEL).contains(&account.level) {
            issues.push(IntegrityIssue::LevelOutOfRange {
                id: account.id,
                level: account.level,
            });
        }
        let segments = path::segment_count(&account.hierarchy_path);
        if segments != usize::from(account.level) {
            issues.push(IntegrityIssue::LevelPathMismatch {
                id: account.id,
                level: account.level,
                segments,
            });
        }

        match account.parent_id {
            None => {
                if account.level != ROOT_LEVEL {
                    issues.push(IntegrityIssue::RootNotTopLevel {
                        id: account.id,
                        level: account.level,
                    });
                }
            }
            Some(parent_id) => {
                match lookup(store, &mut known, parent_id, timeout).await? {
                    None => issues.push(IntegrityIssue::MissingParent {
                        id: account.id,
                        parent_id,
                    }),
                    Some(parent) => check_parent_link(account, &parent, &mut issues),
                }
            }
        }

        for child_id in &account.child_ids {
            match lookup(store, &mut known, *child_id, timeout).await? {
                None => issues.push(IntegrityIssue::MissingChild {
                    parent_id: account.id,
                    child_id: *child_id,
                }),
                Some(child) if child.parent_id != Some(account.id) => {
                    issues.push(IntegrityIssue::ChildNotPointingBack {
                        parent_id: account.id,
                        child_id: *child_id,
                    })
                }
                Some(_) => {}
            }
        }
    }

    for (path, ids) in by_path {
        if ids.len() > 1 {
            issues.push(IntegrityIssue::DuplicatePath {
                path: path.to_string(),
                ids,
            });
        }
    }

    Ok(IntegrityReport {
        client_id,
        accounts_checked: accounts.len(),
        issues,
    })
}

fn check_parent_link(account: &Account, parent: &Account, issues: &mut Vec<IntegrityIssue>) {
    if parent.client_id != account.client_id {
        issues.push(IntegrityIssue::ForeignParent {
            id: account.id,
            parent_id: parent.id,
        });
    }
    if u16::from(account.level) != u16::from(parent.level) + 1 {
        issues.push(IntegrityIssue::LevelNotBelowParent {
            id: account.id,
            level: account.level,
            parent_level: parent.level,
        });
    }
    if path::parent_path(&account.hierarchy_path) != Some(parent.hierarchy_path.as_str()) {
        issues.push(IntegrityIssue::PathNotUnderParent {
            id: account.id,
            path: account.hierarchy_path.clone(),
            parent_path: parent.hierarchy_path.clone(),
        });
    }
    if !parent.child_ids.contains(&account.id) {
        issues.push(IntegrityIssue::ChildNotListed {
            parent_id: parent.id,
            child_id: account.id,
        });
    }
}

async fn lookup(
    store: &dyn HierarchyStore,
    known: &mut HashMap<Uuid, Account>,
    id: Uuid,
    timeout: Duration,
) -> HierarchyResult<Option<Account>> {
    if let Some(account) = known.get(&id) {
        return Ok(Some(account.clone()));
    }
    let fetched = store::timed(timeout, "find_by_id", store.find_by_id(id)).await?;
    if let Some(account) = &fetched {
        known.insert(id, account.clone());
    }
    Ok(fetched)
}
