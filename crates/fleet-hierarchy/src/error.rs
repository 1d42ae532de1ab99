//! Error types for hierarchy operations
//!
//! [`StoreError`] covers failures reported by a [`HierarchyStore`](crate::store::HierarchyStore)
//! backend; [`HierarchyError`] is what engine and tree-builder callers see.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::account::MAX_LEVEL;

/// Store backend error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend failure (connection, query, driver)
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A versioned write found a newer version than expected
    #[error("Version conflict on account {id}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Account being written
        id: Uuid,
        /// Version the writer read
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// A write addressed a document that does not exist
    #[error("Document not found: {0}")]
    DocumentNotFound(Uuid),

    /// An insert reused an existing id
    #[error("Duplicate document id: {0}")]
    DuplicateId(Uuid),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Hierarchy error types.
///
/// The four core kinds (`NotFound`, `LevelLimitExceeded`, `HasChildren`,
/// `InvalidLevel`) are raised before any mutation. `Conflict`, `Timeout` and
/// `Store` may surface part-way through a multi-step mutation; the engine does
/// not roll back.
#[derive(Debug, Error)]
pub enum HierarchyError {
    /// Account (or named parent) does not exist
    #[error("Account not found: {0}")]
    NotFound(Uuid),

    /// Operation would place an account below the deepest level
    #[error("Level limit exceeded: level {level} is deeper than {}", MAX_LEVEL)]
    LevelLimitExceeded {
        /// Level the operation would have produced
        level: u8,
    },

    /// Deletion blocked by existing children
    #[error("Account {id} has {children} child account(s)")]
    HasChildren {
        /// Account that was to be removed
        id: Uuid,
        /// Number of linked children
        children: usize,
    },

    /// Level query outside 1..=5
    #[error("Invalid level {0}: must be between 1 and {}", MAX_LEVEL)]
    InvalidLevel(i64),

    /// Move target is the account itself or one of its descendants
    #[error("Cannot move account {id} under its own branch ({new_parent_id})")]
    CycleDetected {
        /// Account being moved
        id: Uuid,
        /// Requested parent
        new_parent_id: Uuid,
    },

    /// Parent belongs to a different tenant
    #[error("Account {parent_id} belongs to another client than {client_id}")]
    TenantMismatch {
        /// Tenant of the operation
        client_id: Uuid,
        /// Parent that was named
        parent_id: Uuid,
    },

    /// Concurrent modification detected
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    /// A store call exceeded its deadline
    #[error("Store call '{operation}' timed out after {}ms", .timeout.as_millis())]
    Timeout {
        /// Store operation name
        operation: &'static str,
        /// Configured deadline
        timeout: Duration,
    },

    /// Store backend failure
    #[error(transparent)]
    Store(StoreError),
}

/// Result type for hierarchy operations.
pub type HierarchyResult<T> = Result<T, HierarchyError>;

impl From<StoreError> for HierarchyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { .. } => HierarchyError::Conflict(err.to_string()),
            StoreError::DocumentNotFound(id) => HierarchyError::NotFound(id),
            other => HierarchyError::Store(other),
        }
    }
}

impl HierarchyError {
    /// Check if this error should be logged at error level.
    ///
    /// Rejections caused by caller input are expected and are not.
    pub fn is_server_error(&self) -> bool {
        matches!(self, HierarchyError::Timeout { .. } | HierarchyError::Store(_))
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            HierarchyError::NotFound(_) => 404,

            HierarchyError::LevelLimitExceeded { .. }
            | HierarchyError::InvalidLevel(_)
            | HierarchyError::CycleDetected { .. }
            | HierarchyError::TenantMismatch { .. } => 400,

            HierarchyError::HasChildren { .. } | HierarchyError::Conflict(_) => 409,

            HierarchyError::Timeout { .. } => 504,
            HierarchyError::Store(_) => 500,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            HierarchyError::NotFound(_) => "NOT_FOUND",
            HierarchyError::LevelLimitExceeded { .. } => "LEVEL_LIMIT_EXCEEDED",
            HierarchyError::HasChildren { .. } => "HAS_CHILDREN",
            HierarchyError::InvalidLevel(_) => "INVALID_LEVEL",
            HierarchyError::CycleDetected { .. } => "CYCLE_DETECTED",
            HierarchyError::TenantMismatch { .. } => "TENANT_MISMATCH",
            HierarchyError::Conflict(_) => "CONFLICT",
            HierarchyError::Timeout { .. } => "STORE_TIMEOUT",
            HierarchyError::Store(_) => "STORE_ERROR",
        }
    }
}
