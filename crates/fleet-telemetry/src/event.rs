//! Telemetry event envelope
//!
//! Every hierarchy operation reports one [`TelemetryEvent`] once it has
//! finished, successfully or not. The envelope carries enough context for a
//! downstream collector to route and aggregate events without knowing the
//! hierarchy domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Outcome of the operation an event describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The operation completed and returned a value
    Success,
    /// The operation was rejected or failed
    Failure,
}

impl Outcome {
    /// Get string representation of the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// Structured telemetry event.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fleet_telemetry::{Outcome, TelemetryEvent};
///
/// let event = TelemetryEvent::new("account.create", Outcome::Success)
///     .with_duration(Duration::from_millis(12))
///     .with_metadata("level", serde_json::json!(2));
///
/// assert_eq!(event.topic(), "hierarchy.account.create.success");
/// assert_eq!(event.duration_ms, 12);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Unique event ID
    pub id: Uuid,

    /// Operation name (e.g., "account.move", "tree.build_optimized")
    pub operation: String,

    /// Whether the operation succeeded
    pub outcome: Outcome,

    /// Timestamp when the event was created
    pub timestamp: DateTime<Utc>,

    /// Wall-clock time the operation took
    pub duration_ms: u64,

    /// Tenant the operation ran against, when known
    pub client_id: Option<Uuid>,

    /// Primary account the operation touched, when known
    pub account_id: Option<Uuid>,

    /// Machine-readable error code for failures
    pub error_code: Option<String>,

    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TelemetryEvent {
    /// Create a new event for an operation.
    pub fn new(operation: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            id: Uuid::now_v7(),
            operation: operation.into(),
            outcome,
            timestamp: Utc::now(),
            duration_ms: 0,
            client_id: None,
            account_id: None,
            error_code: None,
            metadata: HashMap::new(),
        }
    }

    /// Set the measured duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set tenant context.
    pub fn with_client(mut self, client_id: Uuid) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// Set account context.
    pub fn with_account(mut self, account_id: Uuid) -> Self {
        self.account_id = Some(account_id);
        self
    }

    /// Set the error code of a failed operation.
    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Get the topic for this event.
    ///
    /// Topics are structured as: `hierarchy.{operation}.{outcome}`
    pub fn topic(&self) -> String {
        format!("hierarchy.{}.{}", self.operation, self.outcome.as_str())
    }

    /// Whether the event describes a failed operation.
    pub fn is_failure(&self) -> bool {
        self.outcome == Outcome::Failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let client_id = Uuid::now_v7();
        let account_id = Uuid::now_v7();

        let event = TelemetryEvent::new("account.remove", Outcome::Failure)
            .with_client(client_id)
            .with_account(account_id)
            .with_error_code("HAS_CHILDREN");

        assert_eq!(event.client_id, Some(client_id));
        assert_eq!(event.account_id, Some(account_id));
        assert_eq!(event.error_code.as_deref(), Some("HAS_CHILDREN"));
        assert!(event.is_failure());
        assert_eq!(event.topic(), "hierarchy.account.remove.failure");
    }

    #[test]
    fn test_event_serialization() {
        let event = TelemetryEvent::new("account.create", Outcome::Success)
            .with_metadata("level", serde_json::json!(3));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["operation"], "account.create");
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["metadata"]["level"], 3);
    }
}
