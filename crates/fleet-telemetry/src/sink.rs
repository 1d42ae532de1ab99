//! Telemetry sink implementation
//!
//! This module provides the sink abstraction the hierarchy engine reports to,
//! plus a few in-process implementations. Transport to an external collector
//! is left to embedders implementing [`TelemetrySink`].

use crate::event::TelemetryEvent;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

/// Telemetry error types.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Sink has been closed
    #[error("Sink closed")]
    Closed,
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Destination for telemetry events.
///
/// Emission is best-effort: callers log failures and carry on, so an
/// implementation should return quickly and never panic.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Emit a single event.
    async fn emit(&self, event: TelemetryEvent) -> TelemetryResult<()>;

    /// Get sink statistics.
    async fn stats(&self) -> SinkStats {
        SinkStats::default()
    }
}

/// Sink statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Events accepted by the sink
    pub events_emitted: u64,
    /// Events describing failed operations
    pub failures_seen: u64,
    /// Events dropped because the sink was closed
    pub events_dropped: u64,
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetrySink;

#[async_trait]
impl TelemetrySink for NoopTelemetrySink {
    async fn emit(&self, _event: TelemetryEvent) -> TelemetryResult<()> {
        Ok(())
    }
}

/// Sink that writes each event as a structured `tracing` record.
///
/// Failures are logged at `warn`, successes at `debug`.
#[derive(Debug, Default)]
pub struct TracingTelemetrySink {
    emitted: AtomicU64,
    failures: AtomicU64,
}

impl TracingTelemetrySink {
    /// Create a new tracing sink.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TelemetrySink for TracingTelemetrySink {
    async fn emit(&self, event: TelemetryEvent) -> TelemetryResult<()> {
        self.emitted.fetch_add(1, Ordering::Relaxed);

        if event.is_failure() {
            self.failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                topic = %event.topic(),
                event_id = %event.id,
                duration_ms = event.duration_ms,
                client_id = ?event.client_id,
                account_id = ?event.account_id,
                error_code = ?event.error_code,
                "Hierarchy operation failed"
            );
        } else {
            tracing::debug!(
                topic = %event.topic(),
                event_id = %event.id,
                duration_ms = event.duration_ms,
                client_id = ?event.client_id,
                account_id = ?event.account_id,
                "Hierarchy operation completed"
            );
        }

        Ok(())
    }

    async fn stats(&self) -> SinkStats {
        SinkStats {
            events_emitted: self.emitted.load(Ordering::Relaxed),
            failures_seen: self.failures.load(Ordering::Relaxed),
            events_dropped: 0,
        }
    }
}

/// In-memory telemetry sink.
///
/// Keeps the most recent events in a bounded buffer and fans each event out
/// to broadcast subscribers. Suitable for single-process deployments and
/// tests.
#[cfg(feature = "memory")]
pub struct MemoryTelemetrySink {
    /// Most recent events, oldest first
    recent: Arc<RwLock<VecDeque<TelemetryEvent>>>,
    /// Live subscribers
    sender: broadcast::Sender<TelemetryEvent>,
    /// Buffer capacity
    capacity: usize,
    /// Set once the sink stops accepting events
    closed: AtomicBool,
    emitted: AtomicU64,
    failures: AtomicU64,
    dropped: AtomicU64,
}

#[cfg(feature = "memory")]
impl std::fmt::Debug for MemoryTelemetrySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTelemetrySink")
            .field("capacity", &self.capacity)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(feature = "memory")]
impl MemoryTelemetrySink {
    /// Create a new in-memory sink.
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create with custom buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            recent: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            sender,
            capacity,
            closed: AtomicBool::new(false),
            emitted: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.sender.subscribe()
    }

    /// Snapshot of the buffered events, oldest first.
    pub async fn events(&self) -> Vec<TelemetryEvent> {
        self.recent.read().await.iter().cloned().collect()
    }

    /// Buffered events for one operation name.
    pub async fn events_for(&self, operation: &str) -> Vec<TelemetryEvent> {
        self.recent
            .read()
            .await
            .iter()
            .filter(|e| e.operation == operation)
            .cloned()
            .collect()
    }

    /// Stop accepting events. Subsequent emits fail with [`TelemetryError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

#[cfg(feature = "memory")]
impl Default for MemoryTelemetrySink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "memory")]
#[async_trait]
impl TelemetrySink for MemoryTelemetrySink {
    async fn emit(&self, event: TelemetryEvent) -> TelemetryResult<()> {
        if self.closed.load(Ordering::Relaxed) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(TelemetryError::Closed);
        }

        self.emitted.fetch_add(1, Ordering::Relaxed);
        if event.is_failure() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }

        {
            let mut recent = self.recent.write().await;
            if self.capacity > 0 && recent.len() == self.capacity {
                recent.pop_front();
            }
            if self.capacity > 0 {
                recent.push_back(event.clone());
            }
        }

        // No receivers is not an error
        let _ = self.sender.send(event);

        Ok(())
    }

    async fn stats(&self) -> SinkStats {
        SinkStats {
            events_emitted: self.emitted.load(Ordering::Relaxed),
            failures_seen: self.failures.load(Ordering::Relaxed),
            events_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Outcome;

    #[tokio::test]
    async fn test_memory_sink_buffers_and_broadcasts() {
        let sink = MemoryTelemetrySink::new();
        let mut rx = sink.subscribe();

        sink.emit(TelemetryEvent::new("account.create", Outcome::Success))
            .await
            .unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv()).await;
        assert!(received.is_ok());

        let events = sink.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].operation, "account.create");
    }

    #[tokio::test]
    async fn test_memory_sink_capacity() {
        let sink = MemoryTelemetrySink::with_capacity(2);

        for op in ["a", "b", "c"] {
            sink.emit(TelemetryEvent::new(op, Outcome::Success))
                .await
                .unwrap();
        }

        let events = sink.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].operation, "b");
        assert_eq!(events[1].operation, "c");
    }

    #[tokio::test]
    async fn test_closed_sink_rejects_events() {
        let sink = MemoryTelemetrySink::new();
        sink.close();

        let result = sink
            .emit(TelemetryEvent::new("account.move", Outcome::Success))
            .await;
        assert!(matches!(result, Err(TelemetryError::Closed)));

        let stats = sink.stats().await;
        assert_eq!(stats.events_emitted, 0);
        assert_eq!(stats.events_dropped, 1);
    }

    #[tokio::test]
    async fn test_stats_count_failures() {
        let sink = MemoryTelemetrySink::new();
        sink.emit(TelemetryEvent::new("account.remove", Outcome::Failure))
            .await
            .unwrap();
        sink.emit(TelemetryEvent::new("account.create", Outcome::Success))
            .await
            .unwrap();

        let stats = sink.stats().await;
        assert_eq!(stats.events_emitted, 2);
        assert_eq!(stats.failures_seen, 1);
        assert_eq!(sink.events_for("account.remove").await.len(), 1);
    }

    #[tokio::test]
    async fn test_tracing_sink_stats() {
        let sink = TracingTelemetrySink::new();
        sink.emit(TelemetryEvent::new("account.remove", Outcome::Failure))
            .await
            .unwrap();

        let stats = sink.stats().await;
        assert_eq!(stats.events_emitted, 1);
        assert_eq!(stats.failures_seen, 1);
    }

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoopTelemetrySink;
        assert!(sink
            .emit(TelemetryEvent::new("x", Outcome::Success))
            .await
            .is_ok());
        assert_eq!(sink.stats().await, SinkStats::default());
    }
}
