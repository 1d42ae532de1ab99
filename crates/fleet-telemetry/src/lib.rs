//! # Fleet Telemetry
//!
//! This crate provides the telemetry interface the fleet account hierarchy
//! engine reports to.
//!
//! ## Overview
//!
//! The fleet-telemetry crate handles:
//! - **Events**: A structured envelope (operation, outcome, timing, metadata)
//! - **Sinks**: The async [`TelemetrySink`] trait plus in-process sinks
//!
//! Emission is best-effort. The engine logs a warning when a sink fails and
//! never lets a telemetry failure change an operation's result.
//!
//! ## Features
//!
//! - `memory` (default): Buffered in-memory sink with broadcast subscribers
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fleet_telemetry::{MemoryTelemetrySink, Outcome, TelemetryEvent, TelemetrySink};
//!
//! async fn emit_example() {
//!     let sink = MemoryTelemetrySink::new();
//!     let mut rx = sink.subscribe();
//!
//!     sink.emit(TelemetryEvent::new("account.create", Outcome::Success))
//!         .await
//!         .unwrap();
//!
//!     let event = rx.recv().await.unwrap();
//!     println!("{} took {}ms", event.topic(), event.duration_ms);
//! }
//! ```

pub mod event;
pub mod sink;

// Re-export main types for convenience
pub use event::{Outcome, TelemetryEvent};
#[cfg(feature = "memory")]
pub use sink::MemoryTelemetrySink;
pub use sink::{
    NoopTelemetrySink, SinkStats, TelemetryError, TelemetryResult, TelemetrySink,
    TracingTelemetrySink,
};
