#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Arbor Telemetry
//!
//! Event bus and metrics for the Arbor plan engine.
//!
//! This crate provides:
//! - [`EventBus`] -- broadcast-based event distribution
//! - [`ExecutionEvent`] -- run, node and virtual-user lifecycle events
//! - [`MetricsRegistry`] -- named counters, gauges and histograms, with
//!   [`MetricsSnapshot`] for export
//!
//! Events are **projections**, not the source of truth.
//! The report node store is the single source of truth.

pub mod event;
pub mod metrics;

pub use event::{EventBus, EventSubscriber, ExecutionEvent};
pub use metrics::{
    Counter, Gauge, Histogram, HistogramSnapshot, MetricsRegistry, MetricsSnapshot,
};
