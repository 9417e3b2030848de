//! In-process run metrics.
//!
//! The engine feeds a [`MetricsRegistry`] through its telemetry hook. Names
//! of the metrics it maintains are exported as constants so callers do not
//! spell them by hand. [`MetricsRegistry::snapshot`] freezes everything into
//! a serializable [`MetricsSnapshot`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

/// Runs that entered `Running`.
pub const RUNS_STARTED: &str = "runs_started_total";
/// Runs that reached the end of `Exporting`.
pub const RUNS_ENDED: &str = "runs_ended_total";
/// Report nodes created.
pub const NODES_STARTED: &str = "nodes_started_total";
/// Report nodes finalized.
pub const NODES_FINISHED: &str = "nodes_finished_total";
/// Report nodes finalized as failed or technical error.
pub const NODES_FAILED: &str = "nodes_failed_total";
/// Report nodes finalized as interrupted.
pub const NODES_INTERRUPTED: &str = "nodes_interrupted_total";
/// Node durations in milliseconds.
pub const NODE_DURATION_MS: &str = "node_duration_ms";
/// Virtual users currently running.
pub const ACTIVE_USERS: &str = "active_users";

/// Monotonic counter.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    /// A counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one.
    pub fn inc(&self) {
        self.inc_by(1);
    }

    /// Add `n`.
    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Up/down gauge, e.g. live virtual users.
#[derive(Debug, Clone, Default)]
pub struct Gauge(Arc<AtomicI64>);

impl Gauge {
    /// A gauge at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Subtract one.
    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    /// Overwrite the value.
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Summary {
    count: usize,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

/// Running summary of observations: count, sum, min and max.
///
/// Observations are folded as they arrive, so memory stays constant however
/// long a load test runs.
#[derive(Debug, Clone, Default)]
pub struct Histogram(Arc<Mutex<Summary>>);

impl Histogram {
    /// An empty histogram.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation.
    pub fn observe(&self, value: f64) {
        let mut summary = self.0.lock();
        summary.count += 1;
        summary.sum += value;
        summary.min = Some(summary.min.map_or(value, |m| m.min(value)));
        summary.max = Some(summary.max.map_or(value, |m| m.max(value)));
    }

    /// Number of observations.
    #[must_use]
    pub fn count(&self) -> usize {
        self.0.lock().count
    }

    /// Sum of observations.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.0.lock().sum
    }

    /// Smallest observation.
    #[must_use]
    pub fn min(&self) -> Option<f64> {
        self.0.lock().min
    }

    /// Largest observation.
    #[must_use]
    pub fn max(&self) -> Option<f64> {
        self.0.lock().max
    }

    /// Arithmetic mean, if anything was observed.
    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        let summary = *self.0.lock();
        (summary.count > 0).then(|| summary.sum / summary.count as f64)
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let summary = *self.0.lock();
        HistogramSnapshot {
            count: summary.count,
            sum: summary.sum,
            min: summary.min,
            max: summary.max,
        }
    }
}

/// Frozen view of a [`Histogram`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSnapshot {
    /// Number of observations.
    pub count: usize,
    /// Sum of observations.
    pub sum: f64,
    /// Smallest observation.
    pub min: Option<f64>,
    /// Largest observation.
    pub max: Option<f64>,
}

/// Frozen view of every metric in a registry, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Counter values.
    pub counters: BTreeMap<String, u64>,
    /// Gauge values.
    pub gauges: BTreeMap<String, i64>,
    /// Histogram summaries.
    pub histograms: BTreeMap<String, HistogramSnapshot>,
}

/// Named metrics. Handles for the same name share one value.
///
/// Cloning the registry shares it.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    counters: Arc<RwLock<BTreeMap<String, Counter>>>,
    gauges: Arc<RwLock<BTreeMap<String, Gauge>>>,
    histograms: Arc<RwLock<BTreeMap<String, Histogram>>>,
}

fn get_or_create<M: Clone + Default>(table: &RwLock<BTreeMap<String, M>>, name: &str) -> M {
    if let Some(metric) = table.read().get(name) {
        return metric.clone();
    }
    table.write().entry(name.to_owned()).or_default().clone()
}

impl MetricsRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The counter called `name`, created on first use.
    pub fn counter(&self, name: &str) -> Counter {
        get_or_create(&self.counters, name)
    }

    /// The gauge called `name`, created on first use.
    pub fn gauge(&self, name: &str) -> Gauge {
        get_or_create(&self.gauges, name)
    }

    /// The histogram called `name`, created on first use.
    pub fn histogram(&self, name: &str) -> Histogram {
        get_or_create(&self.histograms, name)
    }

    /// Current values of every metric.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .read()
                .iter()
                .map(|(name, c)| (name.clone(), c.get()))
                .collect(),
            gauges: self
                .gauges
                .read()
                .iter()
                .map(|(name, g)| (name.clone(), g.get()))
                .collect(),
            histograms: self
                .histograms
                .read()
                .iter()
                .map(|(name, h)| (name.clone(), h.snapshot()))
                .collect(),
        }
    }
}
