//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Tunables shared by every run of an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the telemetry event bus.
    pub event_capacity: usize,
    /// Worker count for parallel loops that do not set `threads`.
    pub default_threads: usize,
    /// Largest `threads` a parallel loop or TestSet may ask for.
    pub max_threads: usize,
    /// Keyword calls pass without contacting the function service.
    pub simulate: bool,
    /// Hook failures beyond this many are counted but no longer logged.
    pub hook_failure_limit: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            default_threads: 4,
            max_threads: 1024,
            simulate: false,
            hook_failure_limit: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `ARBOR_EVENT_CAPACITY`, `ARBOR_DEFAULT_THREADS`,
    /// `ARBOR_MAX_THREADS` and `ARBOR_SIMULATE`.
    ///
    /// Values that do not parse are ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(capacity) = parse_var(&lookup, "ARBOR_EVENT_CAPACITY") {
            config.event_capacity = capacity;
        }
        if let Some(threads) = parse_var(&lookup, "ARBOR_DEFAULT_THREADS") {
            config.default_threads = threads;
        }
        if let Some(threads) = parse_var(&lookup, "ARBOR_MAX_THREADS") {
            config.max_threads = threads;
        }
        if let Some(simulate) = parse_var(&lookup, "ARBOR_SIMULATE") {
            config.simulate = simulate;
        }
        config
    }

    /// Set the event bus capacity.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the default worker count for parallel loops.
    #[must_use]
    pub fn with_default_threads(mut self, threads: usize) -> Self {
        self.default_threads = threads;
        self
    }

    /// Set the largest worker count a node may ask for.
    #[must_use]
    pub fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = threads;
        self
    }

    /// Enable or disable simulation mode.
    #[must_use]
    pub fn with_simulate(mut self, simulate: bool) -> Self {
        self.simulate = simulate;
        self
    }

    /// Cap the number of logged hook failures.
    #[must_use]
    pub fn with_hook_failure_limit(mut self, limit: u64) -> Self {
        self.hook_failure_limit = Some(limit);
        self
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable engine setting");
            None
        }
    }
}
