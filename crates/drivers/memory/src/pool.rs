//! In-memory data pools.
//!
//! Two provider kinds are understood by [`MemoryDataPoolFactory`]:
//!
//! - `"inline"`: config is `{"headers": [...], "rows": [[...], ...]}`, with
//!   `headers` optional. Rows given as objects take their keys as headers.
//! - `"dataset"`: config is `{"name": "..."}` naming a dataset registered
//!   with [`MemoryDataPoolFactory::register`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arbor_ports::{DataPool, DataPoolFactory, DataRow, PortsError};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

/// A pool over rows held in memory.
#[derive(Debug)]
pub struct VecDataPool {
    rows: Arc<Vec<Vec<Value>>>,
    headers: Option<Arc<Vec<String>>>,
    position: usize,
    closed: bool,
    on_close: Option<Arc<AtomicUsize>>,
}

impl VecDataPool {
    /// Create a pool over `rows`.
    #[must_use]
    pub fn new(headers: Option<Vec<String>>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            rows: Arc::new(rows),
            headers: headers.map(Arc::new),
            position: 0,
            closed: false,
            on_close: None,
        }
    }

    fn shared(dataset: &Dataset, on_close: Arc<AtomicUsize>) -> Self {
        Self {
            rows: Arc::clone(&dataset.rows),
            headers: dataset.headers.clone(),
            position: 0,
            closed: false,
            on_close: Some(on_close),
        }
    }
}

#[async_trait]
impl DataPool for VecDataPool {
    async fn next(&mut self) -> Result<Option<DataRow>, PortsError> {
        if self.closed {
            return Err(PortsError::Internal("data pool is closed".into()));
        }
        let Some(cells) = self.rows.get(self.position) else {
            return Ok(None);
        };
        let row = DataRow {
            index: self.position,
            cells: cells.clone(),
            headers: self.headers.clone(),
        };
        self.position += 1;
        Ok(Some(row))
    }

    async fn reset(&mut self) -> Result<(), PortsError> {
        self.position = 0;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PortsError> {
        if !self.closed {
            self.closed = true;
            if let Some(counter) = &self.on_close {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Dataset {
    headers: Option<Arc<Vec<String>>>,
    rows: Arc<Vec<Vec<Value>>>,
}

impl Dataset {
    fn from_config(config: &Value) -> Result<Self, PortsError> {
        let rows = config
            .get("rows")
            .and_then(Value::as_array)
            .ok_or_else(|| PortsError::Internal("inline data pool needs a `rows` array".into()))?;
        let mut headers: Option<Vec<String>> = match config.get("headers") {
            Some(Value::Array(names)) => Some(
                names
                    .iter()
                    .map(|name| match name {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            _ => None,
        };
        let mut cells = Vec::with_capacity(rows.len());
        for row in rows {
            match row {
                Value::Array(values) => cells.push(values.clone()),
                Value::Object(map) => {
                    let names = headers.get_or_insert_with(|| map.keys().cloned().collect());
                    cells.push(
                        names
                            .iter()
                            .map(|name| map.get(name).cloned().unwrap_or(Value::Null))
                            .collect(),
                    );
                }
                scalar => cells.push(vec![scalar.clone()]),
            }
        }
        Ok(Self {
            headers: headers.map(Arc::new),
            rows: Arc::new(cells),
        })
    }
}

/// Opens [`VecDataPool`]s and counts how many were opened and closed.
#[derive(Debug, Default)]
pub struct MemoryDataPoolFactory {
    datasets: DashMap<String, Dataset>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl MemoryDataPoolFactory {
    /// Create a factory with no registered datasets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named dataset for the `"dataset"` kind.
    pub fn register(&self, name: impl Into<String>, headers: Option<Vec<String>>, rows: Vec<Vec<Value>>) {
        let name = name.into();
        tracing::debug!(dataset = %name, rows = rows.len(), "registered dataset");
        self.datasets.insert(
            name,
            Dataset {
                headers: headers.map(Arc::new),
                rows: Arc::new(rows),
            },
        );
    }

    /// Number of pools opened so far.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of pools closed so far.
    #[must_use]
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataPoolFactory for MemoryDataPoolFactory {
    async fn open(&self, kind: &str, config: Value) -> Result<Box<dyn DataPool>, PortsError> {
        let dataset = match kind {
            "inline" => Dataset::from_config(&config)?,
            "dataset" => {
                let name = config
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| PortsError::Internal("dataset pool needs a `name`".into()))?;
                self.datasets
                    .get(name)
                    .map(|d| d.value().clone())
                    .ok_or_else(|| PortsError::not_found("Dataset", name))?
            }
            other => return Err(PortsError::not_found("DataPoolKind", other)),
        };
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(VecDataPool::shared(&dataset, Arc::clone(&self.closed))))
    }
}
