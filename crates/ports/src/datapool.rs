//! Data pool ports used by `ForEach`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::PortsError;

/// One row produced by a [`DataPool`].
#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    /// Zero-based row index.
    pub index: usize,
    /// Cell values.
    pub cells: Vec<Value>,
    /// Column headers, when the source has them.
    pub headers: Option<Arc<Vec<String>>>,
}

impl DataRow {
    /// The value bound to the loop's item variable.
    ///
    /// With `header` set and headers available the row becomes a
    /// header-keyed object; otherwise it is the plain cell array.
    #[must_use]
    pub fn as_binding(&self, header: bool) -> Value {
        match (&self.headers, header) {
            (Some(headers), true) => {
                let mut map = Map::new();
                for (name, cell) in headers.iter().zip(&self.cells) {
                    map.insert(name.clone(), cell.clone());
                }
                Value::Object(map)
            }
            _ => Value::Array(self.cells.clone()),
        }
    }
}

/// A forward-only row source. One instance serves one loop instantiation.
#[async_trait]
pub trait DataPool: Send {
    /// Next row, or `None` at the end.
    async fn next(&mut self) -> Result<Option<DataRow>, PortsError>;

    /// Rewind to the first row.
    async fn reset(&mut self) -> Result<(), PortsError>;

    /// Release the underlying source.
    async fn close(&mut self) -> Result<(), PortsError>;
}

/// Opens data pools by provider kind.
#[async_trait]
pub trait DataPoolFactory: Send + Sync {
    /// Open a pool of provider `kind` configured by `config`.
    async fn open(&self, kind: &str, config: Value) -> Result<Box<dyn DataPool>, PortsError>;
}
