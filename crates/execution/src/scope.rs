//! Variable scope stack.
//!
//! Frames are linked from innermost to outermost. A [`ScopeStack`] is a cheap
//! handle on the innermost frame: pushing returns a new handle and leaves the
//! old one untouched, so concurrent workers each push their own frame over a
//! shared, read-mostly parent chain.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

#[derive(Debug, Default)]
struct Frame {
    vars: RwLock<HashMap<String, Value>>,
    parent: Option<Arc<Frame>>,
}

/// Handle on a chain of variable frames.
#[derive(Debug, Clone)]
pub struct ScopeStack {
    top: Arc<Frame>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    /// A stack with a single empty frame.
    #[must_use]
    pub fn new() -> Self {
        Self {
            top: Arc::new(Frame::default()),
        }
    }

    /// A stack whose single frame holds `bindings`.
    #[must_use]
    pub fn with_bindings(bindings: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            top: Arc::new(Frame {
                vars: RwLock::new(bindings.into_iter().collect()),
                parent: None,
            }),
        }
    }

    /// A new handle with an empty frame on top of this one.
    #[must_use]
    pub fn push(&self) -> Self {
        Self {
            top: Arc::new(Frame {
                vars: RwLock::new(HashMap::new()),
                parent: Some(Arc::clone(&self.top)),
            }),
        }
    }

    /// A handle on the enclosing frame, or `None` at the outermost frame.
    #[must_use]
    pub fn pop(&self) -> Option<Self> {
        self.top.parent.as_ref().map(|parent| Self {
            top: Arc::clone(parent),
        })
    }

    /// Number of frames visible from this handle.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut frame = &self.top;
        while let Some(parent) = &frame.parent {
            depth += 1;
            frame = parent;
        }
        depth
    }

    /// Look a variable up, innermost frame first.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut frame = Some(&self.top);
        while let Some(current) = frame {
            if let Some(value) = current.vars.read().get(key) {
                return Some(value.clone());
            }
            frame = current.parent.as_ref();
        }
        None
    }

    /// Look a variable up in the innermost frame only.
    #[must_use]
    pub fn get_local(&self, key: &str) -> Option<Value> {
        self.top.vars.read().get(key).cloned()
    }

    /// Bind a variable in the innermost frame, shadowing outer bindings.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.top.vars.write().insert(key.into(), value);
    }

    /// Remove a variable from the innermost frame.
    pub fn unset(&self, key: &str) -> Option<Value> {
        self.top.vars.write().remove(key)
    }

    /// Every visible binding, with inner frames shadowing outer ones.
    #[must_use]
    pub fn bindings(&self) -> Map<String, Value> {
        let mut chain = Vec::with_capacity(self.depth());
        let mut frame = Some(&self.top);
        while let Some(current) = frame {
            chain.push(current);
            frame = current.parent.as_ref();
        }
        let mut out = Map::new();
        for frame in chain.into_iter().rev() {
            for (key, value) in frame.vars.read().iter() {
                out.insert(key.clone(), value.clone());
            }
        }
        out
    }
}
