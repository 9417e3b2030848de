//! Function execution service port.
//!
//! A keyword call is a three-step conversation with the service: reserve an
//! agent token, invoke the function on it, release the token. The engine
//! always releases a token it reserved, whatever the invocation outcome.

use std::collections::BTreeMap;

use arbor_execution::{Attachment, ErrorKind, Measure};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PortsError;

/// A reserved agent slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Token id assigned by the service.
    pub id: String,
    /// Attributes of the agent behind the token.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Names the function to invoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRef {
    /// Keyword name.
    pub name: String,
}

impl FunctionRef {
    /// Reference a function by name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Input of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionInput {
    /// JSON arguments.
    pub payload: Value,
    /// Transport properties, e.g. the run id.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// An error reported by the callee.
///
/// Transport failures never get this far: they are returned as
/// [`PortsError`] from [`FunctionExecutionService::invoke`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionError {
    /// `Business` for a failed check, `Technical` for an agent-side fault.
    pub kind: ErrorKind,
    /// Message.
    pub message: String,
    /// Structured payload from the agent.
    #[serde(default)]
    pub details: Option<Value>,
}

/// Result of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionOutput {
    /// JSON payload.
    pub payload: Value,
    /// Callee-reported error.
    #[serde(default)]
    pub error: Option<FunctionError>,
    /// Binary artifacts.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Timed measurements.
    #[serde(default)]
    pub measures: Vec<Measure>,
}

impl FunctionOutput {
    /// A successful output.
    pub fn success(payload: Value) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    /// An output carrying a business failure.
    pub fn business_failure(message: impl Into<String>) -> Self {
        Self::failure(ErrorKind::Business, message)
    }

    /// An output carrying an agent-side technical error.
    pub fn technical_error(message: impl Into<String>) -> Self {
        Self::failure(ErrorKind::Technical, message)
    }

    fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: Some(FunctionError {
                kind,
                message: message.into(),
                details: None,
            }),
            ..Self::default()
        }
    }

    /// Add an attachment.
    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Add a measure.
    #[must_use]
    pub fn with_measure(mut self, measure: Measure) -> Self {
        self.measures.push(measure);
        self
    }
}

/// Delegates keyword execution to agents.
#[async_trait]
pub trait FunctionExecutionService: Send + Sync {
    /// Reserve a token on an agent.
    ///
    /// `attributes` describe the caller; `interests` map agent attribute
    /// names to regexes the agent must match.
    async fn reserve(
        &self,
        attributes: BTreeMap<String, String>,
        interests: BTreeMap<String, String>,
    ) -> Result<Token, PortsError>;

    /// Invoke a function on a reserved token.
    async fn invoke(
        &self,
        token: &Token,
        function: &FunctionRef,
        input: FunctionInput,
    ) -> Result<FunctionOutput, PortsError>;

    /// Return a token to the pool.
    async fn release(&self, token: Token) -> Result<(), PortsError>;
}
